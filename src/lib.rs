//! A loading screen for Fabric and Quilt. The loader's own classes are rewritten as they load so
//! that entrypoint progress reaches a window, either drawn in this process or by a separate
//! display process fed over a pipe.

pub mod api;
pub mod config;
pub mod context;
pub mod hooks;
pub mod host;
pub mod ipc;
mod logging;
pub mod memory;
pub mod overlay;
pub mod progress;
pub mod protocol;
pub mod transform;

pub use api::Api;
pub use context::{start, Startup};

/// The crate version, reported in the startup log.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
