//! The progress model: which bars exist, how far along they are, and whether the overlay is
//! still up. The same model runs on both sides of the IPC boundary; only the sink differs.

mod event;
mod model;
mod registry;
mod teardown;

pub use event::{CustomOp, CustomOpKind, ProgressEvent};
pub use model::{entrypoint_label, metadata_title, DisconnectAction, LoadingScreen};
pub use registry::{
    custom_bar_id, entrypoint_bar_id, ProgressBar, ProgressRegistry, CUSTOM_PREFIX,
    ENTRYPOINT_PREFIX,
};
pub use teardown::{DeferRule, FinalEntrypoints, OverlayState, TeardownPolicy};

use thiserror::Error;

/// Caller-visible failures of model operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("minimum ({minimum}) may not be greater than maximum ({maximum})")]
    InvalidBounds { minimum: i32, maximum: i32 },

    #[error("unknown progress bar operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid argument '{value}' for operation '{op}'")]
    InvalidArgument { op: String, value: String },

    #[error("progress bar '{0}' is closed")]
    Closed(String),
}

/// What happened to an event handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,

    /// The event was lost, but the sink is still usable.
    Dropped,

    /// The other end has gone away. Nothing more can be delivered.
    Disconnected,
}

/// Something that consumes progress events: either the overlay in this process or the pipe
/// to the display process.
pub trait EventSink: Send {
    fn deliver(&mut self, event: &ProgressEvent) -> Delivery;

    /// Releases whatever the sink holds. Called exactly once, when the overlay is torn down.
    fn close(&mut self) {}
}
