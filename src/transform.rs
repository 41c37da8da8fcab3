//! Bytecode rewriting for the loader's own classes.

pub mod analysis;
pub mod class;
pub mod descriptor;
pub mod engine;
pub mod locator;
pub mod rules;

use thiserror::Error;

pub use analysis::{compute_maxs, VerifyError};
pub use class::ClassNode;
pub use engine::{Skipped, TransformOutcome, Transformer, DUMP_DIR};
pub use rules::RuleTable;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("not a class file (magic {0:x?})")]
    BadMagic(Option<u32>),

    #[error("failed to decode class")]
    Decode(#[source] bincode::Error),

    #[error("failed to encode class")]
    Encode(#[source] bincode::Error),

    #[error("bad descriptor '{0}'")]
    BadDescriptor(String),

    #[error("{class} has no method {method}")]
    MethodNotFound { class: String, method: String },

    #[error("nowhere to put '{injection}' in {method}")]
    NoMatch {
        method: String,
        injection: &'static str,
    },

    #[error("{method} doesn't verify after patching")]
    Verify {
        method: String,
        #[source]
        source: VerifyError,
    },
}
