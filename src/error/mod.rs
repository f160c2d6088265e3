use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the batch store, the rebinner, the preparer and the PCA engine.
///
/// Every operation fails before touching stored state, so an `Err` never leaves a
/// half-updated batch or dataset behind.
#[derive(Debug, Error)]
pub enum PcaExpError {
    /// A measurement file was missing, unreadable or did not decode to a numeric table.
    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// Arrays that have to be combined disagree in shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Mutually exclusive or jointly required arguments were violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A zero-variance bin or an empty resampling window would divide by zero.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("no batch stored at index {0}")]
    UnknownBatch(usize),

    /// A handle that was not issued by this preparer or engine.
    #[error("unknown handle {0}")]
    UnknownHandle(usize),

    /// Tensor or optimizer failure inside the confusion classifier.
    #[error("network error: {0}")]
    Network(#[from] candle_core::Error),
}

impl PcaExpError {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PcaExpError::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PcaExpError>;
