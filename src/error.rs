use thiserror::Error as ThisError;
use uuid::Uuid;

/// Failure classes surfaced by job operations.
///
/// Only [`Error::Transient`] is ever retried, and only by the reconciliation
/// loop; the rest are reported to the caller as-is. A failed pipeline run is
/// not an error at all: it is the `Failed` job state.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("transient i/o failure: {0}")]
    Transient(String),
}

impl Error {
    /// Recoverable by waiting for the next poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
