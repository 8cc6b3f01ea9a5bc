use thiserror::Error;

/// Error kinds produced by the cache chain and the derivation coordinator.
///
/// `AlarmEvent` is deliberately absent here since it is observability, not a
/// failure, and is delivered through [`crate::level::AlarmSink`] instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The identity has no original in the originals store.
    #[error("identity not found: {0}")]
    NotFound(String),

    /// A remote backend is unreachable; transient, worth retrying with backoff.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A remote backend returned an error other than "not found".
    #[error("backend error ({status}): {message}")]
    StoreError { status: u16, message: String },

    /// The transform pipeline could not process the source bytes.
    #[error("transform failed: {0}")]
    TransformError(String),

    /// Configuration is invalid; fatal at startup.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A single entry exceeds the caps of every level that could hold it.
    #[error("entry too large for any configured cache level ({size} bytes)")]
    CapacityError { size: usize },

    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    Timeout,
}

impl CoreError {
    /// True for errors that are safe to retry with backoff: `Unavailable` is
    /// transient, everything else either is fatal to the request or reflects
    /// a logic/configuration problem that retrying won't fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Unavailable(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
