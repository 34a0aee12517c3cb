use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// The provider-facing slice of spec §7's error taxonomy: everything a
/// network or model call can do, distinct from DocStore/VectorStore
/// failures.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("no provider registered for {0}")]
    Unavailable(String),
    #[error("provider timed out: {0}")]
    Timeout(String),
    /// Retryable: background tasks retry with exponential backoff,
    /// foreground calls surface the kind directly (spec §7).
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Non-retryable: the owning task is dead-lettered.
    #[error("fatal provider failure: {0}")]
    Fatal(String),
}
