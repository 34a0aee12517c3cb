use keeper_docstore::DocStoreError;
use keeper_meta::MetaError;
use keeper_providers::ProviderError;
use keeper_queue::QueueError;
use keeper_vectorstore::VectorStoreError;
use thiserror::Error;

pub type KeeperResult<T> = Result<T, KeeperError>;

/// The Keeper's error taxonomy (spec §7): a superset of every lower crate's
/// errors plus the kinds only the orchestration layer can raise
/// (`InvalidInput`, `ConstrainedTag`, the provider timeout/transient/fatal
/// split, `DimensionMismatch`, `ConcurrentModification`).
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tag constraint violated for {key}: valid values are {valid_values:?}")]
    ConstrainedTag {
        key: String,
        valid_values: Vec<String>,
    },
    #[error("no provider registered for {0}")]
    ProviderUnavailable(String),
    #[error("provider timed out: {0}")]
    ProviderTimeout(String),
    #[error("transient provider failure: {0}")]
    ProviderTransient(String),
    #[error("fatal provider failure: {0}")]
    ProviderFatal(String),
    #[error("dimension mismatch: collection is {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("format error: {0}")]
    FormatError(String),
}

impl KeeperError {
    /// Background-task propagation policy (spec §7): transient failures are
    /// worth a retry with backoff, the rest dead-letter the task immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeeperError::ProviderUnavailable(_)
                | KeeperError::ProviderTimeout(_)
                | KeeperError::ProviderTransient(_)
                | KeeperError::StorageFailure(_)
                | KeeperError::ConcurrentModification(_)
        )
    }
}

impl From<DocStoreError> for KeeperError {
    fn from(err: DocStoreError) -> Self {
        match err {
            DocStoreError::NotFound(id) => KeeperError::NotFound(id),
            DocStoreError::TagConstraintViolation { key, message } => KeeperError::ConstrainedTag {
                key,
                valid_values: vec![message],
            },
            DocStoreError::Conflict(message) => KeeperError::ConcurrentModification(message),
            DocStoreError::Storage(message) => KeeperError::StorageFailure(message),
        }
    }
}

impl From<VectorStoreError> for KeeperError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::DimensionMismatch { expected, got } => {
                KeeperError::DimensionMismatch { expected, got }
            }
            VectorStoreError::Storage(message) => KeeperError::StorageFailure(message),
        }
    }
}

impl From<QueueError> for KeeperError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownTask(id) => KeeperError::NotFound(format!("task {id}")),
            QueueError::Storage(message) => KeeperError::StorageFailure(message),
        }
    }
}

impl From<MetaError> for KeeperError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::TagConstraintViolation { key, valid_values } => {
                KeeperError::ConstrainedTag { key, valid_values }
            }
            MetaError::Storage(message) => KeeperError::StorageFailure(message),
        }
    }
}

impl From<ProviderError> for KeeperError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(capability) => KeeperError::ProviderUnavailable(capability),
            ProviderError::Timeout(message) => KeeperError::ProviderTimeout(message),
            ProviderError::Transient(message) => KeeperError::ProviderTransient(message),
            ProviderError::Fatal(message) => KeeperError::ProviderFatal(message),
        }
    }
}
