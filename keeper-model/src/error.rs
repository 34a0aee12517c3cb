use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid duration token: {0}")]
    InvalidDuration(String),
}
