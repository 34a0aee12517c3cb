use thiserror::Error;

pub type MetaResult<T> = Result<T, MetaError>;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("tag constraint violated for {key}: valid values are {valid_values:?}")]
    TagConstraintViolation {
        key: String,
        valid_values: Vec<String>,
    },
    #[error("storage failure: {0}")]
    Storage(String),
}
