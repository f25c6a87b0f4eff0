use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Unknown enum value: {0}")]
    UnknownValue(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
