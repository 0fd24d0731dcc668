use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("embedding provider error: {0}")]
    Embedding(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LocatorError>;

impl LocatorError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
