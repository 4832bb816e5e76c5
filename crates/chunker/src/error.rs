use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkerError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("Invalid chunker config: {0}")]
    InvalidConfig(String),

    #[error("Content is not valid UTF-8 text: {0}")]
    NotText(String),
}

impl ChunkerError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn not_text(path: impl Into<String>) -> Self {
        Self::NotText(path.into())
    }
}
