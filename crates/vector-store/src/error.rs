use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Index initialization failed: {0}")]
    Initialization(String),

    #[error("Index store is not initialized")]
    NotInitialized,

    #[error("Index store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl VectorStoreError {
    /// Fatal errors mean the store itself can no longer be trusted; everything else is scoped
    /// to the file that triggered it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Initialization(_)
                | Self::NotInitialized
                | Self::Unavailable(_)
                | Self::Io(_)
                | Self::Json(_)
        )
    }
}
