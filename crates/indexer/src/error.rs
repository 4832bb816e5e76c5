use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] ragwatch_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] ragwatch_vector_store::VectorStoreError),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ragwatch_protocol::ProtocolError),

    #[error("Invalid workspace path: {0}")]
    InvalidPath(String),

    #[error("Path {path} is outside workspace {root}")]
    OutsideWorkspace { path: String, root: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Processing queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Whether the error invalidates the index store and must stop the service.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::VectorStoreError(err) => err.is_fatal(),
            _ => false,
        }
    }
}
