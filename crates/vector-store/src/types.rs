use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunkMetadata {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
    pub content_hash: String,
}

/// One embedded unit of a source file. Owned by the index store once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Workspace-relative path of the file this chunk came from
    pub source_path: String,
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: IndexedChunkMetadata,
}

/// Committed state of an index collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub count: usize,
    pub name: String,
}
