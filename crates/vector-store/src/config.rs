use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub collection_name: String,
    /// Where the JSON index lives; `None` lets the caller pick a workspace-local default
    pub path: Option<PathBuf>,
    pub dimension: usize,
    /// Persist after this many committed mutations (and always on close)
    pub autosave_every: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection_name: "workspace".to_string(),
            path: None,
            dimension: 256,
            autosave_every: 32,
        }
    }
}
