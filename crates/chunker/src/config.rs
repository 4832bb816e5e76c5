use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Line-window chunking parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum number of lines in one chunk
    pub max_lines: usize,
    /// Lines shared between consecutive chunks
    pub overlap_lines: usize,
    /// Maximum number of characters in one chunk; longer lines are split
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::for_embeddings()
    }
}

impl ChunkerConfig {
    /// Windows sized for small embedding models
    pub const fn for_embeddings() -> Self {
        Self {
            max_lines: 40,
            overlap_lines: 5,
            max_chars: 4000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_lines == 0 {
            return Err(ChunkerError::invalid_config("max_lines must be > 0"));
        }
        if self.max_chars == 0 {
            return Err(ChunkerError::invalid_config("max_chars must be > 0"));
        }
        if self.overlap_lines >= self.max_lines {
            return Err(ChunkerError::invalid_config(format!(
                "overlap_lines ({}) must be smaller than max_lines ({})",
                self.overlap_lines, self.max_lines
            )));
        }
        Ok(())
    }
}
