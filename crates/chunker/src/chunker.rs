use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::language::Language;
use serde::{Deserialize, Serialize};

/// Bytes inspected when sniffing for binary content
const BINARY_SNIFF_LEN: usize = 8000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub language: Option<String>,
}

/// A contiguous window of lines taken from one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub file_path: String,
    /// 1-based, inclusive
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    pub const fn new(
        file_path: String,
        start_line: usize,
        end_line: usize,
        content: String,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            file_path,
            start_line,
            end_line,
            content,
            metadata,
        }
    }
}

/// Heuristic used by git and ripgrep: a NUL byte near the start means binary.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    head.contains(&0)
}

/// Splits text into overlapping line windows
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk raw file bytes. Binary content yields no chunks; non-UTF-8 text is an error.
    pub fn chunk_bytes(&self, bytes: &[u8], file_path: Option<&str>) -> Result<Vec<TextChunk>> {
        if looks_binary(bytes) {
            log::debug!("Skipping binary content: {}", file_path.unwrap_or("<memory>"));
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ChunkerError::not_text(file_path.unwrap_or("<memory>")))?;
        self.chunk_str(text, file_path)
    }

    pub fn chunk_str(&self, content: &str, file_path: Option<&str>) -> Result<Vec<TextChunk>> {
        self.config.validate()?;

        let file_path = file_path.unwrap_or_default().to_string();
        let language = Language::from_path(&file_path);
        let metadata = ChunkMetadata {
            language: (language != Language::Unknown).then(|| language.as_str().to_string()),
        };

        let lines: Vec<&str> = content.lines().collect();
        let max_lines = self.config.max_lines;
        let max_chars = self.config.max_chars;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            if lines[start].chars().count() > max_chars {
                for piece in split_long_line(lines[start], max_chars) {
                    chunks.push(TextChunk::new(
                        file_path.clone(),
                        start + 1,
                        start + 1,
                        piece,
                        metadata.clone(),
                    ));
                }
                start += 1;
                continue;
            }

            let mut end = start;
            let mut used_chars = 0usize;
            while end < lines.len() && end - start < max_lines {
                let line_chars = lines[end].chars().count();
                if end > start && (line_chars > max_chars || used_chars + line_chars + 1 > max_chars)
                {
                    break;
                }
                used_chars += line_chars + 1;
                end += 1;
            }

            let text = lines[start..end].join("\n");
            if !text.trim().is_empty() {
                chunks.push(TextChunk::new(
                    file_path.clone(),
                    start + 1,
                    end,
                    text,
                    metadata.clone(),
                ));
            }

            if end >= lines.len() {
                break;
            }
            let next = end.saturating_sub(self.config.overlap_lines);
            start = if next > start { next } else { end };
        }

        Ok(chunks)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::for_embeddings())
    }
}

fn split_long_line(line: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in line.chars() {
        if count == max_chars {
            pieces.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_sniff_detects_nul() {
        assert!(looks_binary(b"abc\0def"));
        assert!(!looks_binary(b"plain text\n"));
        assert!(!looks_binary(b""));
    }

    #[test]
    fn split_long_line_respects_char_boundaries() {
        let pieces = split_long_line("ééééé", 2);
        assert_eq!(pieces, vec!["éé", "éé", "é"]);
    }
}
