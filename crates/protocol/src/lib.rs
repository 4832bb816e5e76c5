//! # ragwatch protocol
//!
//! Wire types shared between the indexing service and the tooling that reads its status.
//! Only the `get-index-status` contract lives here; transport plumbing is somebody else's job.

mod status;

pub use status::{
    index_status_tool_descriptor, IndexStatusRequest, IndexStatusResult, ServiceStateLabel,
    ToolDescriptor, INDEX_STATUS_TOOL_NAME,
};

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Input validation failed: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compact JSON encoding used for tool payloads.
pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Pretty JSON encoding for humans (CLI output).
pub fn serialize_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
