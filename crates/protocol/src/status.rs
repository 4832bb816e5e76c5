use crate::{ProtocolError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const INDEX_STATUS_TOOL_NAME: &str = "get-index-status";

const INDEX_STATUS_TOOL_DESCRIPTION: &str =
    "Gets the status of the index (chunk count, collection name) and the background service state.";

/// Input of the status tool. It takes no arguments; unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndexStatusRequest {}

impl IndexStatusRequest {
    /// Accepts `null` or an empty object.
    pub fn parse(args: &Value) -> Result<Self> {
        match args {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(args.clone())
                .map_err(|e| ProtocolError::InvalidInput(e.to_string())),
            other => Err(ProtocolError::InvalidInput(format!(
                "expected an object, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Service state as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ServiceStateLabel {
    Initializing,
    Scanning,
    #[serde(rename = "Processing Initial Queue")]
    ProcessingInitialQueue,
    Watching,
    Idle,
    Stopping,
    Unknown,
}

impl ServiceStateLabel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Scanning => "Scanning",
            Self::ProcessingInitialQueue => "Processing Initial Queue",
            Self::Watching => "Watching",
            Self::Idle => "Idle",
            Self::Stopping => "Stopping",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ServiceStateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined index store + service status.
///
/// `success` tracks the index store read only. The `service*` fields fall back to
/// `Unknown`/`false` when no service status source is wired in.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatusResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub service_state: ServiceStateLabel,
    pub service_initialized: bool,
    pub initial_scan_complete: bool,
    pub service_watching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_in_queue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_files_count: Option<u64>,
    /// Outer `None` omits the field; `Some(None)` serializes as `null` (scan still running).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files_initial_scan: Option<Option<u64>>,
}

impl IndexStatusResult {
    /// Result with no store data and no service data.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            success: false,
            chunk_count: None,
            collection_name: None,
            error: None,
            suggestion: None,
            service_state: ServiceStateLabel::Unknown,
            service_initialized: false,
            initial_scan_complete: false,
            service_watching: false,
            files_in_queue: None,
            processed_files_count: None,
            total_files_initial_scan: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[must_use]
pub fn index_status_tool_descriptor() -> ToolDescriptor {
    let schema = schemars::schema_for!(IndexStatusRequest);
    ToolDescriptor {
        name: INDEX_STATUS_TOOL_NAME.to_string(),
        description: INDEX_STATUS_TOOL_DESCRIPTION.to_string(),
        input_schema: serde_json::to_value(&schema).unwrap_or(Value::Null),
    }
}
