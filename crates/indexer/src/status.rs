use crate::error::Result;
use crate::state::{ProgressHandle, ProgressSnapshot};
use ragwatch_protocol::{
    index_status_tool_descriptor, IndexStatusRequest, IndexStatusResult, ToolDescriptor,
};
use ragwatch_vector_store::IndexManager;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

pub const STORE_READ_SUGGESTION: &str = "Check vector database configuration and connectivity.";
pub const STORE_MISSING_SUGGESTION: &str =
    "Ensure the indexing service started correctly and passed the index store.";

/// Read-only view of the service progress.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    rx: watch::Receiver<ProgressSnapshot>,
}

impl StatusReporter {
    #[must_use]
    pub fn new(progress: &ProgressHandle) -> Self {
        Self {
            rx: progress.subscribe(),
        }
    }

    #[must_use]
    pub fn get_progress_snapshot(&self) -> ProgressSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the first snapshot satisfying `predicate` (the current one included).
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&ProgressSnapshot) -> bool,
    ) -> ProgressSnapshot {
        let mut rx = self.rx.clone();
        let matched = match rx.wait_for(|snapshot| predicate(snapshot)).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        matched.unwrap_or_else(|| rx.borrow().clone())
    }
}

/// The `get-index-status` tool: index store status merged with service progress.
pub struct IndexStatusTool {
    store: Arc<dyn IndexManager>,
    service: Option<StatusReporter>,
}

impl IndexStatusTool {
    #[must_use]
    pub fn new(store: Arc<dyn IndexManager>, service: Option<StatusReporter>) -> Self {
        Self { store, service }
    }

    #[must_use]
    pub fn descriptor() -> ToolDescriptor {
        index_status_tool_descriptor()
    }

    /// Only a malformed request is an error; store and service problems are data.
    pub async fn execute(&self, args: &Value) -> Result<IndexStatusResult> {
        IndexStatusRequest::parse(args)?;

        let snapshot = self.service.as_ref().map(StatusReporter::get_progress_snapshot);
        let mut result = IndexStatusResult::unknown();

        if self.store.is_initialized() {
            match self.store.get_status().await {
                Ok(status) => {
                    result.success = true;
                    result.chunk_count = Some(status.count as u64);
                    result.collection_name = Some(status.name);
                }
                Err(err) => {
                    log::warn!("Index status read failed: {err}");
                    result.error = Some(err.to_string());
                    result.suggestion = Some(STORE_READ_SUGGESTION.to_string());
                }
            }
        } else {
            let cause = snapshot.as_ref().and_then(|s| s.last_error.as_deref());
            result.error = Some(match cause {
                Some(cause) => format!("Index store is not initialized: {cause}"),
                None => "Index store is not initialized".to_string(),
            });
            result.suggestion = Some(STORE_MISSING_SUGGESTION.to_string());
        }

        if let Some(snapshot) = snapshot {
            merge_service(&mut result, &snapshot);
        }
        Ok(result)
    }
}

fn merge_service(result: &mut IndexStatusResult, snapshot: &ProgressSnapshot) {
    result.service_state = snapshot.state.label();
    result.service_initialized = snapshot.initialized;
    result.initial_scan_complete = snapshot.initial_scan_complete;
    result.service_watching = snapshot.watching;
    result.files_in_queue = Some(snapshot.files_in_queue as u64);
    result.processed_files_count = Some(snapshot.processed_files_count);
    result.total_files_initial_scan = Some(snapshot.total_files_initial_scan.map(|n| n as u64));
}
