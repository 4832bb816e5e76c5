use ragwatch_protocol::ServiceStateLabel;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the indexing service. `Stopping` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceState {
    Initializing,
    Scanning,
    #[serde(rename = "Processing Initial Queue")]
    ProcessingInitialQueue,
    Watching,
    Idle,
    Stopping,
}

impl ServiceState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Scanning | Self::Stopping)
                | (Self::Scanning, Self::ProcessingInitialQueue | Self::Stopping)
                | (Self::ProcessingInitialQueue, Self::Watching | Self::Stopping)
                | (Self::Watching, Self::Idle | Self::Stopping)
                | (Self::Idle, Self::Watching | Self::Stopping)
        )
    }

    /// Watch phase: the initial scan is behind us
    #[must_use]
    pub const fn is_steady(self) -> bool {
        matches!(self, Self::Watching | Self::Idle)
    }

    #[must_use]
    pub const fn label(self) -> ServiceStateLabel {
        match self {
            Self::Initializing => ServiceStateLabel::Initializing,
            Self::Scanning => ServiceStateLabel::Scanning,
            Self::ProcessingInitialQueue => ServiceStateLabel::ProcessingInitialQueue,
            Self::Watching => ServiceStateLabel::Watching,
            Self::Idle => ServiceStateLabel::Idle,
            Self::Stopping => ServiceStateLabel::Stopping,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().as_str())
    }
}

/// Point-in-time view of the service, published as one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub state: ServiceState,
    pub initialized: bool,
    pub initial_scan_complete: bool,
    pub watching: bool,
    pub files_in_queue: usize,
    pub processed_files_count: u64,
    /// `None` until the initial enumeration has finished
    pub total_files_initial_scan: Option<usize>,
    pub failed_files_count: u64,
    /// Most recent fatal cause (or watcher failure)
    pub last_error: Option<String>,
}

impl ProgressSnapshot {
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            state: ServiceState::Initializing,
            initialized: false,
            initial_scan_complete: false,
            watching: false,
            files_in_queue: 0,
            processed_files_count: 0,
            total_files_initial_scan: None,
            failed_files_count: 0,
            last_error: None,
        }
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

/// Write side of the snapshot channel.
///
/// The orchestrator owns every field except `files_in_queue`, which the queue publishes
/// under its own lock.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl ProgressHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::initial());
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn update(&self, modify: impl FnOnce(&mut ProgressSnapshot)) {
        self.tx.send_modify(modify);
    }

    pub(crate) fn set_files_in_queue(&self, len: usize) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.files_in_queue == len {
                false
            } else {
                snapshot.files_in_queue = len;
                true
            }
        });
    }
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new()
    }
}
