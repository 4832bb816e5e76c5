use crate::config::{IndexerConfig, ShutdownPolicy};
use crate::error::{IndexerError, Result};
use crate::processor::ContentProcessor;
use crate::queue::{ChangeReason, ProcessingQueue, QueueEntry};
use crate::scanner::{FileScanner, PathFilter};
use crate::state::{ProgressHandle, ProgressSnapshot, ServiceState};
use crate::status::StatusReporter;
use crate::watcher::{FileWatcher, WatchContext, WatcherSignal};
use crate::workspace::{WorkspacePath, WorkspaceRoot};
use log::{debug, error, info, warn};
use ragwatch_vector_store::IndexManager;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const WATCHER_SIGNAL_CAPACITY: usize = 4;
const ENUMERATION_CHANNEL_CAPACITY: usize = 256;

enum ServiceCommand {
    Rescan { reason: String },
    Shutdown,
}

/// Final state handed back by [`IndexingService::shutdown`]
#[derive(Debug, Clone)]
pub struct ServiceExit {
    pub snapshot: ProgressSnapshot,
    pub fatal_error: Option<String>,
}

/// Handle to the background indexing service.
///
/// Cloning shares the same service; dropping the last clone requests shutdown.
#[derive(Clone)]
pub struct IndexingService {
    inner: Arc<IndexingServiceInner>,
}

struct IndexingServiceInner {
    command_tx: mpsc::Sender<ServiceCommand>,
    progress: ProgressHandle,
    task: Mutex<Option<JoinHandle<ServiceExit>>>,
    last_exit: Mutex<Option<ServiceExit>>,
    #[cfg(test)]
    watcher_signals: mpsc::Sender<WatcherSignal>,
}

impl IndexingService {
    /// Spawn the orchestrator on the current tokio runtime.
    pub fn start(
        root: WorkspaceRoot,
        config: IndexerConfig,
        store: Arc<dyn IndexManager>,
        processor: Arc<dyn ContentProcessor>,
    ) -> Result<Self> {
        config.validate()?;
        let root = Arc::new(root.with_allow_outside(config.allow_outside_workspace));
        let filter = Arc::new(PathFilter::new(root.path(), &config.exclude_globs)?);
        let scanner = Arc::new(FileScanner::new(root.path()).with_filter(Arc::clone(&filter)));

        let progress = ProgressHandle::new();
        let queue = Arc::new(
            ProcessingQueue::new(config.queue_soft_limit).with_progress(progress.clone()),
        );
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel(WATCHER_SIGNAL_CAPACITY);
        #[cfg(test)]
        let watcher_signals = signal_tx.clone();

        let orchestrator = Orchestrator {
            root,
            config,
            store,
            processor,
            queue,
            filter,
            scanner,
            progress: progress.clone(),
            state: ServiceState::Initializing,
            watcher: None,
            signal_tx,
            signal_rx,
            enumeration: None,
            rescan_timer: None,
            fatal: None,
        };
        let task = tokio::spawn(orchestrator.run(command_rx));

        Ok(Self {
            inner: Arc::new(IndexingServiceInner {
                command_tx,
                progress,
                task: Mutex::new(Some(task)),
                last_exit: Mutex::new(None),
                #[cfg(test)]
                watcher_signals,
            }),
        })
    }

    #[must_use]
    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::new(&self.inner.progress)
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.progress.snapshot()
    }

    /// Re-enumerate the workspace. Only honored once the initial scan is done.
    pub async fn request_rescan(&self, reason: impl Into<String>) -> Result<()> {
        self.inner
            .command_tx
            .send(ServiceCommand::Rescan {
                reason: reason.into(),
            })
            .await
            .map_err(|e| IndexerError::Other(format!("failed to send rescan: {e}")))?;
        Ok(())
    }

    /// Stop the service and wait for it to release its resources. Idempotent.
    pub async fn shutdown(&self) -> Result<ServiceExit> {
        let _ = self.inner.command_tx.send(ServiceCommand::Shutdown).await;

        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let exit = task
                .await
                .map_err(|e| IndexerError::Other(format!("indexing service task failed: {e}")))?;
            *self
                .inner
                .last_exit
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(exit.clone());
            return Ok(exit);
        }

        let previous = self
            .inner
            .last_exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(previous.unwrap_or_else(|| ServiceExit {
            snapshot: self.snapshot(),
            fatal_error: self.snapshot().last_error,
        }))
    }
}

impl Drop for IndexingService {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(ServiceCommand::Shutdown);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EnumerationOutcome {
    discovered: usize,
    purged: usize,
    interrupted: bool,
}

/// Single writer of service state and index mutations.
struct Orchestrator {
    root: Arc<WorkspaceRoot>,
    config: IndexerConfig,
    store: Arc<dyn IndexManager>,
    processor: Arc<dyn ContentProcessor>,
    queue: Arc<ProcessingQueue>,
    filter: Arc<PathFilter>,
    scanner: Arc<FileScanner>,
    progress: ProgressHandle,
    state: ServiceState,
    watcher: Option<FileWatcher>,
    signal_tx: mpsc::Sender<WatcherSignal>,
    signal_rx: mpsc::Receiver<WatcherSignal>,
    enumeration: Option<JoinHandle<EnumerationOutcome>>,
    rescan_timer: Option<Interval>,
    fatal: Option<String>,
}

impl Orchestrator {
    async fn run(mut self, mut commands: mpsc::Receiver<ServiceCommand>) -> ServiceExit {
        info!("Starting indexing service for {}", self.root.path().display());

        match self.store.initialize().await {
            Ok(()) => {
                self.transition_with(ServiceState::Scanning, |s| s.initialized = true);
                self.start_enumeration(ChangeReason::InitialScan).await;
            }
            Err(err) => self.fail(format!("index store initialization failed: {err}")),
        }

        let queue = Arc::clone(&self.queue);
        while self.fatal.is_none() {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(ServiceCommand::Rescan { reason }) => self.on_rescan_request(&reason).await,
                    Some(ServiceCommand::Shutdown) | None => break,
                },
                Some(signal) = self.signal_rx.recv() => self.on_watcher_signal(signal).await,
                outcome = join_enumeration(&mut self.enumeration), if self.enumeration.is_some() => {
                    self.enumeration = None;
                    self.on_enumeration_finished(outcome);
                }
                () = tick(&mut self.rescan_timer), if self.rescan_timer.is_some() => {
                    self.start_rescan("periodic").await;
                }
                entry = queue.dequeue() => match entry {
                    Some(entry) => self.handle_entry(entry).await,
                    None => break,
                },
            }

            if self.fatal.is_none() {
                self.settle();
            }
        }

        self.stop().await
    }

    fn transition(&mut self, next: ServiceState) {
        self.transition_with(next, |_| {});
    }

    /// Change state and apply `also` in the same published update.
    fn transition_with(&mut self, next: ServiceState, also: impl FnOnce(&mut ProgressSnapshot)) {
        if self.state != next && !self.state.can_transition_to(next) {
            error!("Refusing illegal state transition {} -> {next}", self.state);
            return;
        }
        if self.state != next {
            info!("Indexing service: {} -> {next}", self.state);
            self.state = next;
        }
        self.progress.update(|s| {
            s.state = next;
            also(s);
        });
    }

    fn fail(&mut self, cause: String) {
        error!("Indexing service stopping: {cause}");
        self.progress.update(|s| s.last_error = Some(cause.clone()));
        self.fatal = Some(cause);
    }

    /// Move out of the initial phase once both enumeration and queue are done.
    fn settle(&mut self) {
        if self.state == ServiceState::ProcessingInitialQueue
            && self.enumeration.is_none()
            && self.queue.is_empty()
        {
            self.enter_watch_phase();
        }
    }

    fn enter_watch_phase(&mut self) {
        if !self.config.watch {
            info!("File watching disabled by configuration");
            self.transition_with(ServiceState::Watching, |s| s.initial_scan_complete = true);
            self.transition(ServiceState::Idle);
            self.arm_rescan_timer();
            return;
        }

        let ctx = WatchContext {
            root: Arc::clone(&self.root),
            filter: Arc::clone(&self.filter),
            scanner: Arc::clone(&self.scanner),
            queue: Arc::clone(&self.queue),
            poll_interval: self.config.notify_poll_interval(),
            force_polling: self.config.force_polling,
            signals: self.signal_tx.clone(),
        };
        match FileWatcher::start(ctx) {
            Ok(watcher) => {
                self.watcher = Some(watcher);
                self.transition_with(ServiceState::Watching, |s| {
                    s.initial_scan_complete = true;
                    s.watching = true;
                });
                info!("Watching {} for changes", self.root.path().display());
            }
            Err(err) => {
                self.transition_with(ServiceState::Watching, |s| s.initial_scan_complete = true);
                self.watcher_down(&err.to_string());
            }
        }
    }

    async fn on_watcher_signal(&mut self, signal: WatcherSignal) {
        if self.watcher.is_none() {
            debug!("Ignoring {signal:?} from a stopped watcher");
            return;
        }
        match signal {
            WatcherSignal::Overflow => self.start_rescan("watcher overflow").await,
            WatcherSignal::Failed(message) => {
                self.watcher_down(&message);
                // events may have been lost before the failure surfaced
                self.start_rescan("watcher failure").await;
            }
        }
    }

    fn watcher_down(&mut self, message: &str) {
        warn!("File watcher unavailable: {message}");
        self.watcher = None;
        let cause = format!("file watcher failed: {message}");
        let mark_down = move |s: &mut ProgressSnapshot| {
            s.watching = false;
            s.last_error = Some(cause);
        };
        if self.state == ServiceState::Watching {
            self.transition_with(ServiceState::Idle, mark_down);
        } else {
            self.progress.update(mark_down);
        }
        self.arm_rescan_timer();
    }

    fn arm_rescan_timer(&mut self) {
        if self.rescan_timer.is_some() {
            return;
        }
        if let Some(period) = self.config.rescan_interval() {
            info!("Falling back to periodic rescans every {}s", period.as_secs());
            let mut timer = time::interval_at(time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.rescan_timer = Some(timer);
        }
    }

    async fn on_rescan_request(&mut self, reason: &str) {
        if !self.state.is_steady() {
            info!("Ignoring rescan request ({reason}) during {}", self.state);
            return;
        }
        self.start_rescan(reason).await;
    }

    async fn start_rescan(&mut self, reason: &str) {
        if self.enumeration.is_some() {
            debug!("Rescan ({reason}) skipped: enumeration already running");
            return;
        }
        info!("Rescanning workspace ({reason})");
        self.start_enumeration(ChangeReason::Modified).await;
    }

    async fn start_enumeration(&mut self, reason: ChangeReason) {
        let known = match self.store.indexed_paths().await {
            Ok(paths) => paths.into_iter().collect::<BTreeSet<String>>(),
            Err(err) if err.is_fatal() => {
                self.fail(format!("cannot list indexed paths: {err}"));
                return;
            }
            Err(err) => {
                warn!("Cannot list indexed paths, skipping stale purge: {err}");
                BTreeSet::new()
            }
        };
        self.enumeration = Some(spawn_enumeration(
            Arc::clone(&self.scanner),
            Arc::clone(&self.root),
            Arc::clone(&self.queue),
            reason,
            known,
        ));
    }

    fn on_enumeration_finished(&mut self, outcome: EnumerationOutcome) {
        if outcome.interrupted {
            warn!("Workspace enumeration was interrupted");
        }
        if self.state == ServiceState::Scanning {
            info!(
                "Initial scan found {} files ({} stale index entries)",
                outcome.discovered, outcome.purged
            );
            self.transition_with(ServiceState::ProcessingInitialQueue, |s| {
                s.total_files_initial_scan = Some(outcome.discovered);
            });
        } else {
            info!(
                "Rescan found {} files ({} stale index entries)",
                outcome.discovered, outcome.purged
            );
        }
    }

    async fn handle_entry(&mut self, entry: QueueEntry) {
        if self.state == ServiceState::Idle {
            self.transition(ServiceState::Watching);
        }

        let started = Instant::now();
        let result = self.process_with_retries(&entry).await;
        let failed = result.is_err();
        self.progress.update(|s| {
            s.processed_files_count += 1;
            if failed {
                s.failed_files_count += 1;
            }
        });

        match result {
            Ok(()) => debug!(
                "Processed {} ({}) in {}ms",
                entry.path,
                entry.reason,
                started.elapsed().as_millis()
            ),
            Err(err) if err.is_fatal() => {
                self.fail(format!("index store failure while processing {}: {err}", entry.path));
                return;
            }
            Err(err) => warn!("Failed to index {} ({}): {err}", entry.path, entry.reason),
        }

        if self.state == ServiceState::Watching && self.queue.is_empty() {
            self.transition(ServiceState::Idle);
        }
    }

    async fn process_with_retries(&self, entry: &QueueEntry) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.process_entry(entry).await {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_fatal() && attempt < self.config.max_file_retries => {
                    attempt += 1;
                    debug!("Retrying {} (attempt {attempt}): {err}", entry.path);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn process_entry(&self, entry: &QueueEntry) -> Result<()> {
        if entry.reason == ChangeReason::Deleted {
            return self.remove_path(&entry.path).await;
        }

        let absolute = self.root.absolute(&entry.path);
        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return self.remove_path(&entry.path).await;
            }
            Err(err) => return Err(err.into()),
        };
        if metadata.is_dir() {
            return Ok(());
        }
        if metadata.len() > self.config.max_file_size_bytes {
            debug!(
                "{} exceeds {} bytes, indexing no chunks",
                entry.path, self.config.max_file_size_bytes
            );
            self.store.upsert_chunks(entry.path.as_str(), Vec::new()).await?;
            return Ok(());
        }

        let content = match tokio::fs::read(&absolute).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return self.remove_path(&entry.path).await;
            }
            Err(err) => return Err(err.into()),
        };
        let chunks = self.processor.process(&entry.path, &content).await?;
        let committed = self.store.upsert_chunks(entry.path.as_str(), chunks).await?;
        debug!("Committed {committed} chunks for {}", entry.path);
        Ok(())
    }

    /// Drop a path's chunks; a path with none may be a removed directory.
    async fn remove_path(&self, path: &WorkspacePath) -> Result<()> {
        let removed = self.store.delete_chunks(path.as_str()).await?;
        if removed > 0 {
            debug!("Removed {removed} chunks for {path}");
            return Ok(());
        }

        let prefix = format!("{}/", path.as_str());
        for indexed in self.store.indexed_paths().await? {
            if indexed.starts_with(&prefix) {
                let removed = self.store.delete_chunks(&indexed).await?;
                debug!("Removed {removed} chunks for {indexed} (parent {path} deleted)");
            }
        }
        Ok(())
    }

    async fn stop(mut self) -> ServiceExit {
        self.transition_with(ServiceState::Stopping, |s| s.watching = false);

        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(enumeration) = self.enumeration.take() {
            enumeration.abort();
        }
        self.rescan_timer = None;

        let policy = if self.fatal.is_some() {
            ShutdownPolicy::AbandonRemaining
        } else {
            self.config.shutdown_policy
        };
        let abandoned = self.queue.close(policy);
        if abandoned > 0 {
            info!("Abandoned {abandoned} queued entries");
        }
        if policy == ShutdownPolicy::DrainRemaining {
            while let Some(entry) = self.queue.dequeue().await {
                self.handle_entry(entry).await;
                if self.fatal.is_some() {
                    self.queue.close(ShutdownPolicy::AbandonRemaining);
                    break;
                }
            }
        }

        if let Err(err) = self.store.close().await {
            error!("Failed to close index store: {err}");
            if self.fatal.is_none() {
                let cause = format!("index store close failed: {err}");
                self.progress.update(|s| s.last_error = Some(cause));
            }
        }

        let snapshot = self.progress.snapshot();
        info!(
            "Indexing service stopped ({} processed, {} failed)",
            snapshot.processed_files_count, snapshot.failed_files_count
        );
        ServiceExit {
            snapshot,
            fatal_error: self.fatal,
        }
    }
}

async fn join_enumeration(handle: &mut Option<JoinHandle<EnumerationOutcome>>) -> EnumerationOutcome {
    let Some(handle) = handle.as_mut() else {
        return std::future::pending().await;
    };
    match handle.await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Workspace enumeration task failed: {err}");
            EnumerationOutcome {
                discovered: 0,
                purged: 0,
                interrupted: true,
            }
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer.as_mut() {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Walk on a blocking thread, enqueue as paths arrive, then purge what disappeared.
fn spawn_enumeration(
    scanner: Arc<FileScanner>,
    root: Arc<WorkspaceRoot>,
    queue: Arc<ProcessingQueue>,
    reason: ChangeReason,
    known: BTreeSet<String>,
) -> JoinHandle<EnumerationOutcome> {
    tokio::spawn(async move {
        let (path_tx, mut path_rx) = mpsc::channel::<PathBuf>(ENUMERATION_CHANNEL_CAPACITY);
        let walk_root = root.path().to_path_buf();
        let walker = tokio::task::spawn_blocking(move || {
            scanner.walk(&walk_root, |path| path_tx.blocking_send(path).is_ok());
        });

        let mut discovered = BTreeSet::new();
        let mut outcome = EnumerationOutcome {
            discovered: 0,
            purged: 0,
            interrupted: false,
        };

        while let Some(absolute) = path_rx.recv().await {
            let path = match root.relativize(&absolute) {
                Ok(path) => path,
                Err(err) => {
                    debug!("Skipping {}: {err}", absolute.display());
                    continue;
                }
            };
            discovered.insert(path.as_str().to_string());
            if queue.enqueue(path, reason).await.is_err() {
                outcome.interrupted = true;
                break;
            }
        }
        drop(path_rx);
        if let Err(err) = walker.await {
            warn!("Workspace walk failed: {err}");
            outcome.interrupted = true;
        }
        outcome.discovered = discovered.len();
        if outcome.interrupted {
            return outcome;
        }

        for stale in known.difference(&discovered) {
            let path = match WorkspacePath::parse(stale) {
                Ok(path) => path,
                Err(err) => {
                    warn!("Indexed path {stale} is not a workspace path: {err}");
                    continue;
                }
            };
            // outside files are never enumerated; keep them unless they vanished
            if path.is_outside() && root.absolute(&path).exists() {
                continue;
            }
            if queue.enqueue(path, ChangeReason::Deleted).await.is_err() {
                outcome.interrupted = true;
                break;
            }
            outcome.purged += 1;
        }
        outcome
    })
}
