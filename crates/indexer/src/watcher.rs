use crate::error::{IndexerError, Result};
use crate::queue::{ChangeReason, ProcessingQueue};
use crate::scanner::{FileScanner, PathFilter};
use crate::workspace::WorkspaceRoot;
use log::{debug, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, ErrorKind as NotifyErrorKind, Event, EventKind, PollWatcher,
    RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Reported to the orchestrator when notifications can no longer be trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatcherSignal {
    /// The backend dropped events (queue overflow); the watcher is still live
    Overflow,
    /// The backend stopped working; the watcher is dead
    Failed(String),
}

/// What the watcher needs to turn notifications into queue entries
#[derive(Clone)]
pub(crate) struct WatchContext {
    pub root: Arc<WorkspaceRoot>,
    pub filter: Arc<PathFilter>,
    pub scanner: Arc<FileScanner>,
    pub queue: Arc<ProcessingQueue>,
    pub poll_interval: Duration,
    pub force_polling: bool,
    pub signals: mpsc::Sender<WatcherSignal>,
}

/// Live file-system subscription. Dropping it stops event delivery.
pub struct FileWatcher {
    _watcher: Box<dyn Watcher + Send + Sync>,
    pump: JoinHandle<()>,
}

impl FileWatcher {
    pub(crate) fn start(ctx: WatchContext) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = create_fs_watcher(
            ctx.root.path(),
            event_tx,
            ctx.poll_interval,
            ctx.force_polling,
        )?;
        let pump = tokio::spawn(pump_events(ctx, event_rx));
        Ok(Self {
            _watcher: watcher,
            pump,
        })
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn create_fs_watcher(
    root: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
    force_polling: bool,
) -> Result<Box<dyn Watcher + Send + Sync>> {
    let root = root.to_path_buf();
    let handler = move |res: notify::Result<Event>| {
        let _ = sender.blocking_send(res);
    };
    let config = NotifyConfig::default().with_poll_interval(poll_interval);
    let mut watcher: Box<dyn Watcher + Send + Sync> = if force_polling {
        Box::new(PollWatcher::new(handler, config).map_err(watcher_init_error)?)
    } else {
        Box::new(RecommendedWatcher::new(handler, config).map_err(watcher_init_error)?)
    };
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| IndexerError::Watcher(format!("failed to watch {}: {e}", root.display())))?;
    Ok(watcher)
}

fn watcher_init_error(err: notify::Error) -> IndexerError {
    IndexerError::Watcher(format!("watcher init failed: {err}"))
}

/// Errors about one path that vanished or cannot be read; the backend keeps running.
fn is_transient(err: &notify::Error) -> bool {
    match &err.kind {
        NotifyErrorKind::PathNotFound | NotifyErrorKind::WatchNotFound => true,
        NotifyErrorKind::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
        ),
        _ => false,
    }
}

/// A change seen by the watcher, before workspace filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FsChange {
    File(PathBuf, ChangeReason),
    /// A directory appeared (created or moved in); its files must be enumerated
    Directory(PathBuf),
}

pub(crate) fn classify_event(event: &Event) -> Vec<FsChange> {
    let appeared = |path: &PathBuf| {
        if path.is_dir() {
            FsChange::Directory(path.clone())
        } else {
            FsChange::File(path.clone(), ChangeReason::Created)
        }
    };
    let gone = |path: &PathBuf| FsChange::File(path.clone(), ChangeReason::Deleted);

    match &event.kind {
        EventKind::Create(_) => event.paths.iter().map(appeared).collect(),
        EventKind::Remove(_) => event.paths.iter().map(gone).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(gone).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(appeared).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            vec![gone(&event.paths[0]), appeared(&event.paths[1])]
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| if path.exists() { appeared(path) } else { gone(path) })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .map(|path| FsChange::File(path.clone(), ChangeReason::Modified))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

async fn pump_events(ctx: WatchContext, mut event_rx: mpsc::Receiver<notify::Result<Event>>) {
    while let Some(event) = event_rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) if is_transient(&err) => {
                debug!("File watcher error for {:?}: {err}", err.paths);
                continue;
            }
            Err(err) => {
                warn!("File watcher failed: {err}");
                let _ = ctx.signals.send(WatcherSignal::Failed(err.to_string())).await;
                return;
            }
        };
        if event.need_rescan() {
            warn!("File watcher dropped events; requesting a rescan");
            if ctx.signals.send(WatcherSignal::Overflow).await.is_err() {
                return;
            }
            continue;
        }

        for change in classify_event(&event) {
            let delivered = match change {
                FsChange::File(path, reason) => enqueue_file(&ctx, &path, reason).await,
                FsChange::Directory(dir) => enqueue_directory(&ctx, dir).await,
            };
            if !delivered {
                debug!("Processing queue closed; watcher pump exiting");
                return;
            }
        }
    }
}

/// Returns `false` once the queue is closed.
async fn enqueue_file(ctx: &WatchContext, path: &Path, reason: ChangeReason) -> bool {
    let relative = match ctx.root.relativize(path) {
        Ok(relative) => relative,
        Err(err) => {
            debug!("Ignoring event outside workspace: {err}");
            return true;
        }
    };
    if !ctx.filter.allows(&relative, false) {
        return true;
    }
    debug!("Watcher: {relative} {reason}");
    !matches!(
        ctx.queue.enqueue(relative, reason).await,
        Err(IndexerError::QueueClosed)
    )
}

async fn enqueue_directory(ctx: &WatchContext, dir: PathBuf) -> bool {
    if let Ok(relative) = ctx.root.relativize(&dir) {
        if !ctx.filter.allows(&relative, true) {
            return true;
        }
    }

    let scanner = Arc::clone(&ctx.scanner);
    let files = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        scanner.walk(&dir, |path| {
            files.push(path);
            true
        });
        files
    })
    .await
    .unwrap_or_default();

    for file in files {
        if !enqueue_file(ctx, &file, ChangeReason::Created).await {
            return false;
        }
    }
    true
}
