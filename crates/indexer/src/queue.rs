use crate::config::ShutdownPolicy;
use crate::error::{IndexerError, Result};
use crate::state::ProgressHandle;
use crate::workspace::WorkspacePath;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Why a path is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    Created,
    Modified,
    Deleted,
    InitialScan,
}

impl ChangeReason {
    /// Merge a new event into a pending one.
    ///
    /// The newest reason wins. Processing re-reads the file, so a stale modify for a path
    /// that is gone again still ends up as a delete.
    #[must_use]
    pub const fn coalesce(_pending: Self, incoming: Self) -> Self {
        incoming
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::InitialScan => "initial_scan",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub path: WorkspacePath,
    pub reason: ChangeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Coalesced {
        previous: ChangeReason,
        merged: ChangeReason,
    },
}

#[derive(Debug, Default)]
struct QueueInner {
    order: VecDeque<WorkspacePath>,
    pending: HashMap<WorkspacePath, ChangeReason>,
    closed: bool,
}

impl QueueInner {
    fn pop_front(&mut self) -> Option<QueueEntry> {
        while let Some(path) = self.order.pop_front() {
            if let Some(reason) = self.pending.remove(&path) {
                return Some(QueueEntry { path, reason });
            }
        }
        None
    }
}

/// Deduplicating FIFO of pending paths.
///
/// One live entry per path; coalesced updates keep the original position. New paths wait
/// once `soft_limit` entries are pending, coalescing never waits.
pub struct ProcessingQueue {
    inner: Mutex<QueueInner>,
    soft_limit: usize,
    item_ready: Notify,
    space_ready: Notify,
    progress: Option<ProgressHandle>,
}

impl ProcessingQueue {
    #[must_use]
    pub fn new(soft_limit: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            soft_limit: soft_limit.max(1),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            progress: None,
        }
    }

    /// Publish the pending count into `progress` on every change.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_len(&self, len: usize) {
        if let Some(progress) = &self.progress {
            progress.set_files_in_queue(len);
        }
    }

    pub async fn enqueue(&self, path: WorkspacePath, reason: ChangeReason) -> Result<EnqueueOutcome> {
        let mut announced_wait = false;
        loop {
            let space = self.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(IndexerError::QueueClosed);
                }
                if let Some(pending) = inner.pending.get_mut(&path) {
                    let previous = *pending;
                    let merged = ChangeReason::coalesce(previous, reason);
                    *pending = merged;
                    log::debug!("Coalesced {path}: {previous} + {reason} -> {merged}");
                    return Ok(EnqueueOutcome::Coalesced { previous, merged });
                }
                if inner.order.len() < self.soft_limit {
                    inner.order.push_back(path.clone());
                    inner.pending.insert(path, reason);
                    self.publish_len(inner.order.len());
                    drop(inner);
                    self.item_ready.notify_one();
                    return Ok(EnqueueOutcome::Queued);
                }
            }

            if !announced_wait {
                log::debug!("Queue at soft limit ({}), waiting to add {path}", self.soft_limit);
                announced_wait = true;
            }
            space.await;
        }
    }

    /// Next entry in arrival order. Waits while empty; `None` once closed and drained.
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        loop {
            let ready = self.item_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(entry) = inner.pop_front() {
                    self.publish_len(inner.order.len());
                    drop(inner);
                    self.space_ready.notify_waiters();
                    return Some(entry);
                }
                if inner.closed {
                    return None;
                }
            }

            ready.await;
        }
    }

    /// Stop accepting entries. Returns how many queued entries were abandoned.
    pub fn close(&self, policy: ShutdownPolicy) -> usize {
        let abandoned = {
            let mut inner = self.lock();
            inner.closed = true;
            let abandoned = match policy {
                ShutdownPolicy::DrainRemaining => 0,
                ShutdownPolicy::AbandonRemaining => {
                    let count = inner.pending.len();
                    inner.order.clear();
                    inner.pending.clear();
                    count
                }
            };
            self.publish_len(inner.order.len());
            abandoned
        };
        self.space_ready.notify_waiters();
        self.item_ready.notify_waiters();
        self.item_ready.notify_one();
        abandoned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }

    /// Pending reason for `path`, if queued
    #[must_use]
    pub fn pending_reason(&self, path: &WorkspacePath) -> Option<ChangeReason> {
        self.lock().pending.get(path).copied()
    }
}

impl fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("len", &self.len())
            .field("soft_limit", &self.soft_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use ChangeReason::*;

    fn path(raw: &str) -> WorkspacePath {
        WorkspacePath::parse(raw).unwrap()
    }

    #[test]
    fn coalescing_table() {
        for pending in [Created, Modified, Deleted, InitialScan] {
            assert_eq!(ChangeReason::coalesce(pending, Deleted), Deleted);
        }
        assert_eq!(ChangeReason::coalesce(Deleted, Created), Created);
        assert_eq!(ChangeReason::coalesce(Deleted, Modified), Modified);
        assert_eq!(ChangeReason::coalesce(Deleted, InitialScan), InitialScan);
        assert_eq!(ChangeReason::coalesce(Created, Modified), Modified);
        assert_eq!(ChangeReason::coalesce(InitialScan, Modified), Modified);
        assert_eq!(ChangeReason::coalesce(Modified, Created), Created);
    }

    #[tokio::test]
    async fn one_live_entry_per_path_in_original_position() {
        let queue = ProcessingQueue::new(16);
        assert_eq!(queue.enqueue(path("a"), Created).await.unwrap(), EnqueueOutcome::Queued);
        queue.enqueue(path("b"), Created).await.unwrap();
        assert_eq!(
            queue.enqueue(path("a"), Modified).await.unwrap(),
            EnqueueOutcome::Coalesced {
                previous: Created,
                merged: Modified
            }
        );
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue().await.unwrap();
        assert_eq!(first, QueueEntry { path: path("a"), reason: Modified });
        assert_eq!(queue.dequeue().await.unwrap().path, path("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn delete_then_recreate_is_queued_as_created() {
        let queue = ProcessingQueue::new(16);
        queue.enqueue(path("x"), Modified).await.unwrap();
        queue.enqueue(path("x"), Deleted).await.unwrap();
        assert_eq!(queue.pending_reason(&path("x")), Some(Deleted));
        queue.enqueue(path("x"), Created).await.unwrap();
        assert_eq!(queue.dequeue().await.unwrap().reason, Created);
    }

    #[tokio::test]
    async fn modify_after_delete_keeps_the_newer_reason() {
        let queue = ProcessingQueue::new(16);
        queue.enqueue(path("x"), Deleted).await.unwrap();
        assert_eq!(
            queue.enqueue(path("x"), Modified).await.unwrap(),
            EnqueueOutcome::Coalesced {
                previous: Deleted,
                merged: Modified
            }
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().await.unwrap().reason, Modified);
    }

    #[tokio::test]
    async fn queue_size_is_published() {
        let progress = ProgressHandle::new();
        let queue = ProcessingQueue::new(16).with_progress(progress.clone());
        queue.enqueue(path("a"), Created).await.unwrap();
        queue.enqueue(path("b"), Created).await.unwrap();
        queue.enqueue(path("b"), Modified).await.unwrap();
        assert_eq!(progress.snapshot().files_in_queue, 2);
        queue.dequeue().await.unwrap();
        assert_eq!(progress.snapshot().files_in_queue, 1);
    }

    #[tokio::test]
    async fn new_paths_wait_at_soft_limit_but_coalescing_does_not() {
        let queue = Arc::new(ProcessingQueue::new(1));
        queue.enqueue(path("a"), Created).await.unwrap();
        queue.enqueue(path("a"), Modified).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(path("b"), Created).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.dequeue().await.unwrap().path, path("a"));
        let outcome = tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Queued);
        assert_eq!(queue.dequeue().await.unwrap().path, path("b"));
    }

    #[tokio::test]
    async fn dequeue_waits_for_work() {
        let queue = Arc::new(ProcessingQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(path("late"), Created).await.unwrap();
        let entry = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.unwrap().path, path("late"));
    }

    #[tokio::test]
    async fn close_wakes_consumers_and_blocked_producers() {
        let queue = Arc::new(ProcessingQueue::new(1));
        queue.enqueue(path("a"), Created).await.unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(path("b"), Created).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(queue.close(ShutdownPolicy::AbandonRemaining), 1);
        let blocked = tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(blocked, Err(IndexerError::QueueClosed)));
        assert_eq!(queue.dequeue().await, None);
        assert!(queue.enqueue(path("c"), Created).await.is_err());
    }

    #[tokio::test]
    async fn drain_policy_hands_out_remaining_entries() {
        let queue = ProcessingQueue::new(4);
        queue.enqueue(path("a"), Created).await.unwrap();
        queue.enqueue(path("b"), Deleted).await.unwrap();

        assert_eq!(queue.close(ShutdownPolicy::DrainRemaining), 0);
        assert_eq!(queue.dequeue().await.unwrap().path, path("a"));
        assert_eq!(queue.dequeue().await.unwrap().path, path("b"));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn closing_an_idle_queue_releases_a_waiting_consumer() {
        let queue = Arc::new(ProcessingQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close(ShutdownPolicy::DrainRemaining);
        let entry = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry, None);
    }
}
