//! Priority work queue feeding the indexing pipeline, with in-flight
//! dedup so the same path is never queued twice while it is already
//! pending or being processed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum QueueError {
  #[error("queue is closed")]
  Closed,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Urgency ordering for queued work; `Urgent` drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
  Urgent = 0,
  High = 1,
  Normal = 2,
  Low = 3,
}

impl std::str::FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "urgent" => Ok(Priority::Urgent),
      "high" => Ok(Priority::High),
      "normal" => Ok(Priority::Normal),
      "low" => Ok(Priority::Low),
      other => Err(format!("unknown priority: {other}")),
    }
  }
}

/// A single unit of work: index (or reindex) the file at `path`.
#[derive(Debug, Clone)]
pub struct QueueItem {
  pub priority: Priority,
  pub path: PathBuf,
  /// Bypass the unchanged-content skip in the pipeline, not the in-flight
  /// dedup here — a forced reindex of a path already queued still merges
  /// into the existing entry.
  pub force: bool,
  sequence: u64,
}

impl PartialEq for QueueItem {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority && self.sequence == other.sequence
  }
}
impl Eq for QueueItem {}

impl Ord for QueueItem {
  fn cmp(&self, other: &Self) -> Ordering {
    // BinaryHeap is a max-heap; we want lower Priority values (Urgent=0) and
    // lower sequence numbers (older) to come out first, so reverse both.
    other.priority.cmp(&self.priority).then_with(|| other.sequence.cmp(&self.sequence))
  }
}
impl PartialOrd for QueueItem {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

struct Inner {
  heap: BinaryHeap<QueueItem>,
  queued_paths: HashSet<PathBuf>,
  paused: bool,
  closed: bool,
}

/// Priority queue of pending files with in-flight dedup by path.
pub struct IndexingQueue {
  inner: Mutex<Inner>,
  notify: Notify,
  sequence: AtomicU64,
}

impl Default for IndexingQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl IndexingQueue {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner { heap: BinaryHeap::new(), queued_paths: HashSet::new(), paused: false, closed: false }),
      notify: Notify::new(),
      sequence: AtomicU64::new(0),
    }
  }

  /// Add a path at the given priority. A path already queued or in flight
  /// is a no-op — the existing entry's priority is not upgraded, matching
  /// the original implementation's simple membership check.
  pub fn add(&self, path: PathBuf, priority: Priority, force: bool) -> Result<bool> {
    let mut inner = self.inner.lock().unwrap();
    if inner.closed {
      return Err(QueueError::Closed);
    }
    if inner.queued_paths.contains(&path) {
      return Ok(false);
    }
    let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
    inner.queued_paths.insert(path.clone());
    inner.heap.push(QueueItem { priority, path, force, sequence });
    drop(inner);
    self.notify.notify_one();
    Ok(true)
  }

  pub fn add_many(&self, paths: impl IntoIterator<Item = PathBuf>, priority: Priority) -> Result<usize> {
    let mut added = 0;
    for path in paths {
      if self.add(path, priority, false)? {
        added += 1;
      }
    }
    Ok(added)
  }

  /// Pop the highest-priority item, waiting up to `timeout` for work to
  /// arrive if the queue is empty or paused. The path stays in the
  /// in-flight set until [`Self::mark_complete`] is called.
  pub async fn get(&self, timeout: Duration) -> Result<Option<QueueItem>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
          return Err(QueueError::Closed);
        }
        if !inner.paused && !inner.heap.is_empty() {
          drop(inner);
          let mut inner = self.inner.lock().unwrap();
          if let Some(item) = inner.heap.pop() {
            return Ok(Some(item));
          }
          continue;
        }
      }
      let now = tokio::time::Instant::now();
      if now >= deadline {
        return Ok(None);
      }
      tokio::select! {
        _ = self.notify.notified() => {}
        _ = tokio::time::sleep(deadline - now) => return Ok(None),
      }
    }
  }

  /// Release a path from the in-flight set, regardless of whether the
  /// processing that dequeued it succeeded, failed, or was rejected — the
  /// caller must call this exactly once per successful [`Self::get`].
  pub fn mark_complete(&self, path: &std::path::Path) {
    self.inner.lock().unwrap().queued_paths.remove(path);
  }

  pub fn pause(&self) {
    self.inner.lock().unwrap().paused = true;
  }

  pub fn resume(&self) {
    self.inner.lock().unwrap().paused = false;
    self.notify.notify_waiters();
  }

  pub fn is_paused(&self) -> bool {
    self.inner.lock().unwrap().paused
  }

  pub fn size(&self) -> usize {
    self.inner.lock().unwrap().heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  pub fn clear(&self) {
    let mut inner = self.inner.lock().unwrap();
    inner.heap.clear();
    inner.queued_paths.clear();
  }

  pub fn close(&self) {
    self.inner.lock().unwrap().closed = true;
    self.notify.notify_waiters();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn urgent_drains_before_normal() {
    let queue = IndexingQueue::new();
    queue.add(PathBuf::from("normal.md"), Priority::Normal, false).unwrap();
    queue.add(PathBuf::from("urgent.md"), Priority::Urgent, false).unwrap();

    let first = queue.get(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(first.path, PathBuf::from("urgent.md"));
  }

  #[tokio::test]
  async fn same_priority_is_fifo() {
    let queue = IndexingQueue::new();
    queue.add(PathBuf::from("a.md"), Priority::Normal, false).unwrap();
    queue.add(PathBuf::from("b.md"), Priority::Normal, false).unwrap();

    let first = queue.get(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(first.path, PathBuf::from("a.md"));
  }

  #[tokio::test]
  async fn duplicate_path_is_not_requeued_while_in_flight() {
    let queue = IndexingQueue::new();
    assert!(queue.add(PathBuf::from("a.md"), Priority::Normal, false).unwrap());
    assert!(!queue.add(PathBuf::from("a.md"), Priority::High, false).unwrap());
    assert_eq!(queue.size(), 1);

    let item = queue.get(Duration::from_millis(50)).await.unwrap().unwrap();
    assert!(queue.is_empty());

    // still in-flight: re-adding before mark_complete is a no-op
    assert!(!queue.add(PathBuf::from("a.md"), Priority::Urgent, false).unwrap());

    queue.mark_complete(&item.path);
    assert!(queue.add(PathBuf::from("a.md"), Priority::Urgent, false).unwrap());
  }

  #[tokio::test]
  async fn paused_queue_blocks_until_timeout() {
    let queue = IndexingQueue::new();
    queue.add(PathBuf::from("a.md"), Priority::Normal, false).unwrap();
    queue.pause();
    let result = queue.get(Duration::from_millis(30)).await.unwrap();
    assert!(result.is_none());
  }

  #[tokio::test]
  async fn resume_wakes_a_waiting_getter() {
    let queue = std::sync::Arc::new(IndexingQueue::new());
    queue.pause();
    queue.add(PathBuf::from("a.md"), Priority::Normal, false).unwrap();

    let q2 = queue.clone();
    let handle = tokio::spawn(async move { q2.get(Duration::from_secs(2)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.resume();

    let result = handle.await.unwrap().unwrap();
    assert!(result.is_some());
  }

  #[tokio::test]
  async fn closed_queue_rejects_add_and_get() {
    let queue = IndexingQueue::new();
    queue.close();
    assert!(matches!(queue.add(PathBuf::from("a.md"), Priority::Normal, false), Err(QueueError::Closed)));
    assert!(matches!(queue.get(Duration::from_millis(10)).await, Err(QueueError::Closed)));
  }
}
