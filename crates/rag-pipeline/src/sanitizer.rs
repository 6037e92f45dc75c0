//! Startup reconciliation between the `processing_progress` table and the
//! `documents` table, run once after schema creation and before new work
//! is admitted.

use rag_queue::{IndexingQueue, Priority};
use rag_store::{ProgressTracker, VectorStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SanitizerConfig {
  /// Gate for orphan repair; resuming incomplete files always runs.
  pub auto_repair_orphans: bool,
}

impl Default for SanitizerConfig {
  fn default() -> Self {
    Self { auto_repair_orphans: true }
  }
}

pub struct Sanitizer {
  progress: Arc<ProgressTracker>,
  store: Arc<VectorStore>,
  queue: Arc<IndexingQueue>,
  config: SanitizerConfig,
}

impl Sanitizer {
  pub fn new(progress: Arc<ProgressTracker>, store: Arc<VectorStore>, queue: Arc<IndexingQueue>, config: SanitizerConfig) -> Self {
    Self { progress, store, queue, config }
  }

  /// Runs both phases, returning the counts enqueued for each.
  pub async fn sanitize(&self) -> rag_store::connection::Result<SanitizeReport> {
    let resumed = self.resume_incomplete().await?;
    let repaired = if self.config.auto_repair_orphans { self.repair_orphans().await? } else { 0 };
    Ok(SanitizeReport { resumed, repaired })
  }

  /// Re-enqueues every row still `in_progress` at `HIGH` priority, provided
  /// the file still exists on disk. A row whose file vanished is left for
  /// a human or a later cleanup pass; re-queuing it would just fail again.
  async fn resume_incomplete(&self) -> rag_store::connection::Result<usize> {
    let incomplete = self.progress.get_incomplete_files().await?;
    let mut resumed = 0;
    for row in incomplete {
      if !Path::new(&row.file_path).exists() {
        warn!(path = %row.file_path, "incomplete file no longer exists, skipping resume");
        continue;
      }
      match self.queue.add(row.file_path.clone().into(), Priority::High, false) {
        Ok(true) => resumed += 1,
        Ok(false) => {}
        Err(e) => warn!(path = %row.file_path, error = %e, "failed to re-enqueue incomplete file"),
      }
    }
    if resumed > 0 {
      info!(resumed, "sanitizer resumed incomplete files");
    }
    Ok(resumed)
  }

  /// An orphan is a `completed` progress row with no matching `documents`
  /// row — the store lost the document (e.g. a crash mid-replace before
  /// this crate's atomic-replace ordering was in place, or manual table
  /// surgery). Re-enqueues it at `HIGH` priority to rebuild the document.
  ///
  /// Public so the maintenance API can trigger an orphan sweep on demand,
  /// independent of the startup `sanitize()` pass.
  pub async fn repair_orphans(&self) -> rag_store::connection::Result<usize> {
    let completed = self.progress.get_completed_files().await?;
    let mut repaired = 0;
    for row in completed {
      let exists = self.store.find_document_by_source(&row.file_path).await?.is_some();
      if exists {
        continue;
      }
      if !Path::new(&row.file_path).exists() {
        // Neither the document row nor the file itself exist; nothing to
        // repair, just drop the stale progress row.
        let _ = self.progress.delete(&row.file_path).await;
        continue;
      }
      match self.queue.add(row.file_path.clone().into(), Priority::High, false) {
        Ok(true) => repaired += 1,
        Ok(false) => {}
        Err(e) => warn!(path = %row.file_path, error = %e, "failed to re-enqueue orphaned file"),
      }
    }
    if repaired > 0 {
      info!(repaired, "sanitizer repaired orphaned documents");
    }
    Ok(repaired)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizeReport {
  pub resumed: usize,
  pub repaired: usize,
}
