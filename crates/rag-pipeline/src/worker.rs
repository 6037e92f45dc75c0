//! Routes items from the [`IndexingQueue`] into the [`PipelineCoordinator`].
//! A single background task; per-item errors are logged and do not stop
//! the loop.

use crate::coordinator::{Item, PipelineCoordinator};
use rag_queue::IndexingQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Background loop draining the queue into the pipeline.
pub struct IndexingWorker {
  running: Arc<AtomicBool>,
  handle: Option<JoinHandle<()>>,
}

impl IndexingWorker {
  pub fn start(queue: Arc<IndexingQueue>, coordinator: Arc<PipelineCoordinator>) -> Self {
    let running = Arc::new(AtomicBool::new(true));
    let loop_running = running.clone();
    let handle = tokio::spawn(async move {
      info!("indexing worker started");
      while loop_running.load(Ordering::Relaxed) {
        match queue.get(POLL_TIMEOUT).await {
          Ok(Some(item)) => {
            coordinator.add_file(Item { path: item.path, force: item.force }).await;
          }
          Ok(None) => {}
          Err(e) => {
            error!(error = %e, "indexing worker: queue error, stopping");
            break;
          }
        }
      }
      debug!("indexing worker stopped");
    });
    Self { running, handle: Some(handle) }
  }

  pub async fn stop(&mut self) {
    self.running.store(false, Ordering::Relaxed);
    if let Some(handle) = self.handle.take() {
      let _ = handle.await;
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Relaxed)
  }
}
