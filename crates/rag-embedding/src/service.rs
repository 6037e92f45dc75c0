//! Batches and throttles calls into an [`EmbeddingProvider`], bounding how
//! much work can be in flight at once so a slow or rate-limited provider
//! applies backpressure to the pipeline's embed stage instead of letting
//! an unbounded number of requests pile up.

use crate::{EmbeddingError, EmbeddingProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A chunk of text paired with an opaque id the caller uses to match the
/// resulting vector back up.
#[derive(Debug, Clone)]
pub struct EmbedRequest<Id> {
  pub id: Id,
  pub text: String,
}

#[derive(Debug, Clone)]
pub struct EmbedResult<Id> {
  pub id: Id,
  pub vector: Vec<f32>,
}

/// A request that could not be embedded, carried alongside the batch result
/// so the pipeline can route it to `ProgressTracker::mark_failed` without
/// losing the rest of the batch.
#[derive(Debug)]
pub struct EmbedFailure<Id> {
  pub id: Id,
  pub error: EmbeddingError,
}

pub struct EmbeddingService {
  provider: Arc<dyn EmbeddingProvider>,
  /// Bounds how many embed requests are outstanding at once; acquiring a
  /// permit is the throttle, mirroring the original's pending-future cap.
  inflight: Arc<Semaphore>,
  batch_size: usize,
  completed: AtomicUsize,
  failed: AtomicUsize,
}

impl EmbeddingService {
  pub fn new(provider: Arc<dyn EmbeddingProvider>, max_pending: usize, batch_size: usize) -> Self {
    Self {
      provider,
      inflight: Arc::new(Semaphore::new(max_pending.max(1))),
      batch_size: batch_size.max(1),
      completed: AtomicUsize::new(0),
      failed: AtomicUsize::new(0),
    }
  }

  pub fn dimensions(&self) -> usize {
    self.provider.dimensions()
  }

  /// Embed a batch of chunks, returning successes and failures split apart
  /// so the caller can store one and record the other without a partial
  /// failure aborting the whole batch.
  pub async fn embed_all<Id: Clone + Send + 'static>(
    &self,
    requests: Vec<EmbedRequest<Id>>,
  ) -> (Vec<EmbedResult<Id>>, Vec<EmbedFailure<Id>>) {
    let mut successes = Vec::with_capacity(requests.len());
    let mut failures = Vec::new();

    for batch in requests.chunks(self.batch_size) {
      let _permit = self.inflight.acquire().await.expect("semaphore not closed");
      let texts: Vec<&str> = batch.iter().map(|r| r.text.as_str()).collect();
      debug!(batch_len = batch.len(), "embedding batch");

      match self.provider.embed_batch(&texts).await {
        Ok(vectors) => {
          self.completed.fetch_add(batch.len(), Ordering::Relaxed);
          for (request, vector) in batch.iter().zip(vectors) {
            successes.push(EmbedResult { id: request.id.clone(), vector });
          }
        }
        Err(err) => {
          // A batch-level failure is reported per-item so the caller can
          // mark each file failed individually rather than losing the
          // whole batch's provenance.
          warn!(error = %err, batch_len = batch.len(), "embedding batch failed");
          self.failed.fetch_add(batch.len(), Ordering::Relaxed);
          for request in batch {
            failures.push(EmbedFailure { id: request.id.clone(), error: clone_error(&err) });
          }
        }
      }
    }

    (successes, failures)
  }

  pub fn completed_count(&self) -> usize {
    self.completed.load(Ordering::Relaxed)
  }

  pub fn failed_count(&self) -> usize {
    self.failed.load(Ordering::Relaxed)
  }
}

fn clone_error(err: &EmbeddingError) -> EmbeddingError {
  match err {
    EmbeddingError::NotAvailable => EmbeddingError::NotAvailable,
    EmbeddingError::Timeout => EmbeddingError::Timeout,
    EmbeddingError::ProviderError(s) => EmbeddingError::ProviderError(s.clone()),
    EmbeddingError::Network(s) => EmbeddingError::Network(s.clone()),
    EmbeddingError::Request(_) => EmbeddingError::ProviderError(err.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::sync::atomic::AtomicBool;

  struct StubProvider {
    dim: usize,
    fail: AtomicBool,
  }

  #[async_trait]
  impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
      "stub"
    }
    fn model_id(&self) -> &str {
      "stub-model"
    }
    fn dimensions(&self) -> usize {
      self.dim
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
      Ok(vec![0.0; self.dim])
    }
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      if self.fail.load(Ordering::Relaxed) {
        return Err(EmbeddingError::ProviderError("boom".into()));
      }
      Ok(texts.iter().map(|_| vec![1.0; self.dim]).collect())
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  #[tokio::test]
  async fn embeds_all_requests_in_batches() {
    let provider = Arc::new(StubProvider { dim: 4, fail: AtomicBool::new(false) });
    let service = EmbeddingService::new(provider, 10, 2);
    let requests = (0..5).map(|i| EmbedRequest { id: i, text: format!("text {i}") }).collect();

    let (ok, failed) = service.embed_all(requests).await;
    assert_eq!(ok.len(), 5);
    assert!(failed.is_empty());
    assert_eq!(service.completed_count(), 5);
  }

  #[tokio::test]
  async fn failures_are_reported_without_losing_ids() {
    let provider = Arc::new(StubProvider { dim: 4, fail: AtomicBool::new(true) });
    let service = EmbeddingService::new(provider, 10, 3);
    let requests = (0..3).map(|i| EmbedRequest { id: i, text: format!("text {i}") }).collect();

    let (ok, failed) = service.embed_all(requests).await;
    assert!(ok.is_empty());
    assert_eq!(failed.len(), 3);
    assert_eq!(service.failed_count(), 3);
  }
}
