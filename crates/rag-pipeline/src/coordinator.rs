//! Three-stage pipeline: chunk -> embed -> store, wired with bounded
//! channels so a stall downstream applies backpressure upstream instead of
//! letting queued work pile up in memory.

use crate::validator::Validator;
use rag_chunk::TextChunker;
use rag_core::config::PipelineConfig;
use rag_core::document::{Document, DocumentChunk};
use rag_core::FileHasher;
use rag_embedding::{EmbedRequest, EmbeddingService};
use rag_extract::Router;
use rag_queue::IndexingQueue;
use rag_store::{IndexedState, ProgressTracker, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Store(#[from] rag_store::StoreError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// One file admitted into the pipeline, carried from `add_file` through the
/// chunk stage.
#[derive(Debug, Clone)]
pub struct Item {
  pub path: PathBuf,
  pub force: bool,
}

struct ChunkBatch {
  path: PathBuf,
  document: Document,
  chunks: Vec<DocumentChunk>,
}

struct EmbedBatch {
  path: PathBuf,
  document: Document,
  chunks: Vec<DocumentChunk>,
  vectors: Vec<Option<Vec<f32>>>,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct PipelineStats {
  pub chunk_active: usize,
  pub embed_active: usize,
  pub store_active: usize,
  pub chunk_queue_len: usize,
  pub embed_queue_len: usize,
  pub store_queue_len: usize,
}

/// Drives files through the chunk/embed/store stages with `N_chunk`,
/// `N_embed`, `N_store` workers apiece. Holds no `VectorStore` lock across
/// extraction or embedding; the store stage only takes it around the
/// transactional replace.
pub struct PipelineCoordinator {
  chunk_tx: mpsc::Sender<Item>,
  handles: Vec<JoinHandle<()>>,
  chunk_active: Arc<AtomicUsize>,
  embed_active: Arc<AtomicUsize>,
  store_active: Arc<AtomicUsize>,
}

impl PipelineCoordinator {
  /// Spawns all worker tasks and returns a coordinator ready to accept
  /// files via [`Self::add_file`].
  #[allow(clippy::too_many_arguments)]
  pub fn spawn(
    config: PipelineConfig,
    router: Arc<Router>,
    chunker: Arc<TextChunker>,
    validator: Arc<Validator>,
    embedder: Arc<EmbeddingService>,
    store: Arc<VectorStore>,
    progress: Arc<ProgressTracker>,
    queue: Arc<IndexingQueue>,
  ) -> Self {
    let chunk_capacity = (config.embed_workers * 2).max(1);
    let embed_capacity = (config.store_workers * 2).max(1);
    let store_capacity = (config.store_workers * 2).max(1);

    let (chunk_tx, chunk_rx) = mpsc::channel::<Item>(chunk_capacity);
    let (embed_tx, embed_rx) = mpsc::channel::<ChunkBatch>(embed_capacity);
    let (store_tx, store_rx) = mpsc::channel::<EmbedBatch>(store_capacity);

    let chunk_active = Arc::new(AtomicUsize::new(0));
    let embed_active = Arc::new(AtomicUsize::new(0));
    let store_active = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();

    let chunk_rx = Arc::new(tokio::sync::Mutex::new(chunk_rx));
    for worker_id in 0..config.chunk_workers.max(1) {
      let chunk_rx = chunk_rx.clone();
      let embed_tx = embed_tx.clone();
      let router = router.clone();
      let chunker = chunker.clone();
      let validator = validator.clone();
      let store = store.clone();
      let progress = progress.clone();
      let queue = queue.clone();
      let active = chunk_active.clone();
      handles.push(tokio::spawn(async move {
        debug!(worker_id, "chunk worker started");
        loop {
          let item = { chunk_rx.lock().await.recv().await };
          let Some(item) = item else { break };
          active.fetch_add(1, Ordering::Relaxed);
          run_chunk_stage(&item, &router, &chunker, &validator, &store, &progress, &queue, &embed_tx).await;
          active.fetch_sub(1, Ordering::Relaxed);
        }
      }));
    }

    let embed_rx = Arc::new(tokio::sync::Mutex::new(embed_rx));
    for worker_id in 0..config.embed_workers.max(1) {
      let embed_rx = embed_rx.clone();
      let store_tx = store_tx.clone();
      let embedder = embedder.clone();
      let progress = progress.clone();
      let queue = queue.clone();
      let active = embed_active.clone();
      handles.push(tokio::spawn(async move {
        debug!(worker_id, "embed worker started");
        loop {
          let batch = { embed_rx.lock().await.recv().await };
          let Some(batch) = batch else { break };
          active.fetch_add(1, Ordering::Relaxed);
          run_embed_stage(batch, &embedder, &progress, &queue, &store_tx).await;
          active.fetch_sub(1, Ordering::Relaxed);
        }
      }));
    }

    let store_rx = Arc::new(tokio::sync::Mutex::new(store_rx));
    for worker_id in 0..config.store_workers.max(1) {
      let store_rx = store_rx.clone();
      let store = store.clone();
      let progress = progress.clone();
      let queue = queue.clone();
      let active = store_active.clone();
      handles.push(tokio::spawn(async move {
        debug!(worker_id, "store worker started");
        loop {
          let batch = { store_rx.lock().await.recv().await };
          let Some(batch) = batch else { break };
          active.fetch_add(1, Ordering::Relaxed);
          run_store_stage(batch, &store, &progress, &queue).await;
          active.fetch_sub(1, Ordering::Relaxed);
        }
      }));
    }

    Self { chunk_tx, handles, chunk_active, embed_active, store_active }
  }

  /// Admits a file into the chunk stage, blocking if the chunk queue is
  /// full. Closed-channel sends (post-shutdown) are silently dropped.
  pub async fn add_file(&self, item: Item) {
    if self.chunk_tx.send(item).await.is_err() {
      warn!("pipeline is shut down, dropping file");
    }
  }

  pub fn stats(&self) -> PipelineStats {
    PipelineStats {
      chunk_active: self.chunk_active.load(Ordering::Relaxed),
      embed_active: self.embed_active.load(Ordering::Relaxed),
      store_active: self.store_active.load(Ordering::Relaxed),
      chunk_queue_len: 0,
      embed_queue_len: 0,
      store_queue_len: 0,
    }
  }

  /// Closes the intake side and joins every worker once the in-flight
  /// batches have drained through the stages.
  pub async fn stop(mut self) {
    drop(self.chunk_tx);
    for handle in self.handles.drain(..) {
      let _ = handle.await;
    }
  }
}

#[allow(clippy::too_many_arguments)]
async fn run_chunk_stage(
  item: &Item,
  router: &Router,
  chunker: &TextChunker,
  validator: &Validator,
  store: &VectorStore,
  progress: &ProgressTracker,
  queue: &IndexingQueue,
  embed_tx: &mpsc::Sender<ChunkBatch>,
) {
  let path = &item.path;
  let path_str = path.to_string_lossy().to_string();

  let content_hash = match FileHasher::hash_file(path) {
    Ok(hash) => hash,
    Err(e) => {
      warn!(path = %path_str, error = %e, "failed to hash file");
      queue.mark_complete(path);
      return;
    }
  };

  let validation = validator.validate(path);
  if !validation.is_valid {
    let check = validation.validation_check.as_deref().unwrap_or("unknown");
    let reason = validation.reason.unwrap_or_default();
    if let Err(e) = progress.mark_rejected(&path_str, &content_hash, check, &reason).await {
      error!(path = %path_str, error = %e, "failed to record rejection");
    }
    queue.mark_complete(path);
    return;
  }

  match store.is_document_indexed(&path_str, &content_hash).await {
    Ok(IndexedState::Duplicate(existing)) => {
      let err = rag_core::Error::DuplicateContent { doc_source: path_str.clone(), existing: existing.source.clone() };
      debug!(path = %path_str, error = %err, "skipping duplicate of already-indexed content");
      queue.mark_complete(path);
      return;
    }
    Ok(IndexedState::Moved(existing)) => {
      let err = rag_core::Error::MoveDetected { from: existing.source.clone(), to: path_str.clone() };
      debug!(path = %path_str, error = %err, "rewriting path for moved document");
      if let Err(e) = store.move_document(&existing, &path_str).await {
        error!(path = %path_str, error = %e, "failed to rewrite moved document's path");
        queue.mark_complete(path);
        return;
      }
      if let Err(e) = progress.rename(&existing.source, &path_str).await {
        warn!(path = %path_str, error = %e, "failed to rewrite progress row for moved document");
      }
      queue.mark_complete(path);
      return;
    }
    Ok(IndexedState::NotIndexed) | Ok(IndexedState::Indexed) => {}
    Err(e) => {
      warn!(path = %path_str, error = %e, "failed to check for move/duplicate, processing as new");
    }
  }

  match progress.start_processing(&path_str, &content_hash).await {
    Ok(existing) if existing.status == rag_core::progress::ProcessingStatus::Completed && !item.force => {
      debug!(path = %path_str, "already indexed with matching hash, skipping");
      queue.mark_complete(path);
      return;
    }
    Ok(_) => {}
    Err(e) => {
      error!(path = %path_str, error = %e, "failed to start processing");
      queue.mark_complete(path);
      return;
    }
  }

  let extracted = match router.extract(path) {
    Ok(text) => text,
    Err(e) => {
      warn!(path = %path_str, error = %e, "extraction failed");
      let _ = progress.mark_failed(&path_str, &e.to_string()).await;
      queue.mark_complete(path);
      return;
    }
  };

  let mut page_chunks: Vec<(rag_chunk::Chunk, Option<usize>)> = Vec::new();
  for page in &extracted.pages {
    match chunker.chunk(&page.text) {
      Ok(chunks) => page_chunks.extend(chunks.into_iter().map(|c| (c, page.page))),
      Err(e) => {
        let _ = progress.mark_failed(&path_str, &e.to_string()).await;
        queue.mark_complete(path);
        return;
      }
    }
  }

  if page_chunks.is_empty() {
    let _ = progress.mark_failed(&path_str, "chunking produced no output").await;
    queue.mark_complete(path);
    return;
  }

  let total = page_chunks.len();
  if let Err(e) = progress.set_total_chunks(&path_str, total).await {
    warn!(path = %path_str, error = %e, "failed to record total chunk count");
  }

  let document = Document::new(
    extracted.title.clone(),
    path_str.clone(),
    extracted.source_type,
    content_hash,
    extracted.char_count(),
    total,
    extracted.method.clone(),
  );

  let document_chunks: Vec<DocumentChunk> = page_chunks
    .into_iter()
    .enumerate()
    .map(|(index, (chunk, page))| {
      DocumentChunk::new(
        document.id,
        chunk.text,
        extracted.title.clone(),
        path_str.clone(),
        extracted.source_type,
        index,
        total,
        chunk.char_offset,
      )
      .with_page(page)
    })
    .collect();

  let batch = ChunkBatch { path: path.clone(), document, chunks: document_chunks };
  if embed_tx.send(batch).await.is_err() {
    warn!(path = %path_str, "embed stage is shut down, dropping file");
    queue.mark_complete(path);
  }
}

async fn run_embed_stage(
  batch: ChunkBatch,
  embedder: &EmbeddingService,
  progress: &ProgressTracker,
  queue: &IndexingQueue,
  store_tx: &mpsc::Sender<EmbedBatch>,
) {
  let path_str = batch.path.to_string_lossy().to_string();
  let requests: Vec<EmbedRequest<usize>> =
    batch.chunks.iter().enumerate().map(|(i, c)| EmbedRequest { id: i, text: c.content.clone() }).collect();

  let (successes, failures) = embedder.embed_all(requests).await;

  if !failures.is_empty() {
    warn!(path = %path_str, failed = failures.len(), "embedding failures for file");
    let _ = progress.mark_failed(&path_str, &format!("{} of {} chunks failed to embed", failures.len(), batch.chunks.len())).await;
    queue.mark_complete(&batch.path);
    return;
  }

  let mut vectors: Vec<Option<Vec<f32>>> = vec![None; batch.chunks.len()];
  for result in successes {
    vectors[result.id] = Some(result.vector);
  }

  if let Some(last) = batch.chunks.last() {
    let last_chunk_end = last.char_offset + last.content.len();
    if let Err(e) = progress.update_progress(&path_str, batch.chunks.len(), last_chunk_end).await {
      warn!(path = %path_str, error = %e, "failed to record embedding progress");
    }
  }

  let embed_batch = EmbedBatch { path: batch.path.clone(), document: batch.document, chunks: batch.chunks, vectors };
  if store_tx.send(embed_batch).await.is_err() {
    warn!(path = %path_str, "store stage is shut down, dropping file");
    queue.mark_complete(&batch.path);
  }
}

async fn run_store_stage(batch: EmbedBatch, store: &VectorStore, progress: &ProgressTracker, queue: &IndexingQueue) {
  let path_str = batch.path.to_string_lossy().to_string();

  let old_id = match store.find_document_by_source(&path_str).await {
    Ok(existing) => existing.map(|d| d.id),
    Err(e) => {
      warn!(path = %path_str, error = %e, "failed to look up existing document before replace");
      None
    }
  };

  let result = store.replace_document(old_id.as_ref(), &batch.document, &batch.chunks, &batch.vectors).await;

  match result {
    Ok(()) => {
      if let Err(e) = progress.mark_completed(&path_str).await {
        warn!(path = %path_str, error = %e, "failed to mark progress completed");
      }
    }
    Err(e) => {
      error!(path = %path_str, error = %e, "failed to store document");
      let _ = progress.mark_failed(&path_str, &e.to_string()).await;
    }
  }

  // Free the in-flight slot regardless of success or failure so a failed
  // file can be re-queued instead of wedging the dedup set forever.
  queue.mark_complete(&batch.path);
}
