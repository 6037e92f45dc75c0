//! Startup wiring: opens the store, constructs every pipeline component,
//! runs the sanitizer, then serves the HTTP API until shutdown.

use rag_core::config::Config;
use rag_embedding::{EmbeddingProvider, OllamaProvider, OpenRouterProvider};
use rag_extract::Router as ExtractRouter;
use rag_pipeline::{IndexingWorker, PipelineCoordinator, Sanitizer, SanitizerConfig, Validator};
use rag_queue::IndexingQueue;
use rag_search::{HybridSearcher, KeywordIndex};
use rag_store::{ProgressTracker, VectorStore};
use rag_watch::{FileWatcher, Scanner};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::http::build_router;
use crate::query::QueryExecutor;

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Store(#[from] rag_store::StoreError),
  #[error(transparent)]
  Keyword(#[from] rag_search::keyword::KeywordError),
  #[error("server error: {0}")]
  Server(String),
}

/// Daemon configuration: the knowledge base root, its on-disk data
/// directory, the HTTP port, and the embedding provider to use.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
  pub knowledge_base: PathBuf,
  pub data_dir: PathBuf,
  pub port: u16,
  pub config: Config,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    let config = Config::default();
    Self {
      knowledge_base: config.paths.knowledge_base.clone(),
      data_dir: rag_store::default_data_dir(),
      port: rag_store::default_port(),
      config,
    }
  }
}

fn create_embedding_provider(config: &rag_core::config::EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
  match config.provider {
    rag_core::config::EmbeddingProvider::Ollama => {
      Arc::new(OllamaProvider::new().with_url(&config.ollama_url).with_model(&config.model, config.dimensions))
    }
    rag_core::config::EmbeddingProvider::OpenRouter => {
      let api_key = config.openrouter_api_key.clone().or_else(|| std::env::var("OPENROUTER_API_KEY").ok()).unwrap_or_default();
      if api_key.is_empty() {
        warn!("OpenRouter API key not configured, falling back to Ollama");
        Arc::new(OllamaProvider::new().with_url(&config.ollama_url).with_model(&config.model, config.dimensions))
      } else {
        Arc::new(OpenRouterProvider::new(api_key).with_model(&config.model, config.dimensions))
      }
    }
  }
}

/// Everything an HTTP handler needs, shared behind `Arc`s so it can be
/// cloned cheaply into axum's `State` extractor.
pub struct AppState {
  pub knowledge_base: PathBuf,
  pub store: Arc<VectorStore>,
  pub progress: Arc<ProgressTracker>,
  pub queue: Arc<IndexingQueue>,
  pub pipeline: Arc<PipelineCoordinator>,
  pub searcher: Arc<HybridSearcher>,
  pub sanitizer: Arc<Sanitizer>,
  pub query_executor: Arc<QueryExecutor>,
  pub started_at: chrono::DateTime<chrono::Utc>,
  pub indexing_active: Arc<AtomicBool>,
}

/// Daemon lifecycle manager: builds [`AppState`], runs startup
/// reconciliation, and serves the HTTP API until shutdown.
pub struct Daemon {
  config: DaemonConfig,
  state: Option<Arc<AppState>>,
  watcher_shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Daemon {
  pub fn new(config: DaemonConfig) -> Self {
    Self { config, state: None, watcher_shutdown_tx: None }
  }

  pub async fn run(&mut self) -> Result<(), LifecycleError> {
    info!(port = self.config.port, data_dir = %self.config.data_dir.display(), "starting daemon");

    let embedding_config = &self.config.config.embedding;
    let embedding = create_embedding_provider(embedding_config);
    info!(provider = embedding.name(), model = embedding.model_id(), dims = embedding.dimensions(), "embedding provider selected");
    if !embedding.is_available().await {
      warn!("embedding provider is not available at startup");
    }

    let store = Arc::new(VectorStore::open(&self.config.data_dir, embedding_config.dimensions).await?);
    let progress = Arc::new(ProgressTracker::new(store.clone()));
    let queue = Arc::new(IndexingQueue::new());
    let extract_router = Arc::new(ExtractRouter::default());
    let chunker = Arc::new(rag_chunk::TextChunker::new(self.config.config.chunk.clone()));
    let validator = Arc::new(Validator::new(extract_router.clone(), self.config.config.paths.max_file_size as u64));
    let embedder = Arc::new(rag_embedding::EmbeddingService::new(
      embedding,
      self.config.config.pipeline.max_pending_embeddings,
      embedding_config.batch_size,
    ));

    let keyword_index_dir = self.config.data_dir.join("keyword_index");
    let keyword_index = KeywordIndex::open_or_create(&keyword_index_dir)?;
    let searcher = Arc::new(HybridSearcher::new(store.clone(), keyword_index, self.config.config.search.fusion_k0));

    let pipeline = Arc::new(PipelineCoordinator::spawn(
      self.config.config.pipeline.clone(),
      extract_router.clone(),
      chunker,
      validator,
      embedder.clone(),
      store.clone(),
      progress.clone(),
      queue.clone(),
    ));

    let sanitizer = Arc::new(Sanitizer::new(
      progress.clone(),
      store.clone(),
      queue.clone(),
      SanitizerConfig { auto_repair_orphans: self.config.config.sanitizer.auto_repair_orphans },
    ));
    let report = sanitizer.sanitize().await?;
    info!(resumed = report.resumed, repaired = report.repaired, "startup sanitizer finished");

    let mut worker = IndexingWorker::start(queue.clone(), pipeline.clone());

    let scanner = Scanner::new(ExtractRouter::default()).with_max_file_size(self.config.config.paths.max_file_size as u64);
    let initial_scan = scanner.scan(&self.config.knowledge_base, |_| {});
    info!(found = initial_scan.files.len(), skipped = initial_scan.skipped_count, "initial scan complete");
    for file in &initial_scan.files {
      let _ = queue.add(file.path.clone(), rag_queue::Priority::Low, false);
    }

    let (watcher_shutdown_tx, mut watcher_shutdown_rx) = broadcast::channel::<()>(1);
    self.watcher_shutdown_tx = Some(watcher_shutdown_tx.clone());
    let watch_root = self.config.knowledge_base.clone();
    let watch_queue = queue.clone();
    std::thread::spawn(move || {
      let watcher = match FileWatcher::new(&watch_root) {
        Ok(w) => w,
        Err(e) => {
          warn!(error = %e, "failed to start file watcher, live updates disabled");
          return;
        }
      };
      loop {
        if watcher_shutdown_rx.try_recv().is_ok() {
          break;
        }
        if let Ok(Some(change)) = watcher.wait_timeout(std::time::Duration::from_secs(1)) {
          if !matches!(change.kind, rag_watch::ChangeKind::Deleted) {
            let _ = watch_queue.add(change.path, rag_queue::Priority::Normal, false);
          }
        }
      }
    });

    let query_executor = Arc::new(QueryExecutor::new(embedder, searcher.clone(), self.config.config.cache.max_entries));

    let state = Arc::new(AppState {
      knowledge_base: self.config.knowledge_base.clone(),
      store: store.clone(),
      progress,
      queue: queue.clone(),
      pipeline: pipeline.clone(),
      searcher,
      sanitizer,
      query_executor,
      started_at: chrono::Utc::now(),
      indexing_active: Arc::new(AtomicBool::new(true)),
    });
    self.state = Some(state.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.port)).await?;
    info!(port = self.config.port, "http server listening");

    axum::serve(listener, app)
      .with_graceful_shutdown(async {
        if let Err(e) = signal::ctrl_c().await {
          warn!("failed to listen for ctrl-c: {}", e);
        }
        info!("received ctrl-c, shutting down");
      })
      .await
      .map_err(|e| LifecycleError::Server(e.to_string()))?;

    let _ = watcher_shutdown_tx.send(());
    worker.stop().await;
    queue.close();
    info!("daemon shutdown complete");

    Ok(())
  }
}

/// Checks whether a daemon is already serving on `port`.
pub fn is_running(port: u16) -> bool {
  std::net::TcpStream::connect(("127.0.0.1", port)).is_ok()
}

pub fn pid_file_path() -> PathBuf {
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir).join("ragd.pid")
  } else {
    PathBuf::from(format!("/tmp/ragd-{}.pid", std::process::id()))
  }
}

pub fn write_pid_file() -> std::io::Result<()> {
  std::fs::write(pid_file_path(), std::process::id().to_string())
}

pub fn remove_pid_file() {
  let _ = std::fs::remove_file(pid_file_path());
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_uses_the_default_port() {
    let config = DaemonConfig::default();
    assert_eq!(config.port, rag_store::default_port());
  }

  #[test]
  fn is_running_false_for_unbound_port() {
    assert!(!is_running(1));
  }
}
