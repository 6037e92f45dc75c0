//! Axum HTTP surface: query, ingest control, document CRUD, maintenance.

use axum::Json;
use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::error;

use crate::orchestrator::AppState;

pub fn build_router(state: Arc<AppState>) -> axum::Router {
  axum::Router::new()
    .route("/query", post(query))
    .route("/index", post(index))
    .route("/indexing/pause", post(pause))
    .route("/indexing/resume", post(resume))
    .route("/indexing/priority/{path}", post(set_priority))
    .route("/indexing/status", get(indexing_status))
    .route("/queue/jobs", get(queue_jobs))
    .route("/documents", get(list_documents))
    .route("/documents/rejected", get(list_rejected_documents))
    .route("/document/{filename}", get(get_document).delete(delete_document))
    .route("/api/maintenance/reindex-orphaned-files", post(reindex_orphaned_files))
    .route("/api/maintenance/reindex-path", post(reindex_path))
    .route("/api/maintenance/rebuild-fts", post(rebuild_fts))
    .route("/api/maintenance/rebuild-hnsw", post(rebuild_hnsw))
    .route("/health", get(health))
    .with_state(state)
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error(transparent)]
  Store(#[from] rag_store::StoreError),
  #[error(transparent)]
  Query(#[from] crate::query::QueryError),
  #[error(transparent)]
  Queue(#[from] rag_queue::QueueError),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let status = match &self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
      error!(error = %self, "request failed");
    }
    (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
  }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct QueryRequest {
  text: String,
  #[serde(default = "default_top_k")]
  top_k: usize,
  #[serde(default)]
  threshold: f64,
  #[serde(default = "default_true")]
  use_hybrid: bool,
}

fn default_top_k() -> usize {
  10
}
fn default_true() -> bool {
  true
}

async fn query(State(state): State<Arc<AppState>>, Json(req): Json<QueryRequest>) -> ApiResult<Json<crate::query::QueryResponse>> {
  if req.text.trim().is_empty() {
    return Err(ApiError::BadRequest("text must not be empty".to_string()));
  }
  let response = state.query_executor.query(&req.text, req.top_k, req.threshold, req.use_hybrid).await?;
  Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct IndexRequest {
  #[serde(default)]
  force_reindex: bool,
}

#[derive(Debug, Serialize)]
struct IndexResponse {
  queued: usize,
}

async fn index(State(state): State<Arc<AppState>>, Json(req): Json<IndexRequest>) -> ApiResult<Json<IndexResponse>> {
  let scanner = rag_watch::Scanner::default();
  let scan = scanner.scan(&state.knowledge_base, |_| {});
  let mut queued = 0;
  for file in scan.files {
    if state.queue.add(file.path, rag_queue::Priority::Normal, req.force_reindex)? {
      queued += 1;
    }
  }
  Ok(Json(IndexResponse { queued }))
}

async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  state.queue.pause();
  StatusCode::NO_CONTENT
}

async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  state.queue.resume();
  StatusCode::NO_CONTENT
}

async fn set_priority(
  State(state): State<Arc<AppState>>,
  AxPath(path): AxPath<String>,
  Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
  let force = params.get("force").map(|v| v == "true").unwrap_or(false);
  state.queue.add(path.into(), rag_queue::Priority::High, force)?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct IndexingStatus {
  queue_size: usize,
  paused: bool,
  worker_running: bool,
}

async fn indexing_status(State(state): State<Arc<AppState>>) -> Json<IndexingStatus> {
  Json(IndexingStatus {
    queue_size: state.queue.size(),
    paused: state.queue.is_paused(),
    worker_running: state.indexing_active.load(Ordering::Relaxed),
  })
}

async fn queue_jobs(State(state): State<Arc<AppState>>) -> Json<rag_pipeline::PipelineStats> {
  Json(state.pipeline.stats())
}

#[derive(Debug, Serialize)]
struct DocumentSummary {
  id: String,
  title: String,
  source: String,
  chunk_count: usize,
}

async fn list_documents(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DocumentSummary>>> {
  let docs = state.store.list_documents().await?;
  Ok(Json(
    docs.into_iter().map(|d| DocumentSummary { id: d.id.to_string(), title: d.title, source: d.source, chunk_count: d.chunk_count }).collect(),
  ))
}

async fn list_rejected_documents(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<rag_core::progress::ProcessingProgress>>> {
  let rejected = state.progress.get_rejected_files().await?;
  Ok(Json(rejected))
}

async fn get_document(State(state): State<Arc<AppState>>, AxPath(filename): AxPath<String>) -> ApiResult<Json<DocumentSummary>> {
  let doc = state
    .store
    .find_document_by_source(&filename)
    .await?
    .ok_or_else(|| ApiError::BadRequest(format!("no document for {filename}")))?;
  Ok(Json(DocumentSummary { id: doc.id.to_string(), title: doc.title, source: doc.source, chunk_count: doc.chunk_count }))
}

async fn delete_document(State(state): State<Arc<AppState>>, AxPath(path): AxPath<String>) -> ApiResult<Json<rag_store::DeleteOutcome>> {
  let outcome = delete_document_everywhere(&state, &path).await?;
  if !outcome.found {
    return Err(ApiError::BadRequest(format!("no document for {path}")));
  }
  Ok(Json(outcome))
}

/// Removes a document's chunks from the keyword index, then its rows from
/// the vector store, then its progress checkpoint. Shared by the delete and
/// reindex handlers so neither can drift out of sync with the other.
async fn delete_document_everywhere(state: &AppState, path: &str) -> ApiResult<rag_store::DeleteOutcome> {
  let chunks = match state.store.find_document_by_source(path).await? {
    Some(doc) => state.store.chunks_for_document(&doc.id).await?,
    None => Vec::new(),
  };
  for chunk in &chunks {
    let _ = state.searcher.remove_chunk(&chunk.id.to_string());
  }
  if !chunks.is_empty() {
    state.searcher.commit_keyword_index().ok();
  }
  let outcome = state.store.delete_document(path).await?;
  let _ = state.progress.delete(path).await;
  Ok(outcome)
}

#[derive(Debug, Serialize)]
struct MaintenanceReport {
  affected: usize,
  dry_run: bool,
}

async fn reindex_orphaned_files(State(state): State<Arc<AppState>>) -> ApiResult<Json<MaintenanceReport>> {
  let repaired = state.sanitizer.repair_orphans().await?;
  Ok(Json(MaintenanceReport { affected: repaired, dry_run: false }))
}

#[derive(Debug, Deserialize)]
struct ReindexPathRequest {
  path: String,
  #[serde(default)]
  dry_run: bool,
}

async fn reindex_path(State(state): State<Arc<AppState>>, Json(req): Json<ReindexPathRequest>) -> ApiResult<Json<MaintenanceReport>> {
  let root = std::path::Path::new(&req.path);
  let files: Vec<std::path::PathBuf> = if root.is_dir() {
    let scanner = rag_watch::Scanner::default();
    scanner.scan(root, |_| {}).files.into_iter().map(|f| f.path).collect()
  } else {
    vec![root.to_path_buf()]
  };

  if req.dry_run {
    return Ok(Json(MaintenanceReport { affected: files.len(), dry_run: true }));
  }

  let mut affected = 0;
  for file in files {
    let file_str = file.to_string_lossy().to_string();
    delete_document_everywhere(&state, &file_str).await?;
    if state.queue.add(file, rag_queue::Priority::High, true)? {
      affected += 1;
    }
  }
  Ok(Json(MaintenanceReport { affected, dry_run: false }))
}

#[derive(Debug, Deserialize, Default)]
struct DryRunRequest {
  #[serde(default)]
  dry_run: bool,
}

async fn rebuild_fts(State(state): State<Arc<AppState>>, body: Option<Json<DryRunRequest>>) -> ApiResult<Json<MaintenanceReport>> {
  let dry_run = body.map(|b| b.0.dry_run).unwrap_or(false);
  if dry_run {
    let count = state.store.count_chunks(None).await?;
    return Ok(Json(MaintenanceReport { affected: count, dry_run: true }));
  }
  state.searcher.refresh_keyword_index().await?;
  let count = state.store.count_chunks(None).await?;
  Ok(Json(MaintenanceReport { affected: count, dry_run: false }))
}

async fn rebuild_hnsw(State(state): State<Arc<AppState>>, body: Option<Json<DryRunRequest>>) -> ApiResult<Json<MaintenanceReport>> {
  let dry_run = body.map(|b| b.0.dry_run).unwrap_or(false);
  let count = state.store.count_chunks(None).await?;
  if dry_run {
    return Ok(Json(MaintenanceReport { affected: count, dry_run: true }));
  }
  state.store.rebuild_vector_index().await?;
  Ok(Json(MaintenanceReport { affected: count, dry_run: false }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
  status: &'static str,
  indexed_documents: usize,
  total_chunks: usize,
  indexing_in_progress: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
  let indexed_documents = state.store.list_documents().await?.len();
  let total_chunks = state.store.count_chunks(None).await?;
  let stats = state.pipeline.stats();
  let indexing_in_progress = stats.chunk_active > 0 || stats.embed_active > 0 || stats.store_active > 0 || !state.queue.is_empty();
  Ok(Json(HealthResponse { status: "ok", indexed_documents, total_chunks, indexing_in_progress }))
}

