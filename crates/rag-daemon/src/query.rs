//! Query execution: embed the query text, fuse vector + keyword search,
//! and cache the formatted result by `(text, top_k, threshold, use_hybrid)`.

use rag_core::document::DocumentChunk;
use rag_embedding::{EmbedRequest, EmbeddingService};
use rag_search::HybridSearcher;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
  #[error(transparent)]
  Search(#[from] rag_search::SearchError),
  #[error("embedding failed: {0}")]
  Embed(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
  pub content: String,
  pub source: String,
  pub page: Option<usize>,
  pub score: f64,
}

impl ResultRow {
  fn from_chunk(chunk: DocumentChunk, score: f64) -> Self {
    Self { content: chunk.content, source: chunk.source, page: chunk.page, score }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
  pub results: Vec<ResultRow>,
  pub total_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
  text: String,
  top_k: usize,
  threshold_bits: u64,
  use_hybrid: bool,
}

impl CacheKey {
  fn new(text: &str, top_k: usize, threshold: f64, use_hybrid: bool) -> Self {
    Self { text: text.to_string(), top_k, threshold_bits: threshold.to_bits(), use_hybrid }
  }
}

/// Runs queries against the [`HybridSearcher`], with a small bounded cache
/// over the formatted response. Cleared entries are evicted oldest-first;
/// an error is never cached, so a transient embedding failure doesn't
/// poison the cache for subsequent identical queries.
pub struct QueryExecutor {
  embedder: Arc<EmbeddingService>,
  searcher: Arc<HybridSearcher>,
  cache: Mutex<Cache>,
}

struct Cache {
  entries: HashMap<CacheKey, QueryResponse>,
  order: Vec<CacheKey>,
  max_entries: usize,
}

impl Cache {
  fn get(&self, key: &CacheKey) -> Option<QueryResponse> {
    self.entries.get(key).cloned()
  }

  fn insert(&mut self, key: CacheKey, value: QueryResponse) {
    if !self.entries.contains_key(&key) {
      self.order.push(key.clone());
      while self.order.len() > self.max_entries {
        let oldest = self.order.remove(0);
        self.entries.remove(&oldest);
      }
    }
    self.entries.insert(key, value);
  }
}

impl QueryExecutor {
  pub fn new(embedder: Arc<EmbeddingService>, searcher: Arc<HybridSearcher>, max_cache_entries: usize) -> Self {
    Self {
      embedder,
      searcher,
      cache: Mutex::new(Cache { entries: HashMap::new(), order: Vec::new(), max_entries: max_cache_entries.max(1) }),
    }
  }

  pub async fn query(&self, text: &str, top_k: usize, threshold: f64, use_hybrid: bool) -> Result<QueryResponse> {
    let key = CacheKey::new(text, top_k, threshold, use_hybrid);
    if let Some(cached) = self.cache.lock().unwrap().get(&key) {
      return Ok(cached);
    }

    let request = EmbedRequest { id: 0usize, text: text.to_string() };
    let (successes, failures) = self.embedder.embed_all(vec![request]).await;
    if !failures.is_empty() || successes.is_empty() {
      return Err(QueryError::Embed("query text failed to embed".to_string()));
    }
    let vector = &successes[0].vector;

    let hits = self.searcher.search(text, vector, top_k, use_hybrid).await?;
    let results: Vec<ResultRow> = hits
      .into_iter()
      .filter(|hit| hit.score >= threshold)
      .map(|hit| ResultRow::from_chunk(hit.chunk, hit.score))
      .collect();

    let response = QueryResponse { total_results: results.len(), results };
    self.cache.lock().unwrap().insert(key, response.clone());
    Ok(response)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use rag_core::document::{DocumentId, DocumentSource};
  use rag_embedding::{EmbeddingError, EmbeddingProvider};
  use rag_search::KeywordIndex;
  use rag_store::VectorStore;
  use tempfile::TempDir;

  struct StubEmbedder;

  #[async_trait]
  impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
      "stub"
    }
    fn model_id(&self) -> &str {
      "stub"
    }
    fn dimensions(&self) -> usize {
      4
    }
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
      Ok(vec![1.0, 0.0, 0.0, 0.0])
    }
    async fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
      Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  #[tokio::test]
  async fn repeated_queries_hit_the_cache() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(VectorStore::open_at_path(temp.path().join("db"), 4).await.unwrap());
    let index_dir = TempDir::new().unwrap();
    let keyword_index = KeywordIndex::open_or_create(index_dir.path()).unwrap();

    let chunk = DocumentChunk::new(DocumentId::new(), "the quick fox".into(), "Doc".into(), "a.md".into(), DocumentSource::File, 0, 1, 0);
    store.add_chunk(&chunk, Some(&[1.0, 0.0, 0.0, 0.0])).await.unwrap();
    keyword_index.add_chunk(&chunk.id.to_string(), &chunk.content).unwrap();
    keyword_index.commit().unwrap();

    let searcher = Arc::new(HybridSearcher::new(store.clone(), keyword_index, 60.0));
    let embedder = Arc::new(EmbeddingService::new(Arc::new(StubEmbedder), 10, 8));
    let executor = QueryExecutor::new(embedder, searcher, 10);

    let first = executor.query("fox", 5, 0.0, true).await.unwrap();
    assert_eq!(first.total_results, 1);

    let second = executor.query("fox", 5, 0.0, true).await.unwrap();
    assert_eq!(second.total_results, 1);
  }

  #[tokio::test]
  async fn result_row_carries_the_chunk_page() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(VectorStore::open_at_path(temp.path().join("db"), 4).await.unwrap());
    let index_dir = TempDir::new().unwrap();
    let keyword_index = KeywordIndex::open_or_create(index_dir.path()).unwrap();

    let chunk = DocumentChunk::new(DocumentId::new(), "the quick fox".into(), "Doc".into(), "a.md".into(), DocumentSource::File, 0, 1, 0)
      .with_page(Some(7));
    store.add_chunk(&chunk, Some(&[1.0, 0.0, 0.0, 0.0])).await.unwrap();

    let searcher = Arc::new(HybridSearcher::new(store.clone(), keyword_index, 60.0));
    let embedder = Arc::new(EmbeddingService::new(Arc::new(StubEmbedder), 10, 8));
    let executor = QueryExecutor::new(embedder, searcher, 10);

    let response = executor.query("fox", 5, 0.0, false).await.unwrap();
    assert_eq!(response.results[0].page, Some(7));
  }

  #[tokio::test]
  async fn threshold_filters_out_weak_matches() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(VectorStore::open_at_path(temp.path().join("db"), 4).await.unwrap());
    let index_dir = TempDir::new().unwrap();
    let keyword_index = KeywordIndex::open_or_create(index_dir.path()).unwrap();
    let searcher = Arc::new(HybridSearcher::new(store, keyword_index, 60.0));
    let embedder = Arc::new(EmbeddingService::new(Arc::new(StubEmbedder), 10, 8));
    let executor = QueryExecutor::new(embedder, searcher, 10);

    let response = executor.query("nothing indexed", 5, 0.0, true).await.unwrap();
    assert_eq!(response.total_results, 0);
  }
}
