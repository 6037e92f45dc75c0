pub mod fusion;
pub mod keyword;

use rag_core::document::DocumentChunk;
use rag_store::VectorStore;
use std::sync::Arc;
use thiserror::Error;

pub use fusion::{FusedHit, reciprocal_rank_fusion};
pub use keyword::KeywordIndex;

/// How many keyword candidates to pull per requested result, before fusion
/// trims back down to `top_k`. The spec calls this `K`; it is not pinned to
/// a specific value, so it is a tunable constant here rather than config.
const KEYWORD_CANDIDATE_MULTIPLIER: usize = 10;

#[derive(Error, Debug)]
pub enum SearchError {
  #[error(transparent)]
  Keyword(#[from] keyword::KeywordError),
  #[error(transparent)]
  Store(#[from] rag_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone)]
pub struct SearchHit {
  pub chunk: DocumentChunk,
  pub score: f64,
}

/// Fuses ANN vector search against the LanceDB `chunks` table with BM25
/// keyword search against a tantivy index, via Reciprocal Rank Fusion.
pub struct HybridSearcher {
  store: Arc<VectorStore>,
  keyword_index: KeywordIndex,
  fusion_k0: f64,
}

impl HybridSearcher {
  pub fn new(store: Arc<VectorStore>, keyword_index: KeywordIndex, fusion_k0: f64) -> Self {
    Self { store, keyword_index, fusion_k0 }
  }

  /// `use_hybrid = false` skips the keyword index entirely rather than
  /// running it and discarding the result — a caller that asked for
  /// vector-only search shouldn't pay for a BM25 query it doesn't want.
  pub async fn search(&self, query_text: &str, query_vector: &[f32], top_k: usize, use_hybrid: bool) -> Result<Vec<SearchHit>> {
    let vector_hits = self.store.vector_search(query_vector, top_k, None).await?;
    let vector_ranked: Vec<(String, f32)> = vector_hits.iter().map(|(chunk, distance)| (chunk.id.to_string(), *distance)).collect();

    let keyword_ranked =
      if use_hybrid { self.keyword_index.search(query_text, top_k * KEYWORD_CANDIDATE_MULTIPLIER)? } else { Vec::new() };

    let fused = reciprocal_rank_fusion(&vector_ranked, &keyword_ranked, self.fusion_k0, top_k);

    let mut hits = Vec::with_capacity(fused.len());
    for entry in fused {
      let Ok(id) = entry.chunk_id.parse() else { continue };
      if let Some(chunk) = self.store.get_chunk(&id).await? {
        hits.push(SearchHit { chunk, score: entry.score });
      }
    }
    Ok(hits)
  }

  /// Rebuilds the keyword index from every chunk currently in the vector
  /// store. Call after bulk ingestion or on demand via the maintenance API.
  pub async fn refresh_keyword_index(&self) -> Result<()> {
    let chunks = self.store.list_chunks(None, None).await?;
    let pairs: Vec<(String, String)> = chunks.into_iter().map(|c| (c.id.to_string(), c.content)).collect();
    self.keyword_index.rebuild(pairs.iter().map(|(id, content)| (id.as_str(), content.as_str())))?;
    Ok(())
  }

  pub fn index_chunk(&self, chunk: &DocumentChunk) -> Result<()> {
    self.keyword_index.add_chunk(&chunk.id.to_string(), &chunk.content)?;
    Ok(())
  }

  pub fn remove_chunk(&self, chunk_id: &str) -> Result<()> {
    self.keyword_index.remove_chunk(chunk_id)?;
    Ok(())
  }

  pub fn commit_keyword_index(&self) -> Result<()> {
    self.keyword_index.commit()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rag_core::document::DocumentSource;
  use tempfile::TempDir;

  async fn test_store() -> (TempDir, Arc<VectorStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = VectorStore::open_at_path(temp_dir.path().join("test.lancedb"), 4).await.unwrap();
    (temp_dir, Arc::new(store))
  }

  fn test_chunk(content: &str) -> DocumentChunk {
    DocumentChunk::new(rag_core::document::DocumentId::new(), content.to_string(), "Doc".into(), "a.md".into(), DocumentSource::File, 0, 1, 0)
  }

  #[tokio::test]
  async fn hybrid_search_merges_vector_and_keyword_hits() {
    let (_store_dir, store) = test_store().await;
    let index_dir = TempDir::new().unwrap();
    let keyword_index = KeywordIndex::open_or_create(index_dir.path()).unwrap();

    let chunk = test_chunk("the quick brown fox jumps");
    store.add_chunk(&chunk, Some(&[1.0, 0.0, 0.0, 0.0])).await.unwrap();
    keyword_index.add_chunk(&chunk.id.to_string(), &chunk.content).unwrap();
    keyword_index.commit().unwrap();

    let searcher = HybridSearcher::new(store.clone(), keyword_index, 60.0);
    let hits = searcher.search("fox", &[1.0, 0.0, 0.0, 0.0], 5, true).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, chunk.id);
  }

  #[tokio::test]
  async fn use_hybrid_false_skips_keyword_index() {
    let (_store_dir, store) = test_store().await;
    let index_dir = TempDir::new().unwrap();
    let keyword_index = KeywordIndex::open_or_create(index_dir.path()).unwrap();

    let chunk = test_chunk("the quick brown fox jumps");
    store.add_chunk(&chunk, Some(&[1.0, 0.0, 0.0, 0.0])).await.unwrap();
    // Not added to the keyword index; a vector-only search must still find it.
    keyword_index.commit().unwrap();

    let searcher = HybridSearcher::new(store.clone(), keyword_index, 60.0);
    let hits = searcher.search("fox", &[1.0, 0.0, 0.0, 0.0], 5, false).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, chunk.id);
  }

  #[tokio::test]
  async fn refresh_keyword_index_picks_up_new_chunks() {
    let (_store_dir, store) = test_store().await;
    let index_dir = TempDir::new().unwrap();
    let keyword_index = KeywordIndex::open_or_create(index_dir.path()).unwrap();

    let chunk = test_chunk("newly added searchable text");
    store.add_chunk(&chunk, None).await.unwrap();

    let searcher = HybridSearcher::new(store.clone(), keyword_index, 60.0);
    searcher.refresh_keyword_index().await.unwrap();

    let hits = searcher.search("searchable", &[0.0; 4], 5, true).await.unwrap();
    assert_eq!(hits.len(), 1);
  }
}
