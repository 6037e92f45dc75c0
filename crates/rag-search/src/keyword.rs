//! BM25 keyword index over chunk content, backed by tantivy.

use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term, doc};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum KeywordError {
  #[error("tantivy error: {0}")]
  Tantivy(#[from] tantivy::TantivyError),
  #[error("query parse error: {0}")]
  QueryParse(#[from] tantivy::query::QueryParserError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeywordError>;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A lexical index over `(chunk_id, content)` pairs. `chunk_id` is stored but
/// not tokenized; `content` is tokenized and stored so snippets could be
/// rebuilt without a round trip to the vector store, though callers
/// currently re-fetch the chunk for its metadata anyway.
pub struct KeywordIndex {
  index: Index,
  reader: IndexReader,
  writer: Mutex<IndexWriter>,
  chunk_id_field: tantivy::schema::Field,
  content_field: tantivy::schema::Field,
}

impl KeywordIndex {
  pub fn open_or_create(index_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(index_dir)?;

    let mut schema_builder = Schema::builder();
    let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
    let content_field = schema_builder.add_text_field("content", TEXT | STORED);
    let schema = schema_builder.build();

    let dir = tantivy::directory::MmapDirectory::open(index_dir)?;
    let index = Index::open_or_create(dir, schema)?;
    let reader = index.reader()?;
    let writer = index.writer(WRITER_HEAP_BYTES)?;

    Ok(Self { index, reader, writer: Mutex::new(writer), chunk_id_field, content_field })
  }

  pub fn add_chunk(&self, chunk_id: &str, content: &str) -> Result<()> {
    let writer = self.writer.lock().unwrap();
    writer.add_document(doc!(
      self.chunk_id_field => chunk_id,
      self.content_field => content,
    ))?;
    Ok(())
  }

  pub fn remove_chunk(&self, chunk_id: &str) -> Result<()> {
    let writer = self.writer.lock().unwrap();
    writer.delete_term(Term::from_field_text(self.chunk_id_field, chunk_id));
    Ok(())
  }

  pub fn commit(&self) -> Result<()> {
    let mut writer = self.writer.lock().unwrap();
    writer.commit()?;
    drop(writer);
    self.reader.reload()?;
    Ok(())
  }

  /// Drop every document and reindex from scratch. Used after bulk ingestion
  /// or on demand, since tantivy has no cheap "replace everything" primitive.
  pub fn rebuild<'a>(&self, chunks: impl Iterator<Item = (&'a str, &'a str)>) -> Result<()> {
    let mut writer = self.writer.lock().unwrap();
    writer.delete_all_documents()?;
    for (chunk_id, content) in chunks {
      writer.add_document(doc!(
        self.chunk_id_field => chunk_id,
        self.content_field => content,
      ))?;
    }
    writer.commit()?;
    drop(writer);
    self.reader.reload()?;
    debug!("keyword index rebuilt");
    Ok(())
  }

  /// Returns up to `limit` `(chunk_id, bm25_score)` pairs, ordered by
  /// descending relevance.
  pub fn search(&self, query_text: &str, limit: usize) -> Result<Vec<(String, f32)>> {
    if query_text.trim().is_empty() || limit == 0 {
      return Ok(Vec::new());
    }
    let searcher = self.reader.searcher();
    let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
    let query = parser.parse_query(query_text)?;
    let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

    let mut hits = Vec::with_capacity(top_docs.len());
    for (score, address) in top_docs {
      let retrieved: TantivyDocument = searcher.doc(address)?;
      if let Some(chunk_id) = retrieved.get_first(self.chunk_id_field).and_then(|v| v.as_str()) {
        hits.push((chunk_id.to_string(), score));
      }
    }
    Ok(hits)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn test_index() -> (TempDir, KeywordIndex) {
    let temp_dir = TempDir::new().unwrap();
    let index = KeywordIndex::open_or_create(temp_dir.path()).unwrap();
    (temp_dir, index)
  }

  #[test]
  fn finds_matching_chunk_by_keyword() {
    let (_temp, index) = test_index();
    index.add_chunk("c1", "the quick brown fox").unwrap();
    index.add_chunk("c2", "an entirely unrelated sentence").unwrap();
    index.commit().unwrap();

    let hits = index.search("fox", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "c1");
  }

  #[test]
  fn removed_chunk_is_not_returned() {
    let (_temp, index) = test_index();
    index.add_chunk("c1", "searchable content").unwrap();
    index.commit().unwrap();
    index.remove_chunk("c1").unwrap();
    index.commit().unwrap();

    assert!(index.search("searchable", 10).unwrap().is_empty());
  }

  #[test]
  fn rebuild_replaces_entire_index() {
    let (_temp, index) = test_index();
    index.add_chunk("stale", "old content").unwrap();
    index.commit().unwrap();

    index.rebuild(vec![("fresh", "new content")].into_iter()).unwrap();

    assert!(index.search("old", 10).unwrap().is_empty());
    let hits = index.search("new", 10).unwrap();
    assert_eq!(hits[0].0, "fresh");
  }

  #[test]
  fn empty_query_returns_no_hits() {
    let (_temp, index) = test_index();
    index.add_chunk("c1", "content".to_string().as_str()).unwrap();
    index.commit().unwrap();
    assert!(index.search("", 10).unwrap().is_empty());
  }
}
