use arrow_array::{Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array};
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use rag_core::document::{Document, DocumentId, DocumentSource};
use std::sync::Arc;

use crate::connection::{Result, StoreError, VectorStore};
use crate::schema::documents_schema;

impl VectorStore {
  pub async fn add_document(&self, document: &Document) -> Result<()> {
    let table = self.documents_table().await?;
    let batch = document_to_batch(document)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], documents_schema());
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
    let table = self.documents_table().await?;
    let results: Vec<RecordBatch> = table.query().only_if(format!("id = '{id}'")).execute().await?.try_collect().await?;
    match results.first() {
      Some(batch) if batch.num_rows() > 0 => Ok(Some(batch_to_document(batch, 0)?)),
      _ => Ok(None),
    }
  }

  pub async fn find_document_by_source(&self, source: &str) -> Result<Option<Document>> {
    let table = self.documents_table().await?;
    let escaped = source.replace('\'', "''");
    let results: Vec<RecordBatch> = table.query().only_if(format!("source = '{escaped}'")).execute().await?.try_collect().await?;
    match results.first() {
      Some(batch) if batch.num_rows() > 0 => Ok(Some(batch_to_document(batch, 0)?)),
      _ => Ok(None),
    }
  }

  /// Look up a document by content hash, independent of its recorded
  /// source path. A hit whose source differs from the path currently being
  /// ingested is the signal the move/duplicate-detection logic (see the
  /// pipeline's chunk stage) uses to distinguish a rename from a genuine
  /// duplicate.
  pub async fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
    let table = self.documents_table().await?;
    let results: Vec<RecordBatch> =
      table.query().only_if(format!("content_hash = '{content_hash}'")).execute().await?.try_collect().await?;
    match results.first() {
      Some(batch) if batch.num_rows() > 0 => Ok(Some(batch_to_document(batch, 0)?)),
      _ => Ok(None),
    }
  }

  pub async fn list_documents(&self) -> Result<Vec<Document>> {
    let table = self.documents_table().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;
    let mut docs = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        docs.push(batch_to_document(&batch, i)?);
      }
    }
    Ok(docs)
  }

  pub async fn delete_document_row(&self, id: &DocumentId) -> Result<()> {
    let table = self.documents_table().await?;
    table.delete(&format!("id = '{id}'")).await?;
    Ok(())
  }

  /// Atomically swap a document's chunk set: delete the old document row
  /// and all its chunks, then insert the new document row and chunks. Used
  /// by the store stage so a crash mid-write never leaves half the old
  /// chunks and half the new ones searchable at once — LanceDB has no
  /// multi-table transaction, so "atomic" here means delete-then-add
  /// executed back to back with no intervening query against this document,
  /// matching the single-writer assumption the rest of the pipeline makes.
  pub async fn replace_document(
    &self,
    old_id: Option<&DocumentId>,
    document: &Document,
    chunks: &[rag_core::document::DocumentChunk],
    vectors: &[Option<Vec<f32>>],
  ) -> Result<()> {
    if let Some(old_id) = old_id {
      self.delete_chunks_for_document(old_id).await?;
      self.delete_document_row(old_id).await?;
    }
    self.add_document(document).await?;
    self.add_chunks(chunks, vectors).await?;
    Ok(())
  }

  /// Checks whether `hash` already has a home in the store, and if so
  /// whether `path` is that home, a rename target, or a second path
  /// pointing at the same bytes.
  pub async fn is_document_indexed(&self, path: &str, hash: &str) -> Result<IndexedState> {
    let Some(existing) = self.find_document_by_hash(hash).await? else {
      return Ok(IndexedState::NotIndexed);
    };
    if existing.source == path {
      return Ok(IndexedState::Indexed);
    }
    if std::path::Path::new(&existing.source).exists() {
      Ok(IndexedState::Duplicate(existing))
    } else {
      Ok(IndexedState::Moved(existing))
    }
  }

  /// Rewrites a moved document's recorded path in the `documents` and
  /// `chunks` tables, preserving its chunks and vectors. If a stale row
  /// already sits at `new_path` (e.g. the destination was indexed and then
  /// deleted on disk before the move landed), it is dropped in favor of the
  /// rename rather than left to collide with it.
  pub async fn move_document(&self, moved: &Document, new_path: &str) -> Result<()> {
    if let Some(stale) = self.find_document_by_source(new_path).await? {
      if stale.id != moved.id {
        self.delete_chunks_for_document(&stale.id).await?;
        self.delete_document_row(&stale.id).await?;
      }
    }

    let escaped_new_path = new_path.replace('\'', "''");

    let documents_table = self.documents_table().await?;
    documents_table
      .update()
      .only_if(format!("id = '{}'", moved.id))
      .column("source", format!("'{escaped_new_path}'"))
      .execute()
      .await?;

    let chunks_table = self.chunks_table().await?;
    chunks_table
      .update()
      .only_if(format!("document_id = '{}'", moved.id))
      .column("source", format!("'{escaped_new_path}'"))
      .execute()
      .await?;

    Ok(())
  }

  /// Removes a document, its chunks, and its vectors in one call. Callers
  /// that also maintain a keyword index or progress row are responsible for
  /// cleaning those up around this call; this facade only owns the tables
  /// it marshals directly.
  pub async fn delete_document(&self, path: &str) -> Result<DeleteOutcome> {
    let Some(doc) = self.find_document_by_source(path).await? else {
      return Ok(DeleteOutcome { found: false, chunks_deleted: 0, document_deleted: false });
    };
    let chunks_deleted = self.count_chunks(Some(&format!("document_id = '{}'", doc.id))).await?;
    self.delete_chunks_for_document(&doc.id).await?;
    self.delete_document_row(&doc.id).await?;
    Ok(DeleteOutcome { found: true, chunks_deleted, document_deleted: true })
  }
}

/// Result of a hash lookup against the store, used to distinguish a plain
/// hit from a move or a duplicate at ingest time.
#[derive(Debug, Clone)]
pub enum IndexedState {
  NotIndexed,
  Indexed,
  Moved(Document),
  Duplicate(Document),
}

/// Return shape of [`VectorStore::delete_document`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DeleteOutcome {
  pub found: bool,
  pub chunks_deleted: usize,
  pub document_deleted: bool,
}

fn document_to_batch(document: &Document) -> Result<RecordBatch> {
  Ok(RecordBatch::try_new(
    documents_schema(),
    vec![
      Arc::new(StringArray::from(vec![document.id.to_string()])),
      Arc::new(StringArray::from(vec![document.title.clone()])),
      Arc::new(StringArray::from(vec![document.source.clone()])),
      Arc::new(StringArray::from(vec![document.source_type.as_str().to_string()])),
      Arc::new(StringArray::from(vec![document.content_hash.clone()])),
      Arc::new(UInt32Array::from(vec![document.char_count as u32])),
      Arc::new(UInt32Array::from(vec![document.chunk_count as u32])),
      Arc::new(StringArray::from(vec![document.extraction_method.clone()])),
      Arc::new(Int64Array::from(vec![document.created_at.timestamp_millis()])),
      Arc::new(Int64Array::from(vec![document.updated_at.timestamp_millis()])),
    ],
  )?)
}

fn batch_to_document(batch: &RecordBatch, row: usize) -> Result<Document> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| StoreError::NotFound(format!("column {name}")))
  };
  let get_u32 = |name: &str| -> Result<u32> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| StoreError::NotFound(format!("column {name}")))
  };
  let get_i64 = |name: &str| -> Result<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| StoreError::NotFound(format!("column {name}")))
  };

  let source_type = get_string("source_type")?.parse::<DocumentSource>().map_err(StoreError::NotFound)?;
  let created_at = Utc.timestamp_millis_opt(get_i64("created_at")?).single().ok_or_else(|| StoreError::NotFound("invalid created_at".into()))?;
  let updated_at = Utc.timestamp_millis_opt(get_i64("updated_at")?).single().ok_or_else(|| StoreError::NotFound("invalid updated_at".into()))?;

  Ok(Document {
    id: get_string("id")?.parse().map_err(|_| StoreError::NotFound("invalid id".into()))?,
    title: get_string("title")?,
    source: get_string("source")?,
    source_type,
    content_hash: get_string("content_hash")?,
    char_count: get_u32("char_count")? as usize,
    chunk_count: get_u32("chunk_count")? as usize,
    extraction_method: get_string("extraction_method")?,
    created_at,
    updated_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use rag_core::document::DocumentChunk;
  use tempfile::TempDir;

  async fn test_store() -> (TempDir, VectorStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = VectorStore::open_at_path(temp_dir.path().join("test.lancedb"), 4).await.unwrap();
    (temp_dir, store)
  }

  fn test_document(source: &str, hash: &str) -> Document {
    Document::new("Title".into(), source.into(), DocumentSource::File, hash.into(), 100, 1, "plain_text".into())
  }

  #[tokio::test]
  async fn add_and_get_document_roundtrips() {
    let (_temp, store) = test_store().await;
    let doc = test_document("a.md", "hash-a");
    store.add_document(&doc).await.unwrap();

    let retrieved = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(retrieved.source, "a.md");
    assert_eq!(retrieved.content_hash, "hash-a");
  }

  #[tokio::test]
  async fn find_by_hash_locates_moved_document() {
    let (_temp, store) = test_store().await;
    let doc = test_document("old/path.md", "same-hash");
    store.add_document(&doc).await.unwrap();

    let found = store.find_document_by_hash("same-hash").await.unwrap().unwrap();
    assert_eq!(found.source, "old/path.md");
  }

  #[tokio::test]
  async fn replace_document_swaps_old_rows_for_new() {
    let (_temp, store) = test_store().await;
    let old_doc = test_document("a.md", "hash-1");
    store.add_document(&old_doc).await.unwrap();
    let old_chunk = DocumentChunk::new(old_doc.id, "old content".into(), "Title".into(), "a.md".into(), DocumentSource::File, 0, 1, 0);
    store.add_chunk(&old_chunk, None).await.unwrap();

    let new_doc = test_document("a.md", "hash-2");
    let new_chunk = DocumentChunk::new(new_doc.id, "new content".into(), "Title".into(), "a.md".into(), DocumentSource::File, 0, 1, 0);
    store.replace_document(Some(&old_doc.id), &new_doc, &[new_chunk], &[None]).await.unwrap();

    assert!(store.get_document(&old_doc.id).await.unwrap().is_none());
    assert!(store.get_document(&new_doc.id).await.unwrap().is_some());
    assert_eq!(store.chunks_for_document(&old_doc.id).await.unwrap().len(), 0);
    assert_eq!(store.chunks_for_document(&new_doc.id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn is_document_indexed_reports_duplicate_when_old_path_still_exists() {
    let (temp, store) = test_store().await;
    let old_path = temp.path().join("old.md");
    std::fs::write(&old_path, "hello").unwrap();
    let doc = test_document(&old_path.to_string_lossy(), "same-hash");
    store.add_document(&doc).await.unwrap();

    let new_path = temp.path().join("new.md");
    std::fs::write(&new_path, "hello").unwrap();
    let state = store.is_document_indexed(&new_path.to_string_lossy(), "same-hash").await.unwrap();
    assert!(matches!(state, IndexedState::Duplicate(found) if found.id == doc.id));
  }

  #[tokio::test]
  async fn is_document_indexed_reports_moved_when_old_path_is_gone() {
    let (temp, store) = test_store().await;
    let old_path = temp.path().join("old.md");
    let doc = test_document(&old_path.to_string_lossy(), "same-hash");
    store.add_document(&doc).await.unwrap();

    let new_path = temp.path().join("new.md");
    let state = store.is_document_indexed(&new_path.to_string_lossy(), "same-hash").await.unwrap();
    assert!(matches!(state, IndexedState::Moved(found) if found.id == doc.id));
  }

  #[tokio::test]
  async fn move_document_rewrites_source_on_document_and_chunks() {
    let (_temp, store) = test_store().await;
    let doc = test_document("old/a.md", "hash-1");
    store.add_document(&doc).await.unwrap();
    let chunk = DocumentChunk::new(doc.id, "content".into(), "Title".into(), "old/a.md".into(), DocumentSource::File, 0, 1, 0);
    store.add_chunk(&chunk, None).await.unwrap();

    store.move_document(&doc, "new/a.md").await.unwrap();

    let moved = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(moved.source, "new/a.md");
    let moved_chunk = store.get_chunk(&chunk.id).await.unwrap().unwrap();
    assert_eq!(moved_chunk.source, "new/a.md");
  }

  #[tokio::test]
  async fn delete_document_facade_reports_not_found_for_unknown_path() {
    let (_temp, store) = test_store().await;
    let outcome = store.delete_document("missing.md").await.unwrap();
    assert!(!outcome.found);
    assert!(!outcome.document_deleted);
    assert_eq!(outcome.chunks_deleted, 0);
  }

  #[tokio::test]
  async fn delete_document_facade_removes_document_and_its_chunks() {
    let (_temp, store) = test_store().await;
    let doc = test_document("a.md", "hash-1");
    store.add_document(&doc).await.unwrap();
    let c1 = DocumentChunk::new(doc.id, "c1".into(), "Title".into(), "a.md".into(), DocumentSource::File, 0, 2, 0);
    let c2 = DocumentChunk::new(doc.id, "c2".into(), "Title".into(), "a.md".into(), DocumentSource::File, 1, 2, 10);
    store.add_chunk(&c1, None).await.unwrap();
    store.add_chunk(&c2, None).await.unwrap();

    let outcome = store.delete_document("a.md").await.unwrap();
    assert!(outcome.found);
    assert!(outcome.document_deleted);
    assert_eq!(outcome.chunks_deleted, 2);
    assert!(store.get_document(&doc.id).await.unwrap().is_none());
    assert_eq!(store.chunks_for_document(&doc.id).await.unwrap().len(), 0);
  }
}
