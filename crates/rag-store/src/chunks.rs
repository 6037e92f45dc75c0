use arrow_array::{
  Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array,
};
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use rag_core::document::{DocumentChunk, DocumentId, DocumentSource};
use std::sync::Arc;

use crate::connection::{Result, StoreError, VectorStore};
use crate::schema::chunks_schema;

impl VectorStore {
  pub async fn add_chunk(&self, chunk: &DocumentChunk, vector: Option<&[f32]>) -> Result<()> {
    let table = self.chunks_table().await?;
    let batch = chunk_to_batch(chunk, vector, self.vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema(self.vector_dim));
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn add_chunks(&self, chunks: &[DocumentChunk], vectors: &[Option<Vec<f32>>]) -> Result<()> {
    if chunks.is_empty() {
      return Ok(());
    }
    let table = self.chunks_table().await?;
    let batches: Vec<RecordBatch> =
      chunks.iter().zip(vectors.iter()).map(|(c, v)| chunk_to_batch(c, v.as_deref(), self.vector_dim)).collect::<Result<_>>()?;
    let schema = chunks_schema(self.vector_dim);
    let iter = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
    table.add(Box::new(iter)).execute().await?;
    Ok(())
  }

  pub async fn get_chunk(&self, id: &DocumentId) -> Result<Option<DocumentChunk>> {
    let table = self.chunks_table().await?;
    let results: Vec<RecordBatch> = table.query().only_if(format!("id = '{id}'")).execute().await?.try_collect().await?;
    match results.first() {
      Some(batch) if batch.num_rows() > 0 => Ok(Some(batch_to_chunk(batch, 0)?)),
      _ => Ok(None),
    }
  }

  pub async fn vector_search(&self, query_vector: &[f32], limit: usize, filter: Option<&str>) -> Result<Vec<(DocumentChunk, f32)>> {
    let table = self.chunks_table().await?;
    let query = match filter {
      Some(f) => table.vector_search(query_vector.to_vec())?.limit(limit).only_if(f),
      None => table.vector_search(query_vector.to_vec())?.limit(limit),
    };
    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

    let mut chunks = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        let chunk = batch_to_chunk(&batch, i)?;
        let distance = batch
          .column_by_name("_distance")
          .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
          .map(|arr| arr.value(i))
          .unwrap_or(0.0);
        chunks.push((chunk, distance));
      }
    }
    Ok(chunks)
  }

  pub async fn list_chunks(&self, filter: Option<&str>, limit: Option<usize>) -> Result<Vec<DocumentChunk>> {
    let table = self.chunks_table().await?;
    let query = match (filter, limit) {
      (Some(f), Some(l)) => table.query().only_if(f).limit(l),
      (Some(f), None) => table.query().only_if(f),
      (None, Some(l)) => table.query().limit(l),
      (None, None) => table.query(),
    };
    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;
    let mut chunks = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        chunks.push(batch_to_chunk(&batch, i)?);
      }
    }
    Ok(chunks)
  }

  pub async fn chunks_for_document(&self, document_id: &DocumentId) -> Result<Vec<DocumentChunk>> {
    self.list_chunks(Some(&format!("document_id = '{document_id}'")), None).await
  }

  pub async fn delete_chunks_for_document(&self, document_id: &DocumentId) -> Result<()> {
    let table = self.chunks_table().await?;
    table.delete(&format!("document_id = '{document_id}'")).await?;
    Ok(())
  }

  pub async fn delete_chunk(&self, id: &DocumentId) -> Result<()> {
    let table = self.chunks_table().await?;
    table.delete(&format!("id = '{id}'")).await?;
    Ok(())
  }

  pub async fn count_chunks(&self, filter: Option<&str>) -> Result<usize> {
    let table = self.chunks_table().await?;
    Ok(table.count_rows(filter.map(|s| s.to_string())).await?)
  }
}

fn chunk_to_batch(chunk: &DocumentChunk, vector: Option<&[f32]>, vector_dim: usize) -> Result<RecordBatch> {
  let id = StringArray::from(vec![chunk.id.to_string()]);
  let document_id = StringArray::from(vec![chunk.document_id.to_string()]);
  let content = StringArray::from(vec![chunk.content.clone()]);
  let title = StringArray::from(vec![chunk.title.clone()]);
  let source = StringArray::from(vec![chunk.source.clone()]);
  let source_type = StringArray::from(vec![chunk.source_type.as_str().to_string()]);
  let chunk_index = UInt32Array::from(vec![chunk.chunk_index as u32]);
  let total_chunks = UInt32Array::from(vec![chunk.total_chunks as u32]);
  let char_offset = UInt32Array::from(vec![chunk.char_offset as u32]);
  let page = UInt32Array::from(vec![chunk.page.map(|p| p as u32)]);
  let created_at = Int64Array::from(vec![chunk.created_at.timestamp_millis()]);
  let updated_at = Int64Array::from(vec![chunk.updated_at.timestamp_millis()]);

  let item_field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = match vector {
    Some(v) => {
      let mut padded = v.to_vec();
      padded.resize(vector_dim, 0.0);
      FixedSizeListArray::try_new(item_field, vector_dim as i32, Arc::new(Float32Array::from(padded)), None)?
    }
    None => {
      let nulls = Float32Array::from(vec![0.0f32; vector_dim]);
      FixedSizeListArray::try_new(item_field, vector_dim as i32, Arc::new(nulls), Some(vec![false].into()))?
    }
  };

  Ok(RecordBatch::try_new(
    chunks_schema(vector_dim),
    vec![
      Arc::new(id),
      Arc::new(document_id),
      Arc::new(content),
      Arc::new(title),
      Arc::new(source),
      Arc::new(source_type),
      Arc::new(chunk_index),
      Arc::new(total_chunks),
      Arc::new(char_offset),
      Arc::new(page),
      Arc::new(created_at),
      Arc::new(updated_at),
      Arc::new(vector_list),
    ],
  )?)
}

fn batch_to_chunk(batch: &RecordBatch, row: usize) -> Result<DocumentChunk> {
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
  let get_optional_u32 = |name: &str| -> Option<u32> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<UInt32Array>()).filter(|a| !a.is_null(row)).map(|a| a.value(row))
  };

  let source_type = get_string("source_type")?.parse::<DocumentSource>().map_err(StoreError::NotFound)?;
  let created_at = Utc.timestamp_millis_opt(get_i64("created_at")?).single().ok_or_else(|| StoreError::NotFound("invalid created_at".into()))?;
  let updated_at = Utc.timestamp_millis_opt(get_i64("updated_at")?).single().ok_or_else(|| StoreError::NotFound("invalid updated_at".into()))?;

  Ok(DocumentChunk {
    id: get_string("id")?.parse().map_err(|_| StoreError::NotFound("invalid id".into()))?,
    document_id: get_string("document_id")?.parse().map_err(|_| StoreError::NotFound("invalid document_id".into()))?,
    content: get_string("content")?,
    title: get_string("title")?,
    source: get_string("source")?,
    source_type,
    chunk_index: get_u32("chunk_index")? as usize,
    total_chunks: get_u32("total_chunks")? as usize,
    char_offset: get_u32("char_offset")? as usize,
    page: get_optional_u32("page").map(|p| p as usize),
    created_at,
    updated_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  async fn test_store() -> (TempDir, VectorStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = VectorStore::open_at_path(temp_dir.path().join("test.lancedb"), 8).await.unwrap();
    (temp_dir, store)
  }

  fn test_chunk() -> DocumentChunk {
    DocumentChunk::new(
      DocumentId::new(),
      "Test document content for searching".to_string(),
      "Test Document".to_string(),
      "/path/to/doc.md".to_string(),
      DocumentSource::File,
      0,
      1,
      0,
    )
  }

  #[tokio::test]
  async fn add_and_get_chunk_roundtrips() {
    let (_temp, store) = test_store().await;
    let chunk = test_chunk();
    store.add_chunk(&chunk, Some(&[0.1; 8])).await.unwrap();

    let retrieved = store.get_chunk(&chunk.id).await.unwrap().unwrap();
    assert_eq!(retrieved.content, chunk.content);
    assert_eq!(retrieved.title, chunk.title);
  }

  #[tokio::test]
  async fn page_number_roundtrips_when_present_and_absent() {
    let (_temp, store) = test_store().await;
    let paged = test_chunk().with_page(Some(3));
    let unpaged = test_chunk();
    store.add_chunk(&paged, None).await.unwrap();
    store.add_chunk(&unpaged, None).await.unwrap();

    assert_eq!(store.get_chunk(&paged.id).await.unwrap().unwrap().page, Some(3));
    assert_eq!(store.get_chunk(&unpaged.id).await.unwrap().unwrap().page, None);
  }

  #[tokio::test]
  async fn list_chunks_returns_everything_added() {
    let (_temp, store) = test_store().await;
    store.add_chunk(&test_chunk(), None).await.unwrap();
    store.add_chunk(&test_chunk(), None).await.unwrap();

    let chunks = store.list_chunks(None, None).await.unwrap();
    assert_eq!(chunks.len(), 2);
  }

  #[tokio::test]
  async fn delete_chunks_for_document_removes_all_its_rows() {
    let (_temp, store) = test_store().await;
    let doc_id = DocumentId::new();
    let c1 = DocumentChunk::new(doc_id, "Chunk 1".into(), "Doc".into(), "doc.md".into(), DocumentSource::File, 0, 2, 0);
    let c2 = DocumentChunk::new(doc_id, "Chunk 2".into(), "Doc".into(), "doc.md".into(), DocumentSource::File, 1, 2, 100);
    store.add_chunk(&c1, None).await.unwrap();
    store.add_chunk(&c2, None).await.unwrap();

    assert_eq!(store.list_chunks(None, None).await.unwrap().len(), 2);
    store.delete_chunks_for_document(&doc_id).await.unwrap();
    assert_eq!(store.list_chunks(None, None).await.unwrap().len(), 0);
  }

  #[tokio::test]
  async fn vector_search_returns_distance() {
    let (_temp, store) = test_store().await;
    store.add_chunk(&test_chunk(), Some(&[1.0; 8])).await.unwrap();

    let results = store.vector_search(&[1.0; 8], 5, None).await.unwrap();
    assert_eq!(results.len(), 1);
  }
}
