use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Default embedding width; overridden at table-creation time by whatever
/// `EmbeddingProvider::dimensions()` reports.
pub const DEFAULT_VECTOR_DIM: usize = 4096;

fn vector_field(vector_dim: usize) -> Field {
  Field::new(
    "vector",
    DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
    true,
  )
}

/// One row per ingested document (a file, URL, or inline submission).
pub fn documents_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("title", DataType::Utf8, false),
    Field::new("source", DataType::Utf8, false),
    Field::new("source_type", DataType::Utf8, false),
    Field::new("content_hash", DataType::Utf8, false),
    Field::new("char_count", DataType::UInt32, false),
    Field::new("chunk_count", DataType::UInt32, false),
    Field::new("extraction_method", DataType::Utf8, false),
    Field::new("created_at", DataType::Int64, false),
    Field::new("updated_at", DataType::Int64, false),
  ]))
}

/// One row per chunk: the unit both the vector index and the keyword index
/// key off of.
pub fn chunks_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("document_id", DataType::Utf8, false),
    Field::new("content", DataType::Utf8, false),
    Field::new("title", DataType::Utf8, false),
    Field::new("source", DataType::Utf8, false),
    Field::new("source_type", DataType::Utf8, false),
    Field::new("chunk_index", DataType::UInt32, false),
    Field::new("total_chunks", DataType::UInt32, false),
    Field::new("char_offset", DataType::UInt32, false),
    Field::new("page", DataType::UInt32, true),
    Field::new("created_at", DataType::Int64, false),
    Field::new("updated_at", DataType::Int64, false),
    vector_field(vector_dim),
  ]))
}

/// Resumable per-file processing state; see `progress` module.
pub fn processing_progress_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("file_path", DataType::Utf8, false),
    Field::new("file_hash", DataType::Utf8, false),
    Field::new("total_chunks", DataType::UInt32, false),
    Field::new("chunks_processed", DataType::UInt32, false),
    Field::new("status", DataType::Utf8, false),
    Field::new("last_chunk_end", DataType::UInt32, false),
    Field::new("error_message", DataType::Utf8, true),
    Field::new("started_at", DataType::Int64, false),
    Field::new("last_updated", DataType::Int64, false),
    Field::new("completed_at", DataType::Int64, true),
  ]))
}
