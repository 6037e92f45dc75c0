use arrow_array::{Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array};
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use rag_core::progress::{ProcessingProgress, ProcessingStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::{Result, StoreError, VectorStore};
use crate::schema::processing_progress_schema;

/// Tracks where each file is in the pipeline, across restarts. Holds an
/// in-memory cache over the `processing_progress` table so the Sanitizer's
/// startup scan doesn't pay a round trip per file.
pub struct ProgressTracker {
  store: Arc<VectorStore>,
  cache: Mutex<HashMap<String, ProcessingProgress>>,
}

impl ProgressTracker {
  pub fn new(store: Arc<VectorStore>) -> Self {
    Self { store, cache: Mutex::new(HashMap::new()) }
  }

  /// Start (or resume) processing a file. If a row already exists with the
  /// same hash, it is returned unchanged so the caller resumes from
  /// `last_chunk_end`. If the hash differs, the stale row is discarded.
  pub async fn start_processing(&self, file_path: &str, file_hash: &str) -> Result<ProcessingProgress> {
    if let Some(existing) = self.get_progress(file_path).await? {
      if existing.file_hash == file_hash {
        return Ok(existing);
      }
      self.delete(file_path).await?;
    }

    let progress = ProcessingProgress::start(file_path.to_string(), file_hash.to_string());
    self.upsert(&progress).await?;
    Ok(progress)
  }

  pub async fn set_total_chunks(&self, file_path: &str, total_chunks: usize) -> Result<()> {
    let mut progress = self.require(file_path).await?;
    progress.total_chunks = total_chunks;
    progress.last_updated = Utc::now();
    self.upsert(&progress).await
  }

  pub async fn update_progress(&self, file_path: &str, chunks_processed: usize, last_chunk_end: usize) -> Result<()> {
    let mut progress = self.require(file_path).await?;
    progress.chunks_processed = chunks_processed;
    progress.last_chunk_end = last_chunk_end;
    progress.last_updated = Utc::now();
    self.upsert(&progress).await
  }

  pub async fn mark_completed(&self, file_path: &str) -> Result<()> {
    let mut progress = self.require(file_path).await?;
    progress.status = ProcessingStatus::Completed;
    let now = Utc::now();
    progress.last_updated = now;
    progress.completed_at = Some(now);
    self.upsert(&progress).await
  }

  pub async fn mark_failed(&self, file_path: &str, error: &str) -> Result<()> {
    let mut progress = self.require(file_path).await?;
    progress.status = ProcessingStatus::Failed;
    progress.error_message = Some(error.to_string());
    progress.last_updated = Utc::now();
    self.upsert(&progress).await
  }

  /// Validation rejected the file outright. Creates a row if none exists, so
  /// a file rejected on its first attempt still shows up in rejected_files.
  pub async fn mark_rejected(&self, file_path: &str, file_hash: &str, check: &str, reason: &str) -> Result<()> {
    let mut progress = match self.get_progress(file_path).await? {
      Some(p) => p,
      None => ProcessingProgress::start(file_path.to_string(), file_hash.to_string()),
    };
    progress.status = ProcessingStatus::Rejected;
    progress.error_message = Some(format!("Validation failed ({check}): {reason}"));
    progress.last_updated = Utc::now();
    self.upsert(&progress).await
  }

  pub async fn get_progress(&self, file_path: &str) -> Result<Option<ProcessingProgress>> {
    if let Some(cached) = self.cache.lock().unwrap().get(file_path) {
      return Ok(Some(cached.clone()));
    }
    let table = self.store.progress_table().await?;
    let escaped = file_path.replace('\'', "''");
    let results: Vec<RecordBatch> = table.query().only_if(format!("file_path = '{escaped}'")).execute().await?.try_collect().await?;
    match results.first() {
      Some(batch) if batch.num_rows() > 0 => {
        let progress = batch_to_progress(batch, 0)?;
        self.cache.lock().unwrap().insert(file_path.to_string(), progress.clone());
        Ok(Some(progress))
      }
      _ => Ok(None),
    }
  }

  pub async fn get_incomplete_files(&self) -> Result<Vec<ProcessingProgress>> {
    self.query_by_status(ProcessingStatus::InProgress).await
  }

  /// Newest rejection first.
  pub async fn get_rejected_files(&self) -> Result<Vec<ProcessingProgress>> {
    let mut rows = self.query_by_status(ProcessingStatus::Rejected).await?;
    rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    Ok(rows)
  }

  /// Completed rows, used by the sanitizer's orphan scan.
  pub async fn get_completed_files(&self) -> Result<Vec<ProcessingProgress>> {
    self.query_by_status(ProcessingStatus::Completed).await
  }

  pub async fn delete(&self, file_path: &str) -> Result<()> {
    let table = self.store.progress_table().await?;
    let escaped = file_path.replace('\'', "''");
    table.delete(&format!("file_path = '{escaped}'")).await?;
    self.cache.lock().unwrap().remove(file_path);
    Ok(())
  }

  /// Re-key a progress row after its file moved on disk. Keeps
  /// `chunks_processed`/`last_chunk_end` so a move mid-ingest still resumes
  /// from where it left off rather than starting the file over.
  pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
    let Some(mut progress) = self.get_progress(old_path).await? else {
      return Ok(());
    };
    self.delete(old_path).await?;
    progress.file_path = new_path.to_string();
    self.upsert(&progress).await
  }

  pub fn clear_cache(&self) {
    self.cache.lock().unwrap().clear();
  }

  /// Populate the cache from the table in one query.
  pub async fn preload_all(&self) -> Result<()> {
    let table = self.store.progress_table().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;
    let mut cache = self.cache.lock().unwrap();
    for batch in &results {
      for i in 0..batch.num_rows() {
        let progress = batch_to_progress(batch, i)?;
        cache.insert(progress.file_path.clone(), progress);
      }
    }
    Ok(())
  }

  async fn require(&self, file_path: &str) -> Result<ProcessingProgress> {
    self.get_progress(file_path).await?.ok_or_else(|| StoreError::NotFound(format!("no progress row for {file_path}")))
  }

  async fn query_by_status(&self, status: ProcessingStatus) -> Result<Vec<ProcessingProgress>> {
    let table = self.store.progress_table().await?;
    let results: Vec<RecordBatch> = table.query().only_if(format!("status = '{}'", status.as_str())).execute().await?.try_collect().await?;
    let mut rows = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_progress(&batch, i)?);
      }
    }
    Ok(rows)
  }

  async fn upsert(&self, progress: &ProcessingProgress) -> Result<()> {
    let table = self.store.progress_table().await?;
    let escaped = progress.file_path.replace('\'', "''");
    table.delete(&format!("file_path = '{escaped}'")).await?;
    let batch = progress_to_batch(progress)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], processing_progress_schema());
    table.add(Box::new(batches)).execute().await?;
    self.cache.lock().unwrap().insert(progress.file_path.clone(), progress.clone());
    Ok(())
  }
}

fn progress_to_batch(progress: &ProcessingProgress) -> Result<RecordBatch> {
  Ok(RecordBatch::try_new(
    processing_progress_schema(),
    vec![
      Arc::new(StringArray::from(vec![progress.file_path.clone()])),
      Arc::new(StringArray::from(vec![progress.file_hash.clone()])),
      Arc::new(UInt32Array::from(vec![progress.total_chunks as u32])),
      Arc::new(UInt32Array::from(vec![progress.chunks_processed as u32])),
      Arc::new(StringArray::from(vec![progress.status.as_str().to_string()])),
      Arc::new(UInt32Array::from(vec![progress.last_chunk_end as u32])),
      Arc::new(StringArray::from(vec![progress.error_message.clone()])),
      Arc::new(Int64Array::from(vec![progress.started_at.timestamp_millis()])),
      Arc::new(Int64Array::from(vec![progress.last_updated.timestamp_millis()])),
      Arc::new(Int64Array::from(vec![progress.completed_at.map(|t| t.timestamp_millis())])),
    ],
  )?)
}

fn batch_to_progress(batch: &RecordBatch, row: usize) -> Result<ProcessingProgress> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| StoreError::NotFound(format!("column {name}")))
  };
  let get_optional_string = |name: &str| -> Option<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .filter(|a| !a.is_null(row))
      .map(|a| a.value(row).to_string())
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
  let get_optional_i64 = |name: &str| -> Option<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .filter(|a| !a.is_null(row))
      .map(|a| a.value(row))
  };

  let status = get_string("status")?.parse::<ProcessingStatus>().map_err(StoreError::NotFound)?;
  let started_at = Utc.timestamp_millis_opt(get_i64("started_at")?).single().ok_or_else(|| StoreError::NotFound("invalid started_at".into()))?;
  let last_updated = Utc.timestamp_millis_opt(get_i64("last_updated")?).single().ok_or_else(|| StoreError::NotFound("invalid last_updated".into()))?;
  let completed_at = get_optional_i64("completed_at").and_then(|ms| Utc.timestamp_millis_opt(ms).single());

  Ok(ProcessingProgress {
    file_path: get_string("file_path")?,
    file_hash: get_string("file_hash")?,
    total_chunks: get_u32("total_chunks")? as usize,
    chunks_processed: get_u32("chunks_processed")? as usize,
    status,
    last_chunk_end: get_u32("last_chunk_end")? as usize,
    error_message: get_optional_string("error_message"),
    started_at,
    last_updated,
    completed_at,
  })
}
