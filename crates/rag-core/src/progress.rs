use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a file's journey through the pipeline, persisted so a
/// restart can resume instead of re-walking everything from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
  InProgress,
  Completed,
  Failed,
  Rejected,
}

impl ProcessingStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ProcessingStatus::InProgress => "in_progress",
      ProcessingStatus::Completed => "completed",
      ProcessingStatus::Failed => "failed",
      ProcessingStatus::Rejected => "rejected",
    }
  }
}

impl std::str::FromStr for ProcessingStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "in_progress" => Ok(ProcessingStatus::InProgress),
      "completed" => Ok(ProcessingStatus::Completed),
      "failed" => Ok(ProcessingStatus::Failed),
      "rejected" => Ok(ProcessingStatus::Rejected),
      other => Err(format!("unknown processing status: {other}")),
    }
  }
}

/// One row per file the pipeline has ever started processing. Mirrors the
/// resumability checkpoint a crash-safe ingestion loop needs: on restart, any
/// row still `InProgress` is a candidate for resume or re-chunk-from-scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingProgress {
  pub file_path: String,
  pub file_hash: String,
  pub total_chunks: usize,
  pub chunks_processed: usize,
  pub status: ProcessingStatus,
  pub last_chunk_end: usize,
  pub error_message: Option<String>,
  pub started_at: DateTime<Utc>,
  pub last_updated: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingProgress {
  pub fn start(file_path: String, file_hash: String) -> Self {
    let now = Utc::now();
    Self {
      file_path,
      file_hash,
      total_chunks: 0,
      chunks_processed: 0,
      status: ProcessingStatus::InProgress,
      last_chunk_end: 0,
      error_message: None,
      started_at: now,
      last_updated: now,
      completed_at: None,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.total_chunks > 0 && self.chunks_processed >= self.total_chunks
  }
}
