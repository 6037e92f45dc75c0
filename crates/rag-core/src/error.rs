use thiserror::Error;

/// Top-level error taxonomy. Every crate in the workspace defines its own
/// `thiserror` enum for the errors it can produce locally; this is the one
/// the HTTP layer sees once those are folded together, and it maps directly
/// onto the error-kind table the rest of the system is documented against.
#[derive(Error, Debug)]
pub enum Error {
  #[error("extraction failed for {doc_source}: {reason}")]
  ExtractionFailed { doc_source: String, reason: String },

  #[error("validation rejected {doc_source}: {reason}")]
  ValidationRejected { doc_source: String, reason: String },

  #[error("embedding failed: {0}")]
  EmbeddingFailed(String),

  #[error("store conflict on {entity} {id}")]
  StoreConflict { entity: &'static str, id: String },

  #[error("move detected: {from} -> {to}")]
  MoveDetected { from: String, to: String },

  #[error("duplicate content: {doc_source} matches existing document {existing}")]
  DuplicateContent { doc_source: String, existing: String },

  #[error("queue closed")]
  QueueClosed,

  #[error("invalid configuration: {0}")]
  ConfigInvalid(String),

  #[error("schema migration failed: {0}")]
  SchemaMigrationFailed(String),

  #[error("backpressure timeout waiting on {stage}")]
  BackpressureTimeout { stage: &'static str },

  #[error("not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// HTTP status the daemon's route handlers should respond with.
  pub fn status_code(&self) -> u16 {
    match self {
      Error::NotFound { .. } => 404,
      Error::ValidationRejected { .. } | Error::ConfigInvalid(_) => 400,
      Error::StoreConflict { .. } | Error::DuplicateContent { .. } | Error::MoveDetected { .. } => 409,
      Error::BackpressureTimeout { .. } => 503,
      Error::QueueClosed | Error::SchemaMigrationFailed(_) => 500,
      Error::ExtractionFailed { .. } | Error::EmbeddingFailed(_) | Error::Io(_) => 500,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
