use lancedb::{Connection, connect};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{chunks_schema, documents_schema, processing_progress_schema};

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("lancedb error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub const DOCUMENTS_TABLE: &str = "documents";
pub const CHUNKS_TABLE: &str = "chunks";
pub const PROGRESS_TABLE: &str = "processing_progress";

/// Connection to the knowledge base's embedded LanceDB instance, plus
/// idempotent table creation. There is one of these per running daemon —
/// this is not a per-project registry, the knowledge base root is fixed
/// at startup.
pub struct VectorStore {
  pub path: PathBuf,
  pub connection: Connection,
  pub vector_dim: usize,
}

impl VectorStore {
  pub async fn open(base_path: &std::path::Path, vector_dim: usize) -> Result<Self> {
    let db_path = base_path.join("lancedb");
    Self::open_at_path(db_path, vector_dim).await
  }

  pub async fn open_at_path(db_path: PathBuf, vector_dim: usize) -> Result<Self> {
    if let Some(parent) = db_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    info!(path = %db_path.display(), "opening lancedb");
    let connection = connect(db_path.to_string_lossy().as_ref()).execute().await?;

    let store = Self { path: db_path, connection, vector_dim };
    store.ensure_tables().await?;
    Ok(store)
  }

  /// Creates any of the three core tables that don't already exist. Graph
  /// tables are deliberately not created here: the extractor in this build
  /// never emits graph metadata, so the facade works entirely without them
  /// and callers that look for graph tables must tolerate their absence.
  async fn ensure_tables(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;

    if !table_names.iter().any(|n| n == DOCUMENTS_TABLE) {
      debug!("creating documents table");
      self.connection.create_empty_table(DOCUMENTS_TABLE, documents_schema()).execute().await?;
    }

    if !table_names.iter().any(|n| n == CHUNKS_TABLE) {
      debug!("creating chunks table");
      self.connection.create_empty_table(CHUNKS_TABLE, chunks_schema(self.vector_dim)).execute().await?;
    }

    if !table_names.iter().any(|n| n == PROGRESS_TABLE) {
      debug!("creating processing_progress table");
      self.connection.create_empty_table(PROGRESS_TABLE, processing_progress_schema()).execute().await?;
    }

    Ok(())
  }

  pub async fn documents_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table(DOCUMENTS_TABLE).execute().await?)
  }

  pub async fn chunks_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table(CHUNKS_TABLE).execute().await?)
  }

  pub async fn progress_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table(PROGRESS_TABLE).execute().await?)
  }

  /// Rebuilds the ANN index over the `chunks` table's vector column.
  /// LanceDB picks the index type itself; this is the maintenance API's
  /// escape hatch for after a large bulk ingest where the auto-built index
  /// has gone stale.
  pub async fn rebuild_vector_index(&self) -> Result<()> {
    let table = self.chunks_table().await?;
    table.create_index(&["vector"], lancedb::index::Index::Auto).execute().await?;
    Ok(())
  }
}

/// Base data directory. Precedence: `DATA_DIR` override, `XDG_DATA_HOME`,
/// platform default.
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }
  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("ragd");
  }
  dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("ragd")
}

pub fn default_config_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("CONFIG_DIR") {
    return PathBuf::from(dir);
  }
  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("ragd");
  }
  dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("ragd")
}

pub fn default_cache_dir() -> PathBuf {
  if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
    return PathBuf::from(xdg_cache).join("ragd");
  }
  dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("ragd")
}

/// HTTP listen port. Respects `PORT`, defaults to 8642.
pub fn default_port() -> u16 {
  std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8642)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;
  use tempfile::TempDir;

  static ENV_MUTEX: Mutex<()> = Mutex::new(());

  #[tokio::test]
  async fn open_creates_the_three_core_tables() {
    let temp_dir = TempDir::new().unwrap();
    let store = VectorStore::open_at_path(temp_dir.path().join("test.lancedb"), 128).await.unwrap();

    let tables = store.connection.table_names().execute().await.unwrap();
    assert!(tables.iter().any(|n| n == DOCUMENTS_TABLE));
    assert!(tables.iter().any(|n| n == CHUNKS_TABLE));
    assert!(tables.iter().any(|n| n == PROGRESS_TABLE));
  }

  #[tokio::test]
  async fn reopening_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.lancedb");
    VectorStore::open_at_path(path.clone(), 128).await.unwrap();
    let store = VectorStore::open_at_path(path, 128).await.unwrap();
    let tables = store.connection.table_names().execute().await.unwrap();
    assert_eq!(tables.len(), 3);
  }

  #[test]
  fn default_port_falls_back_to_8642() {
    let _guard = ENV_MUTEX.lock().unwrap();
    unsafe {
      std::env::remove_var("PORT");
    }
    assert_eq!(default_port(), 8642);
  }

  #[test]
  fn data_dir_override_takes_precedence() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let original = std::env::var("DATA_DIR").ok();
    unsafe {
      std::env::set_var("DATA_DIR", "/custom/data/path");
    }
    assert_eq!(default_data_dir(), PathBuf::from("/custom/data/path"));
    unsafe {
      match &original {
        Some(v) => std::env::set_var("DATA_DIR", v),
        None => std::env::remove_var("DATA_DIR"),
      }
    }
  }

  #[test]
  fn xdg_data_home_used_when_no_override() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let original_data_dir = std::env::var("DATA_DIR").ok();
    let original_xdg = std::env::var("XDG_DATA_HOME").ok();
    unsafe {
      std::env::remove_var("DATA_DIR");
      std::env::set_var("XDG_DATA_HOME", "/xdg/data");
    }
    assert_eq!(default_data_dir(), PathBuf::from("/xdg/data/ragd"));
    unsafe {
      match &original_data_dir {
        Some(v) => std::env::set_var("DATA_DIR", v),
        None => std::env::remove_var("DATA_DIR"),
      }
      match &original_xdg {
        Some(v) => std::env::set_var("XDG_DATA_HOME", v),
        None => std::env::remove_var("XDG_DATA_HOME"),
      }
    }
  }
}
