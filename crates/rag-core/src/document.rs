use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a document (newtype for type safety)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
  pub fn new() -> Self {
    Self(Uuid::now_v7()) // time-ordered so listings sort by ingestion order
  }

  pub fn from_uuid(id: Uuid) -> Self {
    Self(id)
  }

  pub fn as_uuid(&self) -> Uuid {
    self.0
  }
}

impl Default for DocumentId {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Display for DocumentId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl std::str::FromStr for DocumentId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self(Uuid::parse_str(s)?))
  }
}

/// Origin of a document's bytes, as reported by the extractor that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
  File,
  Url,
  Content,
}

impl DocumentSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      DocumentSource::File => "file",
      DocumentSource::Url => "url",
      DocumentSource::Content => "content",
    }
  }
}

impl std::str::FromStr for DocumentSource {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "file" => Ok(DocumentSource::File),
      "url" => Ok(DocumentSource::Url),
      "content" => Ok(DocumentSource::Content),
      _ => Err(format!("unknown document source: {s}")),
    }
  }
}

/// A single retrievable unit of a document: the row the vector and keyword
/// indexes both key off of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
  pub id: DocumentId,
  pub document_id: DocumentId,

  pub content: String,
  pub title: String,
  pub source: String,
  pub source_type: DocumentSource,

  pub chunk_index: usize,
  pub total_chunks: usize,
  pub char_offset: usize,
  /// Page number as reported by the extractor, when the source format has
  /// pages. `None` for formats extraction never paginates (plain text).
  pub page: Option<usize>,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl DocumentChunk {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    document_id: DocumentId,
    content: String,
    title: String,
    source: String,
    source_type: DocumentSource,
    chunk_index: usize,
    total_chunks: usize,
    char_offset: usize,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: DocumentId::new(),
      document_id,
      content,
      title,
      source,
      source_type,
      chunk_index,
      total_chunks,
      char_offset,
      page: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn with_page(mut self, page: Option<usize>) -> Self {
    self.page = page;
    self
  }
}

/// Metadata about a fully ingested document, one row per distinct source path/url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
  pub id: DocumentId,
  pub title: String,
  pub source: String,
  pub source_type: DocumentSource,

  /// SHA-256 of the file's raw bytes, used as content identity for
  /// move/duplicate detection.
  pub content_hash: String,
  pub char_count: usize,
  pub chunk_count: usize,
  /// Tag reported by the extractor that produced this document, e.g.
  /// `"plain_text"` or `"docling_hybrid"`.
  pub extraction_method: String,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Document {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    title: String,
    source: String,
    source_type: DocumentSource,
    content_hash: String,
    char_count: usize,
    chunk_count: usize,
    extraction_method: String,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: DocumentId::new(),
      title,
      source,
      source_type,
      content_hash,
      char_count,
      chunk_count,
      extraction_method,
      created_at: now,
      updated_at: now,
    }
  }

  /// SHA-256 of inline text, for sources with no backing file to hash
  /// directly (`DocumentSource::Content`, `DocumentSource::Url`). File
  /// ingestion uses [`crate::hash::FileHasher`] instead.
  pub fn hash_content(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
  }
}
