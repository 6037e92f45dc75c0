//! The extraction boundary: turning an arbitrary file into plain text the
//! chunker can consume. Real extractors (PDF, EPUB, DOCX, OCR...) are
//! external collaborators behind the [`Extractor`] trait; this crate owns
//! the dispatch-by-extension [`Router`] and a couple of trivial built-ins
//! so the pipeline has something to run end to end.

use rag_core::document::DocumentSource;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("no extractor registered for extension {0:?}")]
  Unsupported(Option<String>),
  #[error("io error reading {path}: {source}")]
  Io { path: PathBuf, #[source] source: std::io::Error },
  #[error("extraction failed: {0}")]
  Failed(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// One unit of extracted text and the page it came from, for formats that
/// have pages. Extractors that don't (plain text) report a single page with
/// `page: None`.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
  pub text: String,
  pub page: Option<usize>,
}

/// Text pulled from a source, with just enough provenance to build a
/// `Document`/`DocumentChunk` pair downstream. Kept as one entry per page
/// rather than one flat string so the chunker can tag each chunk with the
/// page it was cut from.
#[derive(Debug, Clone)]
pub struct ExtractedText {
  pub title: String,
  pub pages: Vec<ExtractedPage>,
  pub source_type: DocumentSource,
  /// Tag identifying which extractor produced this text, e.g. `"plain_text"`.
  pub method: String,
}

impl ExtractedText {
  /// Full text across all pages, in page order, for callers that don't
  /// need per-page boundaries (e.g. the content hash fallback).
  pub fn full_text(&self) -> String {
    self.pages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n\n")
  }

  pub fn char_count(&self) -> usize {
    self.pages.iter().map(|p| p.text.chars().count()).sum()
  }
}

/// External contract: given a file on disk, produce its text.
pub trait Extractor: Send + Sync {
  /// File extensions (without the dot, lowercase) this extractor handles.
  fn extensions(&self) -> &[&'static str];

  fn extract(&self, path: &Path) -> Result<ExtractedText>;
}

fn title_from_path(path: &Path) -> String {
  path.file_stem().and_then(|s| s.to_str()).unwrap_or("untitled").to_string()
}

/// Reads the file as UTF-8 text verbatim; handles `.txt`, `.md`, `.rst`.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
  fn extensions(&self) -> &[&'static str] {
    &["txt", "md", "markdown", "rst"]
  }

  fn extract(&self, path: &Path) -> Result<ExtractedText> {
    let content = std::fs::read_to_string(path).map_err(|source| ExtractError::Io { path: path.to_path_buf(), source })?;
    Ok(ExtractedText {
      title: title_from_path(path),
      pages: vec![ExtractedPage { text: content, page: None }],
      source_type: DocumentSource::File,
      method: "plain_text".to_string(),
    })
  }
}

/// Dispatches extraction by file extension to a registered [`Extractor`].
/// Unknown extensions are a hard `Unsupported` error — the caller (the
/// pipeline's chunk stage) treats that as a validation rejection, not a
/// crash.
pub struct Router {
  extractors: Vec<Box<dyn Extractor>>,
}

impl Default for Router {
  fn default() -> Self {
    let mut router = Self::empty();
    router.register(Box::new(PlainTextExtractor));
    router
  }
}

impl Router {
  pub fn empty() -> Self {
    Self { extractors: Vec::new() }
  }

  pub fn register(&mut self, extractor: Box<dyn Extractor>) {
    self.extractors.push(extractor);
  }

  pub fn is_indexable(&self, path: &Path) -> bool {
    self.find(path).is_some()
  }

  fn find(&self, path: &Path) -> Option<&dyn Extractor> {
    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase())?;
    self.extractors.iter().find(|e| e.extensions().contains(&ext.as_str())).map(|b| b.as_ref())
  }

  pub fn extract(&self, path: &Path) -> Result<ExtractedText> {
    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase());
    match self.find(path) {
      Some(extractor) => extractor.extract(path),
      None => Err(ExtractError::Unsupported(ext)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn routes_markdown_to_plain_text_extractor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("note.md");
    std::fs::write(&path, "# hello\n\nworld").unwrap();

    let router = Router::default();
    assert!(router.is_indexable(&path));
    let extracted = router.extract(&path).unwrap();
    assert_eq!(extracted.title, "note");
    assert_eq!(extracted.method, "plain_text");
    assert_eq!(extracted.pages.len(), 1);
    assert!(extracted.pages[0].text.contains("hello"));
    assert_eq!(extracted.pages[0].page, None);
  }

  #[test]
  fn unknown_extension_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.png");
    std::fs::write(&path, b"\x89PNG").unwrap();

    let router = Router::default();
    assert!(!router.is_indexable(&path));
    assert!(matches!(router.extract(&path), Err(ExtractError::Unsupported(Some(ext))) if ext == "png"));
  }

  #[test]
  fn missing_file_surfaces_io_error() {
    let router = Router::default();
    let result = router.extract(Path::new("/nonexistent/file.txt"));
    assert!(matches!(result, Err(ExtractError::Io { .. })));
  }
}
