//! Splits extracted document text into retrievable chunks.
//!
//! Two strategies, selected by `ChunkConfig::semantic`:
//! - [`SemanticChunkingStrategy`] groups whole paragraphs up to the target
//!   size and falls back to the fixed strategy if a document has no usable
//!   paragraph breaks (e.g. a single giant line).
//! - [`FixedChunkingStrategy`] slides a fixed-size window with overlap,
//!   independent of document structure.

use rag_core::config::ChunkConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
  #[error("empty content")]
  EmptyContent,
}

pub type Result<T> = std::result::Result<T, ChunkError>;

/// A chunk of text plus its character offset into the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
  pub text: String,
  pub char_offset: usize,
}

trait ChunkingStrategy {
  fn chunk(&self, content: &str, config: &ChunkConfig) -> Vec<Chunk>;
}

fn is_valid(text: &str, config: &ChunkConfig) -> bool {
  text.trim().len() >= config.min_size
}

fn make_chunk(text: &str, offset: usize) -> Chunk {
  Chunk { text: text.trim().to_string(), char_offset: offset }
}

/// Paragraph-aware strategy: split on blank lines, then greedily pack
/// paragraphs into chunks no larger than `target_size`.
struct SemanticChunkingStrategy;

impl SemanticChunkingStrategy {
  fn split_into_paragraphs(content: &str) -> Vec<(&str, usize)> {
    let mut paragraphs = Vec::new();
    let mut offset = 0;
    for part in content.split("\n\n") {
      let trimmed = part.trim();
      if !trimmed.is_empty() {
        // recover the byte offset of the trimmed slice within `part`
        let lead = part.len() - part.trim_start().len();
        paragraphs.push((trimmed, offset + lead));
      }
      offset += part.len() + 2; // account for the separator we split on
    }
    paragraphs
  }

  fn build_chunks_from_paragraphs(paragraphs: &[(&str, usize)], config: &ChunkConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_offset = 0usize;

    for &(paragraph, offset) in paragraphs {
      let would_overflow = !current.is_empty() && current.len() + paragraph.len() + 2 > config.target_size;
      if would_overflow {
        Self::save_current_chunk(&mut chunks, &current, current_offset, config);
        current.clear();
      }
      if current.is_empty() {
        current_offset = offset;
      } else {
        current.push_str("\n\n");
      }
      current.push_str(paragraph);
    }
    Self::save_current_chunk(&mut chunks, &current, current_offset, config);
    chunks
  }

  fn save_current_chunk(chunks: &mut Vec<Chunk>, text: &str, offset: usize, config: &ChunkConfig) {
    if is_valid(text, config) {
      chunks.push(make_chunk(text, offset));
    }
  }
}

impl ChunkingStrategy for SemanticChunkingStrategy {
  fn chunk(&self, content: &str, config: &ChunkConfig) -> Vec<Chunk> {
    let paragraphs = Self::split_into_paragraphs(content);
    let chunks = Self::build_chunks_from_paragraphs(&paragraphs, config);
    if chunks.is_empty() {
      tracing::debug!("semantic chunking produced no chunks, falling back to fixed-window");
      FixedChunkingStrategy.chunk(content, config)
    } else {
      chunks
    }
  }
}

/// Structure-independent sliding window of `target_size` chars with
/// `overlap` chars carried into the next chunk.
struct FixedChunkingStrategy;

impl FixedChunkingStrategy {
  fn next_position(&self, pos: usize, len: usize, config: &ChunkConfig) -> usize {
    if pos + config.target_size >= len {
      return len;
    }
    pos + config.target_size - config.overlap.min(config.target_size.saturating_sub(1))
  }
}

impl ChunkingStrategy for FixedChunkingStrategy {
  fn chunk(&self, content: &str, config: &ChunkConfig) -> Vec<Chunk> {
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();
    if len == 0 {
      return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < len {
      let end = (pos + config.target_size).min(len);
      let slice: String = chars[pos..end].iter().collect();
      if is_valid(&slice, config) {
        chunks.push(make_chunk(&slice, pos));
      }
      if end >= len {
        break;
      }
      let next = self.next_position(pos, len, config);
      if next <= pos {
        break;
      }
      pos = next;
    }
    chunks
  }
}

/// Facade selecting a strategy by config, the only thing callers interact with.
pub struct TextChunker {
  config: ChunkConfig,
}

impl TextChunker {
  pub fn new(config: ChunkConfig) -> Self {
    Self { config }
  }

  pub fn chunk(&self, content: &str) -> Result<Vec<Chunk>> {
    if content.trim().is_empty() {
      return Err(ChunkError::EmptyContent);
    }
    let strategy: Box<dyn ChunkingStrategy> =
      if self.config.semantic { Box::new(SemanticChunkingStrategy) } else { Box::new(FixedChunkingStrategy) };
    Ok(strategy.chunk(content, &self.config))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(target_size: usize, overlap: usize, semantic: bool) -> ChunkConfig {
    ChunkConfig { semantic, target_size, min_size: 1, overlap }
  }

  #[test]
  fn rejects_empty_content() {
    let chunker = TextChunker::new(config(100, 10, true));
    assert!(matches!(chunker.chunk("   "), Err(ChunkError::EmptyContent)));
  }

  #[test]
  fn semantic_keeps_small_document_in_one_chunk() {
    let chunker = TextChunker::new(config(1000, 200, true));
    let chunks = chunker.chunk("Paragraph one.\n\nParagraph two.").unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].char_offset, 0);
  }

  #[test]
  fn semantic_splits_on_paragraph_boundaries() {
    let chunker = TextChunker::new(config(20, 5, true));
    let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
    let chunks = chunker.chunk(text).unwrap();
    assert!(chunks.len() >= 2);
  }

  #[test]
  fn semantic_falls_back_to_fixed_for_single_huge_paragraph() {
    let chunker = TextChunker::new(config(20, 5, true));
    let text = "a".repeat(100);
    let chunks = chunker.chunk(&text).unwrap();
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
  }

  #[test]
  fn fixed_window_respects_overlap() {
    let chunker = TextChunker::new(config(10, 3, false));
    let text = "0123456789abcdefghij";
    let chunks = chunker.chunk(text).unwrap();
    assert!(chunks.len() >= 2);
    // second chunk should start before the first one ends, by the overlap amount
    assert!(chunks[1].char_offset < chunks[0].char_offset + 10);
  }

  #[test]
  fn fixed_window_covers_whole_document() {
    let chunker = TextChunker::new(config(5, 1, false));
    let text = "abcdefghijklmno";
    let chunks = chunker.chunk(text).unwrap();
    let last = chunks.last().unwrap();
    assert_eq!(last.char_offset + last.text.chars().count(), text.chars().count());
  }

  #[test]
  fn min_size_filters_trailing_scraps() {
    let chunker = TextChunker::new(ChunkConfig { semantic: true, target_size: 20, min_size: 15, overlap: 2 });
    let text = "Long enough paragraph to count.\n\nhi";
    let chunks = chunker.chunk(text).unwrap();
    assert!(chunks.iter().all(|c| c.text.trim().len() >= 15));
  }
}
