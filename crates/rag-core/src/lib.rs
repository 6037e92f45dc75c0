pub mod config;
pub mod document;
pub mod error;
pub mod hash;
pub mod progress;

pub use config::Config;
pub use document::{Document, DocumentChunk, DocumentId, DocumentSource};
pub use error::{Error, Result};
pub use hash::FileHasher;
pub use progress::{ProcessingProgress, ProcessingStatus};
