use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_CHUNK_SIZE: usize = 8192;

/// Content identity for a file on disk. SHA-256 of the raw bytes, streamed
/// in fixed-size reads so hashing a large PDF never requires loading it
/// whole into memory. This hash, not the extracted text, is what the store
/// uses for move/duplicate detection: two extractors run over the same
/// bytes can disagree on the text they produce, but never on the bytes.
pub struct FileHasher;

impl FileHasher {
  pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
      let n = file.read(&mut buf)?;
      if n == 0 {
        break;
      }
      hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
  }
}
