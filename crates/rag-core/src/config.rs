//! Configuration, with per-project overrides.
//!
//! Config priority: project-relative (`.rag/config.toml`) > user
//! (`~/.config/ragd/config.toml`) > built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Embedding provider options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
  #[default]
  Ollama,
  OpenRouter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub provider: EmbeddingProvider,
  pub model: String,
  /// Must match the vector column's fixed-size-list width; changing this
  /// requires a full re-embed.
  pub dimensions: usize,
  pub ollama_url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub openrouter_api_key: Option<String>,
  /// Chunks per embed-stage batch request.
  pub batch_size: usize,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      provider: EmbeddingProvider::Ollama,
      model: "qwen3-embedding".to_string(),
      dimensions: 4096,
      ollama_url: "http://localhost:11434".to_string(),
      openrouter_api_key: None,
      batch_size: 32,
    }
  }
}

/// Chunking strategy knobs; see the Chunker component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
  /// Use paragraph-aware semantic chunking; falls back to fixed-window
  /// chunking if a document produces no usable paragraphs.
  pub semantic: bool,
  pub target_size: usize,
  pub min_size: usize,
  pub overlap: usize,
}

impl Default for ChunkConfig {
  fn default() -> Self {
    Self {
      semantic: true,
      target_size: 1000,
      min_size: 50,
      overlap: 200,
    }
  }
}

/// Worker-pool and backpressure sizing for the three-stage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub chunk_workers: usize,
  pub embed_workers: usize,
  pub store_workers: usize,
  pub max_pending_embeddings: usize,
  pub backpressure_timeout_secs: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      chunk_workers: 2,
      embed_workers: 4,
      store_workers: 2,
      max_pending_embeddings: 100,
      backpressure_timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Priority assigned to files discovered by the initial scan, as opposed
  /// to ones queued from a watch event or an explicit API request.
  pub default_priority: String,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self { default_priority: "normal".to_string() }
  }
}

/// Reciprocal-rank-fusion and ANN index tuning for hybrid search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub fusion_k0: f64,
  pub ann_m: usize,
  pub ann_ef_construction: usize,
  pub default_limit: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      fusion_k0: 60.0,
      ann_m: 16,
      ann_ef_construction: 64,
      default_limit: 10,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  pub debounce_ms: u64,
  pub batch_size: usize,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self { debounce_ms: 500, batch_size: 100 }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
  pub knowledge_base: PathBuf,
  pub max_file_size: usize,
}

impl Default for PathsConfig {
  fn default() -> Self {
    Self {
      knowledge_base: PathBuf::from("."),
      max_file_size: 20 * 1024 * 1024,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// In-memory progress-cache size; see ProgressTracker's preload path.
  pub max_entries: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { max_entries: 10_000 }
  }
}

/// Whether the startup sanitizer auto-repairs orphaned rows it finds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
  pub auto_repair_orphans: bool,
}

impl Default for SanitizerConfig {
  fn default() -> Self {
    Self { auto_repair_orphans: true }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub paths: PathsConfig,
  pub embedding: EmbeddingConfig,
  pub chunk: ChunkConfig,
  pub pipeline: PipelineConfig,
  pub queue: QueueConfig,
  pub search: SearchConfig,
  pub watcher: WatcherConfig,
  pub cache: CacheConfig,
  pub sanitizer: SanitizerConfig,
}

impl Config {
  /// Load config for a project, with fallback to the user config, with
  /// fallback to built-in defaults.
  pub fn load_for_project(project_path: &Path) -> Self {
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("ragd").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("ragd").join("config.toml"))
  }

  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".rag").join("config.toml")
  }

  pub fn needs_reembedding(&self, stored_dimensions: usize) -> bool {
    self.embedding.dimensions != stored_dimensions
  }

  pub fn generate_template() -> String {
    r#"# ragd configuration
# Place at .rag/config.toml (project) or ~/.config/ragd/config.toml (user)

[paths]
knowledge_base = "."
max_file_size = 20971520  # 20MB

[embedding]
provider = "ollama"
model = "qwen3-embedding"
dimensions = 4096
ollama_url = "http://localhost:11434"
batch_size = 32
# openrouter_api_key = "sk-or-..."  # or set OPENROUTER_API_KEY

[chunk]
semantic = true
target_size = 1000
min_size = 50
overlap = 200

[pipeline]
chunk_workers = 2
embed_workers = 4
store_workers = 2
max_pending_embeddings = 100
backpressure_timeout_secs = 30

[queue]
default_priority = "normal"

[search]
fusion_k0 = 60.0
ann_m = 16
ann_ef_construction = 64
default_limit = 10

[watcher]
debounce_ms = 500
batch_size = 100

[cache]
max_entries = 10000

[sanitizer]
auto_repair_orphans = true
"#
    .to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.embedding.dimensions, 4096);
    assert_eq!(config.search.fusion_k0, 60.0);
    assert_eq!(config.chunk.target_size, 1000);
  }

  #[test]
  fn load_project_config_overrides_defaults() {
    let temp = TempDir::new().unwrap();
    let rag_dir = temp.path().join(".rag");
    std::fs::create_dir_all(&rag_dir).unwrap();
    std::fs::write(
      rag_dir.join("config.toml"),
      "[embedding]\ndimensions = 768\n\n[chunk]\ntarget_size = 500\n",
    )
    .unwrap();

    let config = Config::load_for_project(temp.path());
    assert_eq!(config.embedding.dimensions, 768);
    assert_eq!(config.chunk.target_size, 500);
  }

  #[test]
  fn load_default_when_no_config_present() {
    let temp = TempDir::new().unwrap();
    let config = Config::load_for_project(temp.path());
    assert_eq!(config.embedding.dimensions, 4096);
  }

  #[test]
  fn toml_roundtrip_preserves_fields() {
    let config = Config {
      embedding: EmbeddingConfig {
        provider: EmbeddingProvider::OpenRouter,
        dimensions: 1536,
        ..Default::default()
      },
      ..Default::default()
    };
    let toml_str = toml::to_string_pretty(&config).unwrap();
    let parsed: Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.embedding.provider, EmbeddingProvider::OpenRouter);
    assert_eq!(parsed.embedding.dimensions, 1536);
  }

  #[test]
  fn needs_reembedding_detects_dimension_change() {
    let config = Config { embedding: EmbeddingConfig { dimensions: 1536, ..Default::default() }, ..Default::default() };
    assert!(config.needs_reembedding(4096));
    assert!(!config.needs_reembedding(1536));
  }

  #[test]
  fn template_contains_all_sections() {
    let template = Config::generate_template();
    for section in ["[paths]", "[embedding]", "[chunk]", "[pipeline]", "[queue]", "[search]", "[watcher]", "[cache]", "[sanitizer]"] {
      assert!(template.contains(section), "missing {section}");
    }
  }
}
