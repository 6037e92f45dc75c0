pub mod chunks;
pub mod connection;
pub mod documents;
pub mod migrations;
pub mod progress;
pub mod schema;

pub use connection::{StoreError, VectorStore, default_cache_dir, default_config_dir, default_data_dir, default_port};
pub use documents::{DeleteOutcome, IndexedState};
pub use progress::ProgressTracker;
