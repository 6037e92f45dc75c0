pub mod debounce;
pub mod gitignore;
pub mod scanner;
pub mod watcher;

pub use debounce::{BatchProcessor, DebounceConfig, DebouncedWatcher};
pub use gitignore::{GitignoreState, compute_gitignore_hash, should_ignore};
pub use scanner::{ScanError, ScanProgress, ScanResult, ScannedFile, Scanner};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatchError};
