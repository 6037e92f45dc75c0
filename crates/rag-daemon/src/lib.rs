pub mod http;
pub mod orchestrator;
pub mod query;

pub use orchestrator::{AppState, Daemon, DaemonConfig, LifecycleError, is_running, pid_file_path, remove_pid_file, write_pid_file};
pub use query::{QueryError, QueryExecutor, QueryResponse, ResultRow};
