pub mod coordinator;
pub mod sanitizer;
pub mod validator;
pub mod worker;

pub use coordinator::{Item, PipelineCoordinator, PipelineError, PipelineStats};
pub use sanitizer::{Sanitizer, SanitizeReport, SanitizerConfig};
pub use validator::{Severity, ValidationResult, Validator};
pub use worker::IndexingWorker;
