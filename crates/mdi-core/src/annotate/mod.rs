//! LLM stance annotation: schema, prompts, request policy, the
//! validate/repair state machine and the worker pool that drives it.

pub mod io;
pub mod machine;
pub mod policy;
pub mod prompt;
pub mod rows;
pub mod runner;
pub mod schema;

pub use io::{AnnotateConfig, ColumnMap, CsvAnnotationSink, load_documents, read_completed_ids};
pub use machine::{AnnotationMachine, AnnotationState, Route};
pub use policy::{RequestPolicy, RetryDecision};
pub use prompt::SYSTEM_PROMPT;
pub use rows::{AnnotationStatus, DocumentRow, OutputRow};
pub use runner::{AnnotationEvent, AnnotationReporter, AnnotationRunner, RunSummary, TracingReporter};
pub use schema::{AnnotationValidator, LlmAnnotation, Stance};
