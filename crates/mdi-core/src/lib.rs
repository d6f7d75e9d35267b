pub mod annotate;
pub mod collect;
pub mod config;
pub mod dates;
pub mod discovery;
pub mod error;
pub mod events;
pub mod models;
pub mod relevance;
pub mod table;
pub mod traits;
pub mod urls;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use collect::{Collector, OutputFormat, write_records};
pub use config::CollectConfig;
pub use discovery::{Discovery, SourcePlan, build_plans};
pub use error::AppError;
pub use models::{ArticleRecord, CandidateLink, EventWindow, ExtractResult, FetchResult, compute_hash};
pub use relevance::RelevanceFilter;
pub use traits::{AnnotationSink, ContentExtractor, Fetcher, LinkDiscovery, LlmClient};
