use std::future::Future;

use crate::annotate::OutputRow;
use crate::discovery::Discovery;
use crate::error::AppError;
use crate::models::{CandidateLink, EventWindow, ExtractResult, FetchResult, JsonResponse};

/// Fetches pages and JSON payloads. Failures are reported inside the result,
/// never as `Err`.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = FetchResult> + Send;

    fn fetch_json(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> impl Future<Output = JsonResponse> + Send;
}

/// Pulls title, publication date and body text out of an article page.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(&self, html: &str) -> ExtractResult;
}

/// Produces candidate article links for one source and one event window.
///
/// Best-effort: a page that cannot be fetched is logged and skipped, so
/// discovery never fails as a whole.
pub trait LinkDiscovery: Send + Sync + Clone {
    fn discover(
        &self,
        discovery: &Discovery,
        window: &EventWindow,
    ) -> impl Future<Output = Vec<CandidateLink>> + Send;
}

/// Chat-style language model: one prompt in, raw completion text out.
pub trait LlmClient: Send + Sync + Clone + 'static {
    fn invoke(&self, prompt: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Destination for finished annotation rows.
pub trait AnnotationSink: Send {
    fn append(&mut self, row: &OutputRow) -> Result<(), AppError>;
}
