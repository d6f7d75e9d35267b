//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::annotate::{AnnotationEvent, AnnotationReporter, DocumentRow, OutputRow};
use crate::discovery::Discovery;
use crate::error::AppError;
use crate::models::{
    CandidateLink, EventWindow, ExtractResult, FetchOrigin, FetchResult, JsonResponse, ParseStatus,
};
use crate::traits::{AnnotationSink, ContentExtractor, Fetcher, LinkDiscovery, LlmClient};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving canned results by exact URL.
///
/// Unknown URLs yield an HTTP 404 result. JSON responses are queued per URL
/// and popped in order.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, FetchResult>>>,
    json: Arc<Mutex<HashMap<String, VecDeque<JsonResponse>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    json_requests: Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200.
    pub fn with_page(self, url: &str, body: &str) -> Self {
        let result = FetchResult::ok(url, 200, body.as_bytes().to_vec(), FetchOrigin::Network);
        self.with_result(url, result)
    }

    pub fn with_bytes(self, url: &str, bytes: Vec<u8>) -> Self {
        let result = FetchResult::ok(url, 200, bytes, FetchOrigin::Network);
        self.with_result(url, result)
    }

    pub fn with_result(self, url: &str, result: FetchResult) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), result);
        self
    }

    pub fn with_json(self, url: &str, payload: serde_json::Value) -> Self {
        self.json
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(JsonResponse {
                status: Some(200),
                payload: Some(payload),
                error: None,
            });
        self
    }

    /// URLs passed to `fetch`, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// `(url, params)` passed to `fetch_json`, in call order.
    pub fn json_requests(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.json_requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchResult::failed(url, Some(404), "HTTP 404"))
    }

    async fn fetch_json(&self, url: &str, params: &[(String, String)]) -> JsonResponse {
        self.json_requests
            .lock()
            .unwrap()
            .push((url.to_string(), params.to_vec()));
        self.json
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| JsonResponse {
                status: Some(404),
                payload: None,
                error: Some("HTTP 404".into()),
            })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that treats the whole input as body text.
#[derive(Clone, Default)]
pub struct MockExtractor;

impl MockExtractor {
    pub fn passthrough() -> Self {
        Self
    }
}

impl ContentExtractor for MockExtractor {
    fn extract(&self, html: &str) -> ExtractResult {
        let text = html.trim();
        if text.is_empty() {
            return ExtractResult::empty_html();
        }
        ExtractResult {
            title: None,
            published_at: None,
            text: Some(text.to_string()),
            parse_status: ParseStatus::Ok,
        }
    }
}

// ---------------------------------------------------------------------------
// MockDiscovery
// ---------------------------------------------------------------------------

/// Mock discovery that returns the same links for every source and window.
#[derive(Clone)]
pub struct MockDiscovery {
    links: Arc<Vec<CandidateLink>>,
    pub calls: Arc<Mutex<usize>>,
}

impl MockDiscovery {
    pub fn new(links: Vec<CandidateLink>) -> Self {
        Self {
            links: Arc::new(links),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl LinkDiscovery for MockDiscovery {
    async fn discover(&self, _discovery: &Discovery, _window: &EventWindow) -> Vec<CandidateLink> {
        *self.calls.lock().unwrap() += 1;
        self.links.as_ref().clone()
    }
}

// ---------------------------------------------------------------------------
// MockLlm
// ---------------------------------------------------------------------------

/// Mock LLM with a queue of scripted responses.
///
/// When the queue is empty the default response is returned. Every prompt is
/// recorded.
#[derive(Clone)]
pub struct MockLlm {
    responses: Arc<Mutex<VecDeque<Result<String, AppError>>>>,
    default: Arc<String>,
    panic_marker: Option<Arc<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockLlm {
    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            default: Arc::new(
                r#"{"stance": "neutral", "strength": 0, "mentions_key_rate": false}"#.to_string(),
            ),
            panic_marker: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_default(mut self, raw: &str) -> Self {
        self.default = Arc::new(raw.to_string());
        self
    }

    /// Panic on any prompt containing `marker`.
    pub fn panic_on(mut self, marker: &str) -> Self {
        self.panic_marker = Some(Arc::new(marker.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for MockLlm {
    async fn invoke(&self, prompt: &str) -> Result<String, AppError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(marker) = &self.panic_marker {
            if prompt.contains(marker.as_str()) {
                panic!("scripted panic for {marker}");
            }
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default.as_ref().clone()))
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Sink that keeps rows in memory, optionally failing every append.
#[derive(Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<OutputRow>>>,
    fail: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<OutputRow> {
        self.rows.lock().unwrap().clone()
    }
}

impl AnnotationSink for MemorySink {
    fn append(&mut self, row: &OutputRow) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::IoError("disk full".into()));
        }
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock annotation reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl AnnotationReporter for MockReporter {
    fn report(&self, event: AnnotationEvent<'_>) {
        let label = match &event {
            AnnotationEvent::Started { .. } => "Started",
            AnnotationEvent::Written { .. } => "Written",
            AnnotationEvent::WorkerCrashed { .. } => "WorkerCrashed",
            AnnotationEvent::Finished { .. } => "Finished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a document whose prompt contains its own `doc_id`.
pub fn make_document(doc_id: &str) -> DocumentRow {
    DocumentRow {
        event_id: "2024-07-26".to_string(),
        doc_id: doc_id.to_string(),
        source_type: "media".to_string(),
        source_name: "РБК".to_string(),
        published_at: Some("2024-07-26T15:00:00+03:00".to_string()),
        title: format!("ЦБ повысил ключевую ставку ({doc_id})"),
        lead: String::new(),
        text_focus: format!("ЗАГОЛОВОК: ЦБ повысил ключевую ставку ({doc_id})"),
    }
}
