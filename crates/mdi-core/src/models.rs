use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::dates::Timestamp;

/// A central-bank rate decision loaded from the events table.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_date_time: Timestamp,
    pub decision: Option<String>,
    pub new_rate: Option<f64>,
}

/// Date range around an event used to scope discovery (inclusive on both ends).
#[derive(Debug, Clone, PartialEq)]
pub struct EventWindow {
    pub event: Event,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EventWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every calendar day of the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(|day| *day <= self.end)
    }
}

/// An unfetched URL produced by a discoverer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<String>,
}

impl CandidateLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            summary: None,
            published_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = if title.is_empty() { None } else { Some(title) };
        self
    }
}

/// Where a [`FetchResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    Network,
    Cache,
    /// robots.txt denied the URL; no request was made.
    RobotsDenied,
}

/// Outcome of a single fetch. Failures are carried in `error`, never raised.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status_code: Option<u16>,
    pub text: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub error: Option<String>,
    pub origin: FetchOrigin,
}

impl FetchResult {
    /// Successful fetch with the body read as UTF-8.
    pub fn ok(url: impl Into<String>, status_code: u16, bytes: Vec<u8>, origin: FetchOrigin) -> Self {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Self::decoded(url, status_code, text, bytes, origin)
    }

    /// Successful fetch whose body was already decoded with its charset.
    pub fn decoded(
        url: impl Into<String>,
        status_code: u16,
        text: String,
        bytes: Vec<u8>,
        origin: FetchOrigin,
    ) -> Self {
        Self {
            url: url.into(),
            status_code: Some(status_code),
            text: Some(text),
            bytes: Some(bytes),
            error: None,
            origin,
        }
    }

    pub fn failed(url: impl Into<String>, status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status_code,
            text: None,
            bytes: None,
            error: Some(error.into()),
            origin: FetchOrigin::Network,
        }
    }

    pub fn robots_denied(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status_code: None,
            text: None,
            bytes: None,
            error: Some("disallowed by robots.txt".to_string()),
            origin: FetchOrigin::RobotsDenied,
        }
    }

    pub fn is_robots_denied(&self) -> bool {
        self.origin == FetchOrigin::RobotsDenied
    }

    /// Body text, if the fetch produced a non-empty one.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Outcome of a JSON fetch: `(status, payload, error)`.
#[derive(Debug, Clone, Default)]
pub struct JsonResponse {
    pub status: Option<u16>,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Ok,
    NoText,
    EmptyHtml,
    /// The fetch produced no HTML to parse.
    NoHtml,
    RobotsDisallow,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Ok => "ok",
            ParseStatus::NoText => "no_text",
            ParseStatus::EmptyHtml => "empty_html",
            ParseStatus::NoHtml => "no_html",
            ParseStatus::RobotsDisallow => "robots_disallow",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Error,
    RobotsDisallow,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Error => "error",
            FetchStatus::RobotsDisallow => "robots_disallow",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title, date and body pulled out of an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractResult {
    pub title: Option<String>,
    /// ISO-8601.
    pub published_at: Option<String>,
    pub text: Option<String>,
    pub parse_status: ParseStatus,
}

impl ExtractResult {
    pub fn empty_html() -> Self {
        Self {
            title: None,
            published_at: None,
            text: None,
            parse_status: ParseStatus::EmptyHtml,
        }
    }
}

/// Normalized article record, one row of the collection output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleRecord {
    pub source: String,
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub text: Option<String>,
    pub summary: Option<String>,
    pub event_date_time: String,
    pub event_decision: Option<String>,
    pub event_new_rate: Option<f64>,
    pub fetch_status: FetchStatus,
    pub parse_status: ParseStatus,
    pub relevance: bool,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
