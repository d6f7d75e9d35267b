use std::time::Duration;

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use mdi_core::config::{CollectConfig, RetryPolicy};
use mdi_core::error::AppError;
use mdi_core::models::{FetchOrigin, FetchResult, JsonResponse};
use mdi_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use url::Url;

use crate::cache::{CachedResponse, ResponseCache};
use crate::robots::{RobotsCache, RobotsRules, agent_token, robots_url};

/// Statuses whose `Retry-After` header is honoured.
const RETRY_AFTER_STATUSES: &[u16] = &[413, 429, 503];

/// How far into the body to look for a `<meta charset>`.
const META_CHARSET_SCAN: usize = 1024;

/// Shared HTTP session for collection.
///
/// Every request goes through the same pipeline: robots.txt check, cache
/// lookup, GET with bounded retry, cache store, politeness sleep. Failures
/// are returned as data, never as `Err`.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
    robots: RobotsCache,
    agent: String,
    politeness: Duration,
    timeout_secs: u64,
}

/// Raw outcome of a GET after retries.
struct RawResponse {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl RawResponse {
    fn text(&self) -> String {
        decode_body(&self.body, self.content_type.as_deref())
    }
}

impl HttpSession {
    pub fn new(config: &CollectConfig) -> Result<Self, AppError> {
        let cache = ResponseCache::from_config(&config.cache)?;
        Self::build(
            &config.user_agent,
            config.request_timeout(),
            config.politeness_sleep(),
            config.retries.clone(),
            cache,
        )
    }

    pub fn build(
        user_agent: &str,
        timeout: Duration,
        politeness: Duration,
        retry: RetryPolicy,
        cache: Option<ResponseCache>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            retry,
            cache,
            robots: RobotsCache::default(),
            agent: agent_token(user_agent).to_string(),
            politeness,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Robots check plus cache plus live GET, shared by `fetch` and
    /// `fetch_json`.
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<(RawResponse, FetchOrigin), Failure> {
        let target = validate_url(url, params).map_err(Failure::Invalid)?;

        if !self.robots_allow(target.as_str()).await {
            tracing::info!(url = %target, "Disallowed by robots.txt");
            return Err(Failure::RobotsDenied);
        }

        let key = ResponseCache::key(url, params);
        if let Some(hit) = self.cached(&key).await {
            tracing::debug!(url = %target, "Cache hit");
            return Ok((hit, FetchOrigin::Cache));
        }

        let outcome = self.send_with_retry(&target).await;
        if !self.politeness.is_zero() {
            tokio::time::sleep(self.politeness).await;
        }
        let response = outcome?;
        self.store(&key, &target, &response).await;

        Ok((response, FetchOrigin::Network))
    }

    async fn cached(&self, key: &str) -> Option<RawResponse> {
        let hit = self.cache.as_ref()?.get(key).await?;
        Some(RawResponse {
            status: hit.status,
            content_type: hit.content_type,
            body: hit.body,
        })
    }

    /// Only 2xx responses are stored.
    async fn store(&self, key: &str, target: &Url, response: &RawResponse) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !is_success(response.status) {
            return;
        }
        cache
            .put(
                key,
                CachedResponse {
                    url: target.to_string(),
                    status: response.status,
                    content_type: response.content_type.clone(),
                    body: response.body.clone(),
                },
            )
            .await;
    }

    /// GET with retry on forcelisted statuses and on connect/timeout errors.
    ///
    /// - Retry 1: immediate
    /// - Retry n: `backoff_factor * 2^(n-1)` seconds, capped at 120s
    ///
    /// A `Retry-After` on 413/429/503 lengthens the wait, up to the same cap.
    /// When retries run out on a forcelisted status the last response is
    /// returned as is.
    async fn send_with_retry(&self, url: &Url) -> Result<RawResponse, Failure> {
        let mut retry = 0;
        loop {
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if self.retry.retries_status(status) && retry < self.retry.total {
                        retry += 1;
                        let requested = RETRY_AFTER_STATUSES
                            .contains(&status)
                            .then(|| retry_after(response.headers(), Utc::now()))
                            .flatten()
                            .unwrap_or(Duration::ZERO)
                            .min(RetryPolicy::MAX_BACKOFF);
                        let delay = self.retry.delay_for_retry(retry).max(requested);
                        tracing::debug!(url = %url, status, retry, ?delay, "Retrying status");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = response.bytes().await.map_err(|e| {
                        Failure::Transport(
                            Some(status),
                            format!("Failed to read response body: {e}"),
                        )
                    })?;
                    return Ok(RawResponse {
                        status,
                        content_type,
                        body: body.to_vec(),
                    });
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && retry < self.retry.total => {
                    retry += 1;
                    let delay = self.retry.delay_for_retry(retry);
                    tracing::debug!(url = %url, error = %e, retry, ?delay, "Retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let message = if e.is_timeout() {
                        AppError::Timeout(self.timeout_secs).to_string()
                    } else if e.is_connect() {
                        AppError::NetworkError(format!("Connection failed: {e}")).to_string()
                    } else {
                        AppError::HttpError(e.to_string()).to_string()
                    };
                    return Err(Failure::Transport(None, message));
                }
            }
        }
    }

    async fn robots_allow(&self, url: &str) -> bool {
        let Some(robots) = robots_url(url) else {
            return true;
        };
        let rules = match self.robots.get(&robots) {
            Some(rules) => rules,
            None => {
                let rules = self.load_robots(&robots).await;
                self.robots.insert(robots, rules)
            }
        };
        rules.allows(&self.agent, url)
    }

    /// Goes through the response cache and the retrying client, without a
    /// politeness sleep. Anything but a 2xx body allows everything.
    async fn load_robots(&self, robots: &str) -> RobotsRules {
        let Ok(target) = Url::parse(robots) else {
            return RobotsRules::allow_all();
        };

        let key = ResponseCache::key(robots, &[]);
        let outcome = match self.cached(&key).await {
            Some(hit) => Ok(hit),
            None => {
                let outcome = self.send_with_retry(&target).await;
                if let Ok(response) = &outcome {
                    self.store(&key, &target, response).await;
                }
                outcome
            }
        };

        match outcome {
            Ok(response) if is_success(response.status) => {
                tracing::debug!(url = %robots, "Loaded robots.txt");
                RobotsRules::parse(response.text())
            }
            Ok(response) => {
                tracing::debug!(url = %robots, status = response.status, "No robots.txt");
                RobotsRules::allow_all()
            }
            Err(failure) => {
                tracing::debug!(url = %robots, error = %failure.message(), "robots.txt unavailable");
                RobotsRules::allow_all()
            }
        }
    }
}

enum Failure {
    Invalid(String),
    RobotsDenied,
    Transport(Option<u16>, String),
}

impl Failure {
    fn message(&self) -> String {
        match self {
            Failure::Invalid(message) | Failure::Transport(_, message) => message.clone(),
            Failure::RobotsDenied => "disallowed by robots.txt".to_string(),
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Only absolute http(s) URLs are fetched.
fn validate_url(url: &str, params: &[(String, String)]) -> Result<Url, String> {
    let parsed = if params.is_empty() {
        Url::parse(url)
    } else {
        Url::parse_with_params(url, params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
    .map_err(|e| format!("Invalid URL {url}: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        )),
    }
}

/// `Retry-After` as delta-seconds or an HTTP date. A date in the past means
/// no wait.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        (at.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Body text in the `Content-Type` charset, else the charset of a
/// `<meta>` tag near the top of the document, else UTF-8. A BOM wins over
/// both.
fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(header_charset)
        .or_else(|| meta_charset(body))
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(body);
    text.into_owned()
}

fn header_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
    })
}

/// Covers both `<meta charset="...">` and the `http-equiv` form.
fn meta_charset(body: &[u8]) -> Option<String> {
    let head = &body[..body.len().min(META_CHARSET_SCAN)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label: String = head[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    if label.is_empty() { None } else { Some(label) }
}

impl Fetcher for HttpSession {
    async fn fetch(&self, url: &str) -> FetchResult {
        match self.get(url, &[]).await {
            Ok((response, origin)) if is_success(response.status) => {
                let text = response.text();
                FetchResult::decoded(url, response.status, text, response.body, origin)
            }
            Ok((response, _)) => {
                tracing::warn!(%url, status = response.status, "HTTP error");
                FetchResult::failed(
                    url,
                    Some(response.status),
                    format!("HTTP {} for {url}", response.status),
                )
            }
            Err(Failure::RobotsDenied) => FetchResult::robots_denied(url),
            Err(Failure::Transport(status, message)) => {
                tracing::warn!(%url, error = %message, "Request error");
                FetchResult::failed(url, status, message)
            }
            Err(Failure::Invalid(message)) => FetchResult::failed(url, None, message),
        }
    }

    async fn fetch_json(&self, url: &str, params: &[(String, String)]) -> JsonResponse {
        match self.get(url, params).await {
            Ok((response, _)) if is_success(response.status) => {
                match serde_json::from_slice(&response.body) {
                    Ok(payload) => JsonResponse {
                        status: Some(response.status),
                        payload: Some(payload),
                        error: None,
                    },
                    Err(e) => JsonResponse {
                        status: Some(response.status),
                        payload: None,
                        error: Some(format!("Invalid JSON from {url}: {e}")),
                    },
                }
            }
            Ok((response, _)) => {
                tracing::warn!(%url, status = response.status, "HTTP error");
                JsonResponse {
                    status: Some(response.status),
                    payload: None,
                    error: Some(format!("HTTP {} for {url}", response.status)),
                }
            }
            Err(failure) => {
                let status = match &failure {
                    Failure::Transport(status, _) => *status,
                    _ => None,
                };
                JsonResponse {
                    status,
                    payload: None,
                    error: Some(failure.message()),
                }
            }
        }
    }
}
