//! Collection configuration, deserialized from TOML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::events::WindowDays;
use crate::relevance::RelevanceConfig;

const DEFAULT_USER_AGENT: &str = "mdi-collector/0.1";

/// Top-level collection config.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_s")]
    pub request_timeout_s: u64,
    #[serde(default = "default_sleep_s")]
    pub sleep_s: f64,
    #[serde(default)]
    pub retries: RetryPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
    pub window_days: WindowDays,
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_s() -> u64 {
    20
}

fn default_sleep_s() -> f64 {
    1.0
}

impl CollectConfig {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| AppError::ConfigError(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        self.window_days.validate()?;
        non_negative("sleep_s", self.sleep_s)?;
        non_negative("retries.backoff_factor", self.retries.backoff_factor)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }

    pub fn politeness_sleep(&self) -> Duration {
        Duration::try_from_secs_f64(self.sleep_s).unwrap_or(Duration::ZERO)
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), AppError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AppError::ConfigError(format!(
            "{name} must be a finite non-negative number, got {value}"
        )))
    }
}

/// Bounded retry for idempotent GETs.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_total")]
    pub total: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default)]
    pub status_forcelist: Vec<u16>,
}

fn default_retry_total() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    0.5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: default_retry_total(),
            backoff_factor: default_backoff_factor(),
            status_forcelist: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// - Retry 1: immediate
    /// - Retry n: `backoff_factor * 2^(n-1)` seconds, capped at 120s
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry <= 1 || self.backoff_factor.is_nan() || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.backoff_factor * 2f64.powi(exponent);
        if !secs.is_finite() || secs >= Self::MAX_BACKOFF.as_secs_f64() {
            return Self::MAX_BACKOFF;
        }
        Duration::from_secs_f64(secs)
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    #[serde(alias = "sqlite")]
    Filesystem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_backend")]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_expire_after_s")]
    pub expire_after_s: u64,
}

fn default_true() -> bool {
    true
}

fn default_backend() -> CacheBackend {
    CacheBackend::Filesystem
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache/http")
}

fn default_expire_after_s() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_backend(),
            path: default_cache_path(),
            expire_after_s: default_expire_after_s(),
        }
    }
}

impl CacheConfig {
    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_s)
    }
}

/// One `[sources.<name>]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub deny_url_regex: Vec<String>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// Discovery strategy of a source, selected by the `kind` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    TagPage(TagPageOptions),
    SearchApi(SearchApiOptions),
    Sitemap(SitemapOptions),
    DateArchive(DateArchiveOptions),
    /// Several named sitemaps, each collected as its own source.
    SitemapGroup(SitemapGroupOptions),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TagPageOptions {
    pub tag_url: String,
    #[serde(default = "default_tag_pages")]
    pub max_pages: u32,
}

fn default_tag_pages() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchApiOptions {
    pub search_url: String,
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_search_pages")]
    pub max_pages: u32,
}

fn default_query() -> String {
    "ключевая ставка".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_search_pages() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SitemapOptions {
    pub sitemap_url: String,
    #[serde(default = "default_max_urls")]
    pub max_urls_per_event: usize,
}

fn default_max_urls() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DateArchiveOptions {
    /// URL template with `{yyyy}`, `{mm}` and `{dd}` placeholders.
    pub archive_url: String,
    #[serde(default = "default_article_regex")]
    pub allow_article_regex: String,
}

fn default_article_regex() -> String {
    r"/articles/\d{4}/\d{2}/\d{2}/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitemapGroupOptions {
    #[serde(default = "default_max_urls")]
    pub max_urls_per_event: usize,
    #[serde(default)]
    pub sources: BTreeMap<String, SitemapEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitemapEntry {
    pub sitemap_url: String,
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub deny_url_regex: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
user_agent = "test-agent/1.0"
request_timeout_s = 5
sleep_s = 0.25

[retries]
total = 2
backoff_factor = 1.0
status_forcelist = [429, 503]

[cache]
backend = "memory"
expire_after_s = 60

[window_days]
before = 1
after = 2

[relevance]
keyrate_regex = 'ключев\w*\s+ставк\w*'
cbr_regex = '(Банк\s+России|ЦБ)'
decision_regex = '(решени|повысил)'
cbr_lede_chars = 500

[sources.fontanka]
enabled = true
kind = "tag_page"
tag_url = "https://www.fontanka.ru/tags/key_rate/"
allow_domains = ["www.fontanka.ru"]

[sources.rt]
enabled = false
kind = "search_api"
search_url = "https://russian.rt.com/search"

[sources.vedomosti]
enabled = true
kind = "date_archive"
archive_url = "https://www.vedomosti.ru/archive/{yyyy}/{mm}/{dd}"

[sources.sitemap]
enabled = true
kind = "sitemap_group"
max_urls_per_event = 50

[sources.sitemap.sources.interfax]
sitemap_url = "https://www.interfax.ru/sitemap.xml"
deny_url_regex = ["/photo/"]
"#;

    #[test]
    fn parses_full_config() {
        let cfg = CollectConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.user_agent, "test-agent/1.0");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.politeness_sleep(), Duration::from_millis(250));
        assert_eq!(cfg.retries.status_forcelist, vec![429, 503]);
        assert_eq!(cfg.cache.backend, CacheBackend::Memory);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.window_days.after, 2);
        assert_eq!(cfg.sources.len(), 4);

        match &cfg.sources["fontanka"].kind {
            SourceKind::TagPage(opts) => assert_eq!(opts.max_pages, 3),
            other => panic!("unexpected kind {other:?}"),
        }
        match &cfg.sources["rt"].kind {
            SourceKind::SearchApi(opts) => {
                assert_eq!(opts.query, "ключевая ставка");
                assert_eq!(opts.page_size, 50);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        match &cfg.sources["sitemap"].kind {
            SourceKind::SitemapGroup(group) => {
                assert_eq!(group.max_urls_per_event, 50);
                assert_eq!(group.sources["interfax"].deny_url_regex, vec!["/photo/"]);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let raw = SAMPLE.replace("kind = \"tag_page\"", "kind = \"telegram\"");
        let err = CollectConfig::from_toml(&raw).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn missing_relevance_is_config_error() {
        let err = CollectConfig::from_toml("[window_days]\nbefore = 1\nafter = 1\n").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn unknown_cache_backend_is_config_error() {
        let raw = SAMPLE.replace("backend = \"memory\"", "backend = \"redis\"");
        assert!(CollectConfig::from_toml(&raw).is_err());
    }

    #[test]
    fn retry_delay_schedule() {
        let policy = RetryPolicy {
            total: 5,
            backoff_factor: 0.5,
            status_forcelist: vec![503],
        };
        assert_eq!(policy.delay_for_retry(1), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(20), Duration::from_secs(120));
        assert_eq!(policy.delay_for_retry(u32::MAX), Duration::from_secs(120));
        assert!(policy.retries_status(503));
        assert!(!policy.retries_status(404));
    }

    #[test]
    fn retry_delay_never_panics_on_extreme_factors() {
        let infinite = RetryPolicy {
            total: 3,
            backoff_factor: f64::INFINITY,
            status_forcelist: vec![],
        };
        assert_eq!(infinite.delay_for_retry(2), Duration::from_secs(120));

        let nan = RetryPolicy {
            backoff_factor: f64::NAN,
            ..infinite
        };
        assert_eq!(nan.delay_for_retry(2), Duration::ZERO);
    }

    #[test]
    fn out_of_range_numbers_are_config_errors() {
        let raw = SAMPLE.replace("after = 2", "after = 100000");
        assert!(matches!(
            CollectConfig::from_toml(&raw),
            Err(AppError::ConfigError(_))
        ));

        let raw = SAMPLE.replace("backoff_factor = 1.0", "backoff_factor = inf");
        assert!(matches!(
            CollectConfig::from_toml(&raw),
            Err(AppError::ConfigError(_))
        ));

        let raw = SAMPLE.replace("sleep_s = 0.25", "sleep_s = -1.0");
        assert!(matches!(
            CollectConfig::from_toml(&raw),
            Err(AppError::ConfigError(_))
        ));
    }
}
