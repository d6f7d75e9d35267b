use regex::Regex;
use url::Url;

use crate::error::AppError;

/// Normalize a URL for deduplication: lowercase scheme and host, drop
/// query string and fragment.
///
/// Strings that do not parse as absolute URLs are handled textually so that
/// the same invariants hold for them.
pub fn canonicalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => canonicalize_textually(raw),
    }
}

fn canonicalize_textually(raw: &str) -> String {
    let without_fragment = raw.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();

    match without_query.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_lowercase(),
                host.to_lowercase(),
                path
            )
        }
        None => without_query.to_string(),
    }
}

/// Host part of a URL, as written (lowercased by the URL parser).
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Per-source URL gate: domain allowlist plus deny patterns.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    allow_domains: Vec<String>,
    deny: Vec<Regex>,
}

impl UrlFilter {
    pub fn new(allow_domains: &[String], deny_url_regex: &[String]) -> Result<Self, AppError> {
        let deny = deny_url_regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    AppError::ConfigError(format!("Invalid deny_url_regex '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allow_domains: allow_domains.iter().map(|d| d.to_lowercase()).collect(),
            deny,
        })
    }

    /// An empty allowlist admits every host.
    pub fn allows(&self, url: &str) -> bool {
        if !self.allow_domains.is_empty() {
            match host_of(url) {
                Some(host) if self.allow_domains.iter().any(|d| *d == host) => {}
                _ => return false,
            }
        }
        !self.deny.iter().any(|re| re.is_match(url))
    }
}
