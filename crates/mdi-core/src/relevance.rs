//! Three-gate topical relevance check for key-rate articles.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::AppError;

/// Regex configuration as written in the collection config.
#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceConfig {
    pub keyrate_regex: String,
    pub cbr_regex: String,
    pub decision_regex: String,
    /// Size of the lede window, in characters of `title + " " + text`.
    pub cbr_lede_chars: usize,
}

/// Pre-compiled relevance gates.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    keyrate: Regex,
    cbr: Regex,
    decision: Regex,
    lede_chars: usize,
}

impl RelevanceFilter {
    pub fn new(config: &RelevanceConfig) -> Result<Self, AppError> {
        Ok(Self {
            keyrate: compile("keyrate_regex", &config.keyrate_regex)?,
            cbr: compile("cbr_regex", &config.cbr_regex)?,
            decision: compile("decision_regex", &config.decision_regex)?,
            lede_chars: config.cbr_lede_chars,
        })
    }

    /// All three gates must pass: key-rate terms anywhere, central-bank
    /// identity within the lede window, decision terms anywhere.
    pub fn is_relevant(&self, title: Option<&str>, text: Option<&str>) -> bool {
        let combined = format!("{} {}", title.unwrap_or_default(), text.unwrap_or_default());

        if !self.keyrate.is_match(&combined) {
            return false;
        }

        let lede = lede(&combined, self.lede_chars);
        if !self.cbr.is_match(lede) {
            return false;
        }

        self.decision.is_match(&combined)
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex, AppError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| AppError::ConfigError(format!("Invalid relevance.{name}: {e}")))
}

/// First `chars` characters of `s` (not bytes: Cyrillic is multi-byte).
fn lede(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
