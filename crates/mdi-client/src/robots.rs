//! robots.txt rules per origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use robotstxt::DefaultMatcher;
use url::Url;

/// Parsed robots.txt body for one origin. An empty body allows everything.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    body: String,
}

impl RobotsRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn allows(&self, agent: &str, url: &str) -> bool {
        if self.body.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, agent, url)
    }
}

/// `scheme://host[:port]/robots.txt` for any URL on that origin.
pub fn robots_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed.host_str()?;
    parsed.set_path("/robots.txt");
    parsed.set_query(None);
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Product token of a User-Agent string: `mdi-collector/0.1 (+x)` → `mdi-collector`.
pub fn agent_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .find(|s| !s.is_empty())
        .unwrap_or("*")
}

/// Process-lifetime store of rules keyed by robots.txt URL.
#[derive(Clone, Default)]
pub struct RobotsCache {
    rules: Arc<Mutex<HashMap<String, Arc<RobotsRules>>>>,
}

impl RobotsCache {
    pub fn get(&self, robots_url: &str) -> Option<Arc<RobotsRules>> {
        self.rules
            .lock()
            .ok()
            .and_then(|rules| rules.get(robots_url).cloned())
    }

    pub fn insert(&self, robots_url: String, rules: RobotsRules) -> Arc<RobotsRules> {
        let rules = Arc::new(rules);
        if let Ok(mut map) = self.rules.lock() {
            map.insert(robots_url, rules.clone());
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "User-agent: *\nDisallow: /private/\n\nUser-agent: mdi-collector\nDisallow: /search\n";

    #[test]
    fn robots_url_for_origin() {
        assert_eq!(
            robots_url("https://www.rbc.ru/economics/1?x=2#y").as_deref(),
            Some("https://www.rbc.ru/robots.txt")
        );
        assert_eq!(
            robots_url("http://localhost:8080/a").as_deref(),
            Some("http://localhost:8080/robots.txt")
        );
        assert!(robots_url("not a url").is_none());
    }

    #[test]
    fn agent_token_strips_version() {
        assert_eq!(agent_token("mdi-collector/0.1"), "mdi-collector");
        assert_eq!(agent_token("bot (+https://x)"), "bot");
        assert_eq!(agent_token(""), "*");
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.allows("mdi-collector", "https://a.ru/search?q=1"));
        // The specific group replaces `*`, so /private/ is open for us.
        assert!(rules.allows("mdi-collector", "https://a.ru/private/x"));
        assert!(!rules.allows("otherbot", "https://a.ru/private/x"));
        assert!(rules.allows("otherbot", "https://a.ru/news/1"));
    }

    #[test]
    fn empty_rules_allow_everything() {
        assert!(RobotsRules::allow_all().allows("mdi-collector", "https://a.ru/anything"));
    }

    #[test]
    fn cache_returns_inserted_rules() {
        let cache = RobotsCache::default();
        assert!(cache.get("https://a.ru/robots.txt").is_none());
        cache.insert("https://a.ru/robots.txt".into(), RobotsRules::parse(ROBOTS));
        let rules = cache.get("https://a.ru/robots.txt").unwrap();
        assert!(!rules.allows("otherbot", "https://a.ru/private/1"));
    }
}
