use mdi_core::config::SearchApiOptions;
use mdi_core::models::{CandidateLink, EventWindow};
use mdi_core::traits::Fetcher;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    docs: Vec<SearchDoc>,
    #[serde(rename = "nextPage", default)]
    next_page: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    url: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    date: Option<String>,
}

/// Continuation token as a query value; empty strings and `null` end paging.
fn token(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(super) async fn discover<F: Fetcher>(
    fetcher: &F,
    options: &SearchApiOptions,
    window: &EventWindow,
) -> Vec<CandidateLink> {
    let mut links = Vec::new();
    let mut next_page: Option<String> = None;

    for page in 1..=options.max_pages {
        let mut params = vec![
            ("format".to_string(), "json".to_string()),
            ("q".to_string(), options.query.clone()),
            ("pageSize".to_string(), options.page_size.to_string()),
        ];
        if let Some(token) = &next_page {
            params.push(("nextPage".to_string(), token.clone()));
        }
        params.push(("df".to_string(), window.start.format("%Y-%m-%d").to_string()));
        params.push(("dt".to_string(), window.end.format("%Y-%m-%d").to_string()));

        let response = fetcher.fetch_json(&options.search_url, &params).await;
        let payload = match (response.error, response.payload) {
            (None, Some(payload)) if payload.as_object().is_some_and(|o| !o.is_empty()) => payload,
            (error, _) => {
                tracing::warn!(url = %options.search_url, page, ?error, "Search API returned nothing");
                break;
            }
        };

        let parsed: SearchPage = match serde_json::from_value(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(url = %options.search_url, page, error = %e, "Unexpected search payload");
                break;
            }
        };

        links.extend(parsed.docs.into_iter().filter_map(|doc| {
            let url = doc.url.filter(|u| !u.is_empty())?;
            Some(CandidateLink {
                url,
                title: doc.title,
                summary: doc.summary,
                published_at: doc.date,
            })
        }));

        next_page = token(parsed.next_page);
        if next_page.is_none() {
            break;
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::super::tests::window;
    use super::*;
    use mdi_core::testutil::MockFetcher;
    use serde_json::json;

    const SEARCH: &str = "https://russian.rt.com/search";

    fn options(max_pages: u32) -> SearchApiOptions {
        SearchApiOptions {
            search_url: SEARCH.into(),
            query: "ключевая ставка".into(),
            page_size: 50,
            max_pages,
        }
    }

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn follows_next_page_token() {
        let fetcher = MockFetcher::new()
            .with_json(
                SEARCH,
                json!({
                    "docs": [
                        {"url": "https://russian.rt.com/business/news/1", "title": "ЦБ", "summary": "s", "date": "2024-07-26 13:31"},
                        {"title": "без ссылки"}
                    ],
                    "nextPage": "abc"
                }),
            )
            .with_json(
                SEARCH,
                json!({"docs": [{"url": "https://russian.rt.com/business/news/2"}]}),
            );
        let links = discover(&fetcher, &options(5), &window("2024-07-25", "2024-07-27")).await;

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].summary.as_deref(), Some("s"));
        assert_eq!(links[0].published_at.as_deref(), Some("2024-07-26 13:31"));

        let requests = fetcher.json_requests();
        assert_eq!(requests.len(), 2);
        let first = &requests[0].1;
        assert_eq!(param(first, "format"), Some("json"));
        assert_eq!(param(first, "q"), Some("ключевая ставка"));
        assert_eq!(param(first, "pageSize"), Some("50"));
        assert_eq!(param(first, "df"), Some("2024-07-25"));
        assert_eq!(param(first, "dt"), Some("2024-07-27"));
        assert_eq!(param(first, "nextPage"), None);
        assert_eq!(param(&requests[1].1, "nextPage"), Some("abc"));
    }

    #[tokio::test]
    async fn stops_at_max_pages() {
        let page = json!({"docs": [{"url": "https://russian.rt.com/x"}], "nextPage": 2});
        let fetcher = MockFetcher::new()
            .with_json(SEARCH, page.clone())
            .with_json(SEARCH, page.clone())
            .with_json(SEARCH, page);
        let links = discover(&fetcher, &options(2), &window("2024-07-25", "2024-07-27")).await;
        assert_eq!(links.len(), 2);
        assert_eq!(fetcher.json_requests().len(), 2);
    }

    #[tokio::test]
    async fn stops_on_error_or_empty_payload() {
        let fetcher = MockFetcher::new();
        let links = discover(&fetcher, &options(5), &window("2024-07-25", "2024-07-27")).await;
        assert!(links.is_empty());
        assert_eq!(fetcher.json_requests().len(), 1);

        let fetcher = MockFetcher::new().with_json(SEARCH, json!({}));
        let links = discover(&fetcher, &options(5), &window("2024-07-25", "2024-07-27")).await;
        assert!(links.is_empty());
        assert_eq!(fetcher.json_requests().len(), 1);
    }
}
