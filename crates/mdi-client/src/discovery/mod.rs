//! Candidate link discovery, one strategy per [`Discovery`] variant.

mod date_archive;
mod search_api;
mod sitemap;
mod tag_page;

use mdi_core::discovery::Discovery;
use mdi_core::models::{CandidateLink, EventWindow};
use mdi_core::traits::{Fetcher, LinkDiscovery};
use scraper::{Html, Selector};

/// Runs discovery strategies over a shared [`Fetcher`].
#[derive(Clone)]
pub struct SourceDiscoverer<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> SourceDiscoverer<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: Fetcher> LinkDiscovery for SourceDiscoverer<F> {
    async fn discover(&self, discovery: &Discovery, window: &EventWindow) -> Vec<CandidateLink> {
        let links = match discovery {
            Discovery::TagPage(options) => tag_page::discover(&self.fetcher, options).await,
            Discovery::SearchApi(options) => {
                search_api::discover(&self.fetcher, options, window).await
            }
            Discovery::Sitemap(options) => sitemap::discover(&self.fetcher, options, window).await,
            Discovery::DateArchive(archive) => {
                date_archive::discover(&self.fetcher, archive, window).await
            }
        };
        tracing::debug!(kind = discovery.kind(), count = links.len(), "Discovered candidates");
        links
    }
}

/// An `<a href>` with its trimmed text.
struct Anchor {
    href: String,
    text: String,
}

/// All anchors of a page. The parsed document never outlives this call, so
/// callers can hold the result across awaits.
fn anchors(html: &str) -> Vec<Anchor> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let text = element
                .text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            Some(Anchor {
                href: href.to_string(),
                text,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdi_core::config::TagPageOptions;
    use mdi_core::dates::Timestamp;
    use mdi_core::models::Event;
    use mdi_core::testutil::MockFetcher;

    pub(super) fn window(start: &str, end: &str) -> EventWindow {
        EventWindow {
            event: Event {
                event_date_time: Timestamp::parse(end).unwrap(),
                decision: None,
                new_rate: None,
            },
            start: start.parse().unwrap(),
            end: end.parse().unwrap(),
        }
    }

    #[test]
    fn anchors_collect_href_and_text() {
        let html = r#"<a href=" /a/1 "> Ставка <b>ЦБ</b> </a><a href="">x</a><a>no</a>"#;
        let found = anchors(html);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].href, "/a/1");
        assert_eq!(found[0].text, "Ставка ЦБ");
    }

    #[tokio::test]
    async fn dispatches_by_variant() {
        let fetcher = MockFetcher::new().with_page(
            "https://news.example/tags/rate/",
            r#"<a href="/text/2024/07/26/1/">Новость</a>"#,
        );
        let discoverer = SourceDiscoverer::new(fetcher.clone());
        let links = discoverer
            .discover(
                &Discovery::TagPage(TagPageOptions {
                    tag_url: "https://news.example/tags/rate/".into(),
                    max_pages: 1,
                }),
                &window("2024-07-25", "2024-07-27"),
            )
            .await;
        assert_eq!(links.len(), 1);
        assert_eq!(fetcher.requests(), vec!["https://news.example/tags/rate/"]);
    }
}
