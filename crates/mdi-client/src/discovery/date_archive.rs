use mdi_core::discovery::DateArchive;
use mdi_core::models::{CandidateLink, EventWindow};
use mdi_core::traits::Fetcher;
use url::Url;

use super::anchors;

/// Absolute URL of an archive href: protocol-relative hrefs get `https:`,
/// root-relative ones the archive origin, anything else is joined against
/// the archive page.
fn resolve(page: &Url, href: &str) -> Option<String> {
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if href.starts_with('/') {
        return Some(format!("{}{href}", page.origin().ascii_serialization()));
    }
    page.join(href).ok().map(|u| u.to_string())
}

pub(super) async fn discover<F: Fetcher>(
    fetcher: &F,
    archive: &DateArchive,
    window: &EventWindow,
) -> Vec<CandidateLink> {
    let mut links = Vec::new();

    for day in window.days() {
        let page_url = archive.url_for(day);
        let Ok(page) = Url::parse(&page_url) else {
            tracing::warn!(url = %page_url, "Invalid archive URL");
            continue;
        };

        let fetched = fetcher.fetch(&page_url).await;
        let Some(html) = fetched.body() else {
            tracing::warn!(url = %page_url, error = ?fetched.error, "Archive day empty");
            continue;
        };

        for anchor in anchors(html) {
            if !archive.article_pattern.is_match(&anchor.href) {
                continue;
            }
            if let Some(url) = resolve(&page, &anchor.href) {
                links.push(CandidateLink::new(url).with_title(anchor.text));
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::super::tests::window;
    use super::*;
    use mdi_core::config::DateArchiveOptions;
    use mdi_core::testutil::MockFetcher;

    fn archive() -> DateArchive {
        DateArchive::new(&DateArchiveOptions {
            archive_url: "https://www.vedomosti.ru/archive/{yyyy}/{mm}/{dd}".into(),
            allow_article_regex: r"/articles/\d{4}/\d{2}/\d{2}/".into(),
        })
        .unwrap()
    }

    #[test]
    fn resolves_href_forms() {
        let page = Url::parse("https://www.vedomosti.ru/archive/2024/07/26").unwrap();
        assert_eq!(
            resolve(&page, "//www.vedomosti.ru/articles/2024/07/26/1").as_deref(),
            Some("https://www.vedomosti.ru/articles/2024/07/26/1")
        );
        assert_eq!(
            resolve(&page, "/economics/articles/2024/07/26/2").as_deref(),
            Some("https://www.vedomosti.ru/economics/articles/2024/07/26/2")
        );
        assert_eq!(
            resolve(&page, "https://x.ru/articles/2024/07/26/3").as_deref(),
            Some("https://x.ru/articles/2024/07/26/3")
        );
        assert_eq!(
            resolve(&page, "articles/2024/07/26/4").as_deref(),
            Some("https://www.vedomosti.ru/archive/2024/07/articles/2024/07/26/4")
        );
    }

    #[tokio::test]
    async fn crawls_every_day_inclusive() {
        let day1 = "https://www.vedomosti.ru/archive/2024/07/26";
        let fetcher = MockFetcher::new().with_page(
            day1,
            r#"
                <a href="/economics/articles/2024/07/26/1057-tsb-povisil">ЦБ повысил ставку</a>
                <a href="/politics/news/2024/07/26/1">Новость</a>
            "#,
        );
        let links = discover(&fetcher, &archive(), &window("2024-07-26", "2024-07-28")).await;

        assert_eq!(
            fetcher.requests(),
            vec![
                day1,
                "https://www.vedomosti.ru/archive/2024/07/27",
                "https://www.vedomosti.ru/archive/2024/07/28",
            ]
        );
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].url,
            "https://www.vedomosti.ru/economics/articles/2024/07/26/1057-tsb-povisil"
        );
        assert_eq!(links[0].title.as_deref(), Some("ЦБ повысил ставку"));
    }
}
