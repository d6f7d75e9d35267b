use mdi_core::config::TagPageOptions;
use mdi_core::models::CandidateLink;
use mdi_core::traits::Fetcher;
use url::Url;

use super::anchors;

/// Page 1 is the tag URL itself, page n is `tag_url?page=n`. Every anchor
/// whose href contains a `/` is a candidate.
pub(super) async fn discover<F: Fetcher>(fetcher: &F, options: &TagPageOptions) -> Vec<CandidateLink> {
    let mut links = Vec::new();

    for page in 1..=options.max_pages {
        let page_url = if page == 1 {
            options.tag_url.clone()
        } else {
            format!("{}?page={page}", options.tag_url)
        };
        let Ok(base) = Url::parse(&page_url) else {
            tracing::warn!(url = %page_url, "Invalid tag page URL");
            break;
        };

        let fetched = fetcher.fetch(&page_url).await;
        let Some(html) = fetched.body() else {
            tracing::warn!(url = %page_url, error = ?fetched.error, "Tag page empty");
            continue;
        };

        for anchor in anchors(html) {
            if !anchor.href.contains('/') {
                continue;
            }
            match base.join(&anchor.href) {
                Ok(url) => links.push(CandidateLink::new(url.to_string()).with_title(anchor.text)),
                Err(e) => tracing::trace!(href = %anchor.href, error = %e, "Unresolvable href"),
            }
        }
    }

    links
}
