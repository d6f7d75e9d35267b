use std::io::Read;

use flate2::read::GzDecoder;
use mdi_core::config::SitemapOptions;
use mdi_core::dates::Timestamp;
use mdi_core::models::{CandidateLink, EventWindow, FetchResult};
use mdi_core::traits::Fetcher;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    loc: Option<String>,
    lastmod: Option<String>,
}

/// `(loc, lastmod)` pairs of a `<urlset>` document.
fn parse_urlset(xml: &str) -> Result<Vec<(String, Option<String>)>, quick_xml::de::DeError> {
    let set: UrlSet = quick_xml::de::from_str(xml)?;
    Ok(set
        .urls
        .into_iter()
        .filter_map(|entry| {
            let loc = entry.loc.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())?;
            let lastmod = entry
                .lastmod
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty());
            Some((loc, lastmod))
        })
        .collect())
}

fn sitemap_text(url: &str, fetched: FetchResult) -> Option<String> {
    if url.ends_with(".gz") {
        let bytes = fetched.bytes.filter(|b| !b.is_empty())?;
        let mut xml = String::new();
        if let Err(e) = GzDecoder::new(bytes.as_slice()).read_to_string(&mut xml) {
            tracing::warn!(%url, error = %e, "Failed to decompress sitemap");
            return None;
        }
        Some(xml)
    } else {
        fetched.text.filter(|t| !t.is_empty())
    }
}

/// Entries with a parseable `lastmod` outside the window are dropped; the
/// rest are kept, up to `max_urls_per_event`.
pub(super) async fn discover<F: Fetcher>(
    fetcher: &F,
    options: &SitemapOptions,
    window: &EventWindow,
) -> Vec<CandidateLink> {
    let url = options.sitemap_url.as_str();
    let fetched = fetcher.fetch(url).await;
    if let Some(error) = &fetched.error {
        tracing::warn!(%url, %error, "Sitemap fetch failed");
    }
    let Some(xml) = sitemap_text(url, fetched) else {
        return Vec::new();
    };

    let entries = match parse_urlset(&xml) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(%url, error = %e, "Failed to parse sitemap");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter(|(_, lastmod)| {
            lastmod
                .as_deref()
                .and_then(Timestamp::parse)
                .is_none_or(|ts| window.contains(ts.date()))
        })
        .take(options.max_urls_per_event)
        .map(|(loc, lastmod)| CandidateLink {
            url: loc,
            title: None,
            summary: None,
            published_at: lastmod,
        })
        .collect()
}
