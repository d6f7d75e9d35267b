//! Article text and metadata extraction from raw HTML.
//!
//! Body text comes from a boilerplate-removal pass: chrome elements are
//! detached, a content root is chosen, and block-level texts that are not
//! dominated by links are kept. Title and date follow a fixed cascade:
//! JSON-LD, then `<meta property="article:published_time">`, then
//! `<time datetime>`, then `<title>`.

use mdi_core::dates::normalize_date;
use mdi_core::models::{ExtractResult, ParseStatus};
use mdi_core::traits::ContentExtractor;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

const DROP_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "svg", "nav", "header", "footer", "aside", "form",
    "table", "figure",
];

/// class/id tokens that mark menus, ads, comments, share widgets and
/// related-link blocks.
const BOILERPLATE_TOKENS: &[&str] = &[
    "menu",
    "nav",
    "navbar",
    "breadcrumb",
    "breadcrumbs",
    "ad",
    "ads",
    "advert",
    "advertisement",
    "banner",
    "promo",
    "comment",
    "comments",
    "share",
    "sharing",
    "social",
    "related",
    "recommend",
    "subscribe",
    "sidebar",
    "cookie",
    "popup",
];

const ROOT_SELECTORS: &[&str] = &[
    "[itemprop=articleBody]",
    "article",
    "main",
    "[role=main]",
    "body",
];

const BLOCK_TAGS: &[&str] = &["p", "h2", "h3", "h4", "li", "blockquote", "pre"];

/// Blocks whose link text exceeds this share of their text are dropped.
const MAX_LINK_DENSITY: f64 = 0.5;

/// Minimum root text length, in chars, for the no-blocks fallback.
const MIN_FALLBACK_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, html: &str) -> ExtractResult {
        if html.trim().is_empty() {
            return ExtractResult::empty_html();
        }

        let mut document = Html::parse_document(html);
        let metadata = Metadata::read(&document);
        let text = body_text(&mut document);

        let parse_status = if text.is_some() {
            ParseStatus::Ok
        } else {
            ParseStatus::NoText
        };
        ExtractResult {
            title: metadata.title,
            published_at: metadata.published_at,
            text,
            parse_status,
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = selector(css)?;
    scope.select(&selector).next()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

struct Metadata {
    title: Option<String>,
    published_at: Option<String>,
}

impl Metadata {
    fn read(document: &Html) -> Self {
        let root = document.root_element();
        let json_ld = json_ld(root);

        let title = json_ld
            .as_ref()
            .and_then(|obj| obj.get("headline"))
            .and_then(Value::as_str)
            .map(collapse_whitespace)
            .and_then(non_empty)
            .or_else(|| first(root, "head > title").map(element_text).and_then(non_empty));

        let json_ld_date = json_ld.as_ref().and_then(|obj| {
            ["datePublished", "dateCreated"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        });
        let meta_date = first(root, r#"meta[property="article:published_time"]"#)
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string);
        let time_date = first(root, "time[datetime]")
            .and_then(|el| el.value().attr("datetime"))
            .map(str::to_string);

        let published_at = [json_ld_date, meta_date, time_date]
            .into_iter()
            .flatten()
            .find_map(|raw| normalize_date(&raw));

        Self {
            title,
            published_at,
        }
    }
}

/// First usable JSON-LD object: a top-level object, the first element of a
/// top-level array, or the first item of an `@graph`.
fn json_ld(root: ElementRef<'_>) -> Option<Map<String, Value>> {
    let selector = selector(r#"script[type="application/ld+json"]"#)?;
    root.select(&selector).find_map(|script| {
        let raw: String = script.text().collect();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => json_ld_object(value),
            Err(e) => {
                tracing::trace!(error = %e, "Skipping malformed JSON-LD");
                None
            }
        }
    })
}

fn json_ld_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(mut map) => {
            if !map.contains_key("headline") {
                if let Some(Value::Array(items)) = map.remove("@graph") {
                    return items.into_iter().next().and_then(json_ld_object);
                }
            }
            Some(map)
        }
        Value::Array(items) => items.into_iter().next().and_then(json_ld_object),
        _ => None,
    }
}

fn is_boilerplate(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if matches!(value.name(), "html" | "body") {
        return false;
    }
    if DROP_TAGS.contains(&value.name()) {
        return true;
    }
    value
        .attr("class")
        .into_iter()
        .chain(value.attr("id"))
        .flat_map(|attr| attr.split(|c: char| c.is_whitespace() || c == '-' || c == '_'))
        .map(str::to_ascii_lowercase)
        .any(|token| BOILERPLATE_TOKENS.contains(&token.as_str()))
}

fn body_text(document: &mut Html) -> Option<String> {
    let doomed: Vec<_> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| is_boilerplate(*el))
        .map(|el| el.id())
        .collect();
    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let root = document.root_element();
    let content_root = ROOT_SELECTORS
        .iter()
        .find_map(|css| first(root, css))
        .unwrap_or(root);

    let blocks: Vec<String> = content_root
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| BLOCK_TAGS.contains(&el.value().name()) && !has_nested_block(*el))
        .filter_map(block_text)
        .collect();

    if !blocks.is_empty() {
        return Some(blocks.join("\n"));
    }

    let fallback = element_text(content_root);
    if fallback.chars().count() >= MIN_FALLBACK_CHARS {
        Some(fallback)
    } else {
        None
    }
}

/// Outer blocks (an `<li>` wrapping a `<p>`) yield to their inner ones.
fn has_nested_block(element: ElementRef<'_>) -> bool {
    element
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|el| BLOCK_TAGS.contains(&el.value().name()))
}

fn block_text(element: ElementRef<'_>) -> Option<String> {
    let text = element_text(element);
    let total = text.chars().count();
    if total == 0 {
        return None;
    }

    let link_chars: usize = element
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "a")
        .map(|a| element_text(a).chars().count())
        .sum();
    if link_chars as f64 / total as f64 > MAX_LINK_DENSITY {
        return None;
    }
    Some(text)
}
