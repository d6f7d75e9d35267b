//! Compiled per-source discovery plans.
//!
//! [`SourceKind`](crate::config::SourceKind) is what the config file says;
//! [`Discovery`] is what a discoverer executes. Sitemap groups are expanded
//! into one plan per named sitemap, and all regexes are compiled up front so
//! that a bad pattern fails the run before any request is made.

use regex::Regex;

use crate::config::{
    CollectConfig, DateArchiveOptions, SearchApiOptions, SitemapOptions, SourceConfig, SourceKind,
    TagPageOptions,
};
use crate::error::AppError;
use crate::urls::UrlFilter;

/// Executable discovery strategy.
#[derive(Debug, Clone)]
pub enum Discovery {
    TagPage(TagPageOptions),
    SearchApi(SearchApiOptions),
    Sitemap(SitemapOptions),
    DateArchive(DateArchive),
}

impl Discovery {
    pub fn kind(&self) -> &'static str {
        match self {
            Discovery::TagPage(_) => "tag_page",
            Discovery::SearchApi(_) => "search_api",
            Discovery::Sitemap(_) => "sitemap",
            Discovery::DateArchive(_) => "date_archive",
        }
    }
}

/// Date-archive crawl with its article pattern compiled.
#[derive(Debug, Clone)]
pub struct DateArchive {
    pub url_template: String,
    pub article_pattern: Regex,
}

impl DateArchive {
    pub fn new(options: &DateArchiveOptions) -> Result<Self, AppError> {
        let article_pattern = Regex::new(&options.allow_article_regex).map_err(|e| {
            AppError::ConfigError(format!(
                "Invalid allow_article_regex '{}': {e}",
                options.allow_article_regex
            ))
        })?;
        Ok(Self {
            url_template: options.archive_url.clone(),
            article_pattern,
        })
    }

    /// Archive page URL for one day.
    pub fn url_for(&self, day: chrono::NaiveDate) -> String {
        self.url_template
            .replace("{yyyy}", &day.format("%Y").to_string())
            .replace("{mm}", &day.format("%m").to_string())
            .replace("{dd}", &day.format("%d").to_string())
    }
}

/// A named source ready to run: strategy plus URL gate.
#[derive(Debug, Clone)]
pub struct SourcePlan {
    pub name: String,
    pub discovery: Discovery,
    pub filter: UrlFilter,
}

impl SourcePlan {
    pub fn new(name: impl Into<String>, discovery: Discovery, filter: UrlFilter) -> Self {
        Self {
            name: name.into(),
            discovery,
            filter,
        }
    }
}

/// Expand every enabled source of the config into plans, in name order.
pub fn build_plans(config: &CollectConfig) -> Result<Vec<SourcePlan>, AppError> {
    let mut plans = Vec::new();
    for (name, source) in &config.sources {
        if !source.enabled {
            tracing::debug!(source = %name, "Source disabled, skipping");
            continue;
        }
        plans.extend(plans_for_source(name, source)?);
    }
    Ok(plans)
}

fn plans_for_source(name: &str, source: &SourceConfig) -> Result<Vec<SourcePlan>, AppError> {
    let filter = || UrlFilter::new(&source.allow_domains, &source.deny_url_regex);

    let plans = match &source.kind {
        SourceKind::TagPage(opts) => {
            vec![SourcePlan::new(name, Discovery::TagPage(opts.clone()), filter()?)]
        }
        SourceKind::SearchApi(opts) => {
            vec![SourcePlan::new(name, Discovery::SearchApi(opts.clone()), filter()?)]
        }
        SourceKind::Sitemap(opts) => {
            vec![SourcePlan::new(name, Discovery::Sitemap(opts.clone()), filter()?)]
        }
        SourceKind::DateArchive(opts) => vec![SourcePlan::new(
            name,
            Discovery::DateArchive(DateArchive::new(opts)?),
            filter()?,
        )],
        SourceKind::SitemapGroup(group) => group
            .sources
            .iter()
            .map(|(sub_name, entry)| {
                let options = SitemapOptions {
                    sitemap_url: entry.sitemap_url.clone(),
                    max_urls_per_event: group.max_urls_per_event,
                };
                let filter = UrlFilter::new(&entry.allow_domains, &entry.deny_url_regex)?;
                Ok(SourcePlan::new(
                    sub_name.clone(),
                    Discovery::Sitemap(options),
                    filter,
                ))
            })
            .collect::<Result<Vec<_>, AppError>>()?,
    };
    Ok(plans)
}
