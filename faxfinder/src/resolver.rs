//! Candidate URL resolution
//!
//! Turns an organization name into the URL of the page to extract from:
//! a supplied URL is used as is, otherwise the name is searched. Listing pages
//! can then be followed to a per-organization detail page.

use crate::config::{ConfigError, DetailConfig, SearchConfig};
use crate::error::FaxError;
use crate::events::EventSender;
use crate::fetch::PageFetcher;
use crate::page::Page;
use crate::retry::RetryController;
use crate::search::SearchProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::debug;
use url::Url;

// Safety: constant selector, parse cannot fail.
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

pub struct Resolver {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    retry: RetryController,
    config: SearchConfig,
}

impl Resolver {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        retry: RetryController,
        config: SearchConfig,
    ) -> Self {
        Self {
            search,
            fetcher,
            retry,
            config,
        }
    }

    /// URL to extract from for `name`. A non-empty `existing_url` is returned
    /// without any network call.
    pub async fn resolve(
        &self,
        name: &str,
        existing_url: Option<&str>,
        events: &EventSender,
    ) -> Result<String, FaxError> {
        if let Some(url) = existing_url.map(str::trim).filter(|u| !u.is_empty()) {
            events.log(format!("{}: using supplied URL {}", name, url));
            return Ok(url.to_string());
        }

        let query = self.config.query_for(name);
        events.log(format!("{}: searching for \"{}\"", name, query));
        let limit = self.config.max_results;
        let candidates = self
            .retry
            .call("search", events, || self.search.search(query.as_str(), limit))
            .await
            .map_err(|e| FaxError::from_retry(&self.config.endpoint, e))?;

        let Some(first) = candidates.first().cloned() else {
            return Err(FaxError::NoSearchResult { query });
        };

        if self.config.title_match {
            if let Some(url) = self.first_title_match(name, &candidates, events).await {
                events.log(format!("{}: title match at {}", name, url));
                return Ok(url);
            }
            events.log(format!("{}: no candidate title matched, using first result", name));
        }

        events.log(format!("{}: candidate URL {}", name, first));
        Ok(first)
    }

    /// First candidate whose `<title>` contains `name` literally. Name
    /// variants (legal suffixes, spacing) are not matched.
    async fn first_title_match(
        &self,
        name: &str,
        candidates: &[String],
        events: &EventSender,
    ) -> Option<String> {
        for url in candidates {
            match self
                .retry
                .call("title check", events, || self.fetcher.fetch(url.as_str()))
                .await
            {
                Ok(body) => {
                    let title = page_title(&body);
                    debug!("Title of {}: {:?}", url, title);
                    if title.is_some_and(|t| t.contains(name)) {
                        return Some(url.clone());
                    }
                }
                Err(e) => events.log(format!("{}: skipping candidate {} ({})", name, url, e)),
            }
        }
        None
    }
}

fn page_title(body: &str) -> Option<String> {
    Page::parse(body).title()
}

/// Finds a per-organization detail link on a listing page.
#[derive(Debug, Clone)]
pub struct DetailLinks {
    pattern: Regex,
    name_suffixes: Vec<String>,
}

impl DetailLinks {
    pub fn new(pattern: Regex, name_suffixes: Vec<String>) -> Self {
        Self {
            pattern,
            name_suffixes,
        }
    }

    /// `None` when the hop is disabled.
    pub fn from_config(config: &DetailConfig) -> Result<Option<Self>, ConfigError> {
        if !config.enabled {
            return Ok(None);
        }
        let pattern = Regex::new(&config.link_pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern_name: "detail.link_pattern".to_string(),
            pattern: config.link_pattern.clone(),
            error: e.to_string(),
        })?;
        Ok(Some(Self::new(pattern, config.name_suffixes.clone())))
    }

    /// The name plus the name with each configured suffix removed.
    pub fn name_variants(&self, name: &str) -> Vec<String> {
        let name = name.trim();
        let mut variants = vec![name.to_string()];
        for suffix in &self.name_suffixes {
            let stripped = name.replace(suffix.as_str(), "").trim().to_string();
            if !stripped.is_empty() && !variants.contains(&stripped) {
                variants.push(stripped);
            }
        }
        variants
    }

    /// Absolute URL of the first anchor whose href matches the detail pattern
    /// and whose text contains a name variant.
    pub fn find(&self, body: &str, page_url: &str, name: &str) -> Option<String> {
        let base = Url::parse(page_url).ok()?;
        let variants = self.name_variants(name);
        let document = Html::parse_document(body);

        document.select(&ANCHOR_SELECTOR).find_map(|anchor| {
            let href = anchor.value().attr("href")?;
            if !self.pattern.is_match(href) {
                return None;
            }
            let text: String = anchor.text().collect();
            if !variants.iter().any(|v| text.contains(v.as_str())) {
                return None;
            }
            base.join(href).ok().map(|u| u.to_string())
        })
    }
}
