//! Web search for candidate URLs
//!
//! [`HttpSearch`] queries an HTML search endpoint and scrapes result links
//! from the response. Redirect-wrapped links (`/l/?uddg=<target>`) are
//! unwrapped to their target.

use crate::config::{ConfigError, SearchConfig};
use crate::fetch::{check_status, FetchError};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Up to `limit` candidate URLs for `query`, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpSearch {
    client: Client,
    endpoint: Url,
    query_param: String,
    result_selector: Selector,
}

impl HttpSearch {
    pub fn new(client: Client, config: &SearchConfig) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|_| ConfigError::InvalidUrl {
            field: "search.endpoint".to_string(),
            url: config.endpoint.clone(),
        })?;
        let result_selector =
            Selector::parse(&config.result_selector).map_err(|e| ConfigError::InvalidSelector {
                field: "search.result_selector".to_string(),
                selector: config.result_selector.clone(),
                error: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint,
            query_param: config.query_param.clone(),
            result_selector,
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, FetchError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(&self.query_param, query);
        let target = url.to_string();
        debug!("Searching: {}", target);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&target, e))?;
        check_status(&target, response.status())?;
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&target, e))?;

        let results = parse_results(&body, &self.endpoint, &self.result_selector, limit);
        debug!("Search for '{}' returned {} result(s)", query, results.len());
        Ok(results)
    }
}

/// Result links from a search response page, unwrapped, absolute, http(s)
/// only, de-duplicated and truncated to `limit`.
pub fn parse_results(body: &str, base: &Url, selector: &Selector, limit: usize) -> Vec<String> {
    let document = Html::parse_document(body);
    let mut results: Vec<String> = Vec::new();

    for anchor in document.select(selector) {
        if results.len() >= limit {
            break;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(link) = resolve_result_link(base, href) {
            if !results.contains(&link) {
                results.push(link);
            }
        }
    }
    results
}

fn resolve_result_link(base: &Url, href: &str) -> Option<String> {
    let joined = base.join(href.trim()).ok()?;
    let target = joined
        .query_pairs()
        .find(|(k, _)| k == "uddg")
        .and_then(|(_, v)| Url::parse(&v).ok())
        .unwrap_or(joined);

    matches!(target.scheme(), "http" | "https").then(|| target.to_string())
}
