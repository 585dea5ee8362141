//! One remote fax lookup: resolve, fetch, follow detail link, extract

use crate::config::{AppConfig, ConfigError};
use crate::error::FaxError;
use crate::events::EventSender;
use crate::extract::{FaxExtractor, FaxMatch, SearchScope};
use crate::fetch::{build_client, HttpFetcher, PageFetcher};
use crate::patterns::Strategy;
use crate::resolver::{DetailLinks, Resolver};
use crate::retry::{RetryController, Sleeper, TokioSleeper};
use crate::search::{HttpSearch, SearchProvider};
use anyhow::Context;
use std::sync::Arc;

/// A fax number and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaxLookup {
    pub number: String,
    /// Page the number was extracted from
    pub url: String,
    pub strategy: Strategy,
    pub scope: SearchScope,
}

pub struct FaxFinder {
    resolver: Resolver,
    fetcher: Arc<dyn PageFetcher>,
    retry: RetryController,
    detail: Option<DetailLinks>,
    extractor: FaxExtractor,
}

impl FaxFinder {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        sleeper: Arc<dyn Sleeper>,
        config: &AppConfig,
    ) -> Result<Self, ConfigError> {
        let retry = RetryController::new(config.retry.policy(), sleeper);
        Ok(Self {
            resolver: Resolver::new(search, fetcher.clone(), retry.clone(), config.search.clone()),
            fetcher,
            retry,
            detail: DetailLinks::from_config(&config.detail)?,
            extractor: FaxExtractor::default(),
        })
    }

    /// Finder backed by real HTTP search and fetches.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client = build_client(&config.http).context("Failed to build HTTP client")?;
        let search = HttpSearch::new(client.clone(), &config.search)?;
        let fetcher = HttpFetcher::new(client, config.http.max_body_bytes);
        Ok(Self::new(
            Arc::new(search),
            Arc::new(fetcher),
            Arc::new(TokioSleeper),
            config,
        )?)
    }

    pub async fn lookup(
        &self,
        name: &str,
        url: Option<&str>,
        events: &EventSender,
    ) -> Result<FaxLookup, FaxError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FaxError::Unexpected("record has an empty name".to_string()));
        }

        let url = self.resolver.resolve(name, url, events).await?;
        let body = self.fetch_page(&url, events).await?;

        let detail_url = self.detail.as_ref().and_then(|d| d.find(&body, &url, name));
        let (page_url, body) = match detail_url {
            Some(detail_url) => {
                events.log(format!("{}: following detail page {}", name, detail_url));
                let detail_body = self.fetch_page(&detail_url, events).await?;
                (detail_url, detail_body)
            }
            None => (url, body),
        };

        self.extract_body(name, &page_url, &body, events)
    }

    /// Fetch `url` and extract from it directly, without search or detail hop.
    pub async fn lookup_url(&self, url: &str, events: &EventSender) -> Result<FaxLookup, FaxError> {
        let body = self.fetch_page(url, events).await?;
        self.extract_body(url, url, &body, events)
    }

    async fn fetch_page(&self, url: &str, events: &EventSender) -> Result<String, FaxError> {
        self.retry
            .call("page fetch", events, || self.fetcher.fetch(url))
            .await
            .map_err(|e| FaxError::from_retry(url, e))
    }

    fn extract_body(
        &self,
        name: &str,
        page_url: &str,
        body: &str,
        events: &EventSender,
    ) -> Result<FaxLookup, FaxError> {
        match self.extractor.extract_html(body) {
            Some(FaxMatch {
                number,
                strategy,
                scope,
                ..
            }) => {
                events.log(format!("{}: found {} via {} in {}", name, number, strategy, scope));
                Ok(FaxLookup {
                    number,
                    url: page_url.to_string(),
                    strategy,
                    scope,
                })
            }
            None => {
                events.log(format!("{}: no fax number on {}", name, page_url));
                Err(FaxError::NoMatchFound {
                    url: page_url.to_string(),
                })
            }
        }
    }
}
