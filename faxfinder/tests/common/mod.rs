// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

pub mod fixtures;
pub mod wiremock_helpers;

use faxfinder::config::AppConfig;
use faxfinder::fetch::{build_client, HttpFetcher};
use faxfinder::retry::RecordingSleeper;
use faxfinder::search::HttpSearch;
use faxfinder::FaxFinder;
use std::sync::Arc;
use wiremock::MockServer;

/// Default configuration pointed at the mock server's search endpoint.
pub fn test_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.search.endpoint = format!("{}/html/", server.uri());
    config
}

/// Real HTTP search and fetch against `server`, with sleeps only recorded.
pub fn http_finder(config: &AppConfig, sleeper: &RecordingSleeper) -> FaxFinder {
    let client = build_client(&config.http).unwrap();
    let search = HttpSearch::new(client.clone(), &config.search).unwrap();
    let fetcher = HttpFetcher::new(client, config.http.max_body_bytes);
    FaxFinder::new(Arc::new(search), Arc::new(fetcher), Arc::new(sleeper.clone()), config).unwrap()
}
