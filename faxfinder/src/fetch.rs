//! HTTP page fetching

use crate::config::HttpConfig;
use crate::retry::{Retryable, Transience};
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP 429 Too Many Requests from {url}")]
    RateLimited { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {detail}")]
    Network { url: String, detail: String },

    #[error("unsupported content type '{content_type}' from {url}")]
    NotHtml { url: String, content_type: String },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("{0}")]
    Other(String),
}

/// Whether an error message reads like a rate-limit response.
pub fn mentions_rate_limit(message: &str) -> bool {
    message.contains("429") || message.contains("Too Many Requests")
}

impl FetchError {
    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.status() == Some(StatusCode::TOO_MANY_REQUESTS) {
            return FetchError::RateLimited { url: url.to_string() };
        }
        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
            return FetchError::Network {
                url: url.to_string(),
                detail: error.to_string(),
            };
        }
        FetchError::Other(error.to_string())
    }
}

impl Retryable for FetchError {
    fn transience(&self) -> Transience {
        match self {
            FetchError::RateLimited { .. } => Transience::RateLimited,
            FetchError::Status { status: 429, .. } => Transience::RateLimited,
            FetchError::Status { status, .. } if *status >= 500 => Transience::Transient,
            FetchError::Network { detail, .. } if mentions_rate_limit(detail) => Transience::RateLimited,
            FetchError::Network { .. } => Transience::Transient,
            FetchError::Other(message) if mentions_rate_limit(message) => Transience::RateLimited,
            _ => Transience::Permanent,
        }
    }
}

/// Map a response status to an error, 429 included.
pub fn check_status(url: &str, status: StatusCode) -> Result<(), FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited { url: url.to_string() });
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return its decoded body.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Build the shared HTTP client used for search and page fetches.
pub fn build_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(client: Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn is_markup(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.is_empty()
        || ct.starts_with("text/html")
        || ct.starts_with("application/xhtml")
        || ct.starts_with("text/plain")
}

/// Appends `chunk` unless the total would pass `limit`.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    if body.len() + chunk.len() > limit {
        return false;
    }
    body.extend_from_slice(chunk);
    true
}

fn charset_of(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"'))
        })
        .and_then(|label| Encoding::for_label(label.as_bytes()))
}

/// Decode a body with the Content-Type charset, UTF-8 when absent or unknown.
/// A byte order mark takes precedence.
pub fn decode_body(bytes: &[u8], content_type: &str) -> String {
    let encoding = charset_of(content_type).unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        check_status(url, response.status())?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_markup(&content_type) {
            return Err(FetchError::NotHtml {
                url: url.to_string(),
                content_type,
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_body_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            if !append_capped(&mut bytes, &chunk, self.max_body_bytes) {
                return Err(too_large());
            }
        }
        let body = decode_body(&bytes, &content_type);
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}
