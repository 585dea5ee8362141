//! Per-record failure taxonomy
//!
//! A `FaxError` never aborts a batch: it is rendered with [`FaxError::detail`]
//! into the record's error column and the batch moves on.

use crate::fetch::FetchError;
use crate::retry::RetryError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FaxError {
    #[error("no search results for \"{query}\"")]
    NoSearchResult { query: String },

    #[error("rate limited after {attempts} attempts: {detail}")]
    RateLimitExhausted { attempts: u32, detail: String },

    #[error("network error after {attempts} attempts: {detail}")]
    NetworkExhausted { attempts: u32, detail: String },

    #[error("could not fetch {url}: {detail}")]
    PageFetch { url: String, detail: String },

    #[error("no fax number found on {url}")]
    NoMatchFound { url: String },

    #[error("{0}")]
    Unexpected(String),
}

impl FaxError {
    pub fn kind(&self) -> &'static str {
        match self {
            FaxError::NoSearchResult { .. } => "NoSearchResult",
            FaxError::RateLimitExhausted { .. } => "RateLimitExhausted",
            FaxError::NetworkExhausted { .. } => "NetworkExhausted",
            FaxError::PageFetch { .. } => "PageFetchError",
            FaxError::NoMatchFound { .. } => "NoMatchFound",
            FaxError::Unexpected(_) => "UnexpectedError",
        }
    }

    /// `Kind: message`, as written to the error column.
    pub fn detail(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Convert a retry failure for a call against `target`.
    pub fn from_retry(target: &str, error: RetryError<FetchError>) -> Self {
        match error {
            RetryError::RateLimitExhausted { attempts, last } => FaxError::RateLimitExhausted {
                attempts,
                detail: last.to_string(),
            },
            RetryError::NetworkExhausted { attempts, last } => FaxError::NetworkExhausted {
                attempts,
                detail: last.to_string(),
            },
            RetryError::Permanent(FetchError::Other(message)) => FaxError::Unexpected(message),
            RetryError::Permanent(e) => FaxError::PageFetch {
                url: target.to_string(),
                detail: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_is_prefixed_with_kind() {
        let e = FaxError::NoSearchResult {
            query: "Empty Clinic 公式サイト".into(),
        };
        assert_eq!(e.detail(), "NoSearchResult: no search results for \"Empty Clinic 公式サイト\"");
        assert!(FaxError::NoMatchFound { url: "u".into() }.detail().starts_with("NoMatchFound: "));
    }

    #[test]
    fn test_from_retry() {
        let last = FetchError::RateLimited { url: "http://s/".into() };
        let e = FaxError::from_retry("http://s/", RetryError::RateLimitExhausted { attempts: 4, last });
        assert_eq!(e.kind(), "RateLimitExhausted");
        assert!(e.to_string().contains("4 attempts"));

        let e = FaxError::from_retry(
            "http://x/",
            RetryError::Permanent(FetchError::Status { url: "http://x/".into(), status: 404 }),
        );
        assert_eq!(e.kind(), "PageFetchError");

        let e = FaxError::from_retry("http://x/", RetryError::Permanent(FetchError::Other("boom".into())));
        assert_eq!(e, FaxError::Unexpected("boom".into()));
    }
}
