//! Configuration management for faxfinder
//!
//! Configuration is read from `./config/faxfinder.toml` or the file given with
//! `--config`. The template embedded below is the reference for every
//! default; each section may be omitted and falls back to those values.

use crate::retry::RetryPolicy;
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/faxfinder.toml";

/// Default configuration file content, written by `--init`
pub const DEFAULT_CONFIG: &str = include_str!("../config/faxfinder.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Configuration file already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid regex pattern '{pattern_name}': {error}\n  Pattern: {pattern}")]
    InvalidRegex {
        pattern_name: String,
        pattern: String,
        error: String,
    },

    #[error("Invalid CSS selector in '{field}': {error}\n  Selector: {selector}")]
    InvalidSelector {
        field: String,
        selector: String,
        error: String,
    },

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must contain the {placeholder} placeholder")]
    MissingPlaceholder { field: String, placeholder: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub detail: DetailConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

/// Search endpoint and candidate URL selection
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    /// `{name}` is replaced by the organization name
    #[serde(default = "default_query_template")]
    pub query_template: String,
    #[serde(default = "default_result_selector")]
    pub result_selector: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Accept the first candidate whose page title contains the name
    #[serde(default)]
    pub title_match: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            query_param: default_query_param(),
            query_template: default_query_template(),
            result_selector: default_result_selector(),
            max_results: default_max_results(),
            title_match: false,
        }
    }
}

impl SearchConfig {
    pub fn query_for(&self, name: &str) -> String {
        self.query_template.replace("{name}", name)
    }
}

fn default_endpoint() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}

fn default_query_param() -> String {
    "q".to_string()
}

fn default_query_template() -> String {
    "{name} 公式サイト".to_string()
}

fn default_result_selector() -> String {
    "a.result__a".to_string()
}

fn default_max_results() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.base_delay_secs))
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    5
}

/// Batch pacing and output files
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BatchConfig {
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_record_pause_ms")]
    pub record_pause_ms: u64,
    #[serde(default = "default_checkpoint_suffix")]
    pub checkpoint_suffix: String,
    #[serde(default = "default_result_suffix")]
    pub result_suffix: String,
    #[serde(default)]
    pub utf8_bom: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            record_pause_ms: default_record_pause_ms(),
            checkpoint_suffix: default_checkpoint_suffix(),
            result_suffix: default_result_suffix(),
            utf8_bom: false,
        }
    }
}

impl BatchConfig {
    pub fn record_pause(&self) -> Duration {
        Duration::from_millis(self.record_pause_ms)
    }
}

fn default_checkpoint_interval() -> usize {
    10
}

fn default_record_pause_ms() -> u64 {
    2000
}

fn default_checkpoint_suffix() -> String {
    "_temp".to_string()
}

fn default_result_suffix() -> String {
    "_result".to_string()
}

/// Listing page to detail page hop
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DetailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_link_pattern")]
    pub link_pattern: String,
    #[serde(default = "default_name_suffixes")]
    pub name_suffixes: Vec<String>,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            link_pattern: default_link_pattern(),
            name_suffixes: default_name_suffixes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_link_pattern() -> String {
    r"detail\.html\?id=\d+".to_string()
}

fn default_name_suffixes() -> Vec<String> {
    vec!["クリニック".to_string(), "医院".to_string()]
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist. Without one, the default path is used if
    /// present and the built-in defaults otherwise.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        match Self::load() {
            Err(ConfigError::FileNotFound(path)) => {
                warn!(
                    "No configuration at {}, using built-in defaults (run with --init to create one)",
                    path.display()
                );
                Self::from_toml(DEFAULT_CONFIG)
            }
            other => other,
        }
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "http.user_agent".to_string(),
            });
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "http.request_timeout_secs".to_string(),
            });
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "http.max_body_bytes".to_string(),
            });
        }

        if !(self.search.endpoint.starts_with("http://") || self.search.endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl {
                field: "search.endpoint".to_string(),
                url: self.search.endpoint.clone(),
            });
        }
        if self.search.query_param.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "search.query_param".to_string(),
            });
        }
        if !self.search.query_template.contains("{name}") {
            return Err(ConfigError::MissingPlaceholder {
                field: "search.query_template".to_string(),
                placeholder: "{name}".to_string(),
            });
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "search.max_results".to_string(),
            });
        }
        Selector::parse(&self.search.result_selector).map_err(|e| ConfigError::InvalidSelector {
            field: "search.result_selector".to_string(),
            selector: self.search.result_selector.clone(),
            error: e.to_string(),
        })?;

        if self.batch.checkpoint_interval == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "batch.checkpoint_interval".to_string(),
            });
        }

        self.validate_regex("detail.link_pattern", &self.detail.link_pattern)?;

        Ok(())
    }

    fn validate_regex(&self, name: &str, pattern: &str) -> Result<(), ConfigError> {
        Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern_name: name.to_string(),
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?;
        Ok(())
    }

    /// Write the default configuration file, refusing to overwrite one
    pub fn create_default_config(path: &Path) -> Result<PathBuf, ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;

        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_parses() {
        let config: Result<AppConfig, _> = toml::from_str(DEFAULT_CONFIG);
        assert!(config.is_ok(), "Default config should parse: {:?}", config.err());
    }

    #[test]
    fn test_default_config_validates() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(config.validate().is_ok(), "Default config should validate");
    }

    #[test]
    fn test_template_matches_built_in_defaults() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_sections_are_optional() {
        let config = AppConfig::from_toml(
            r#"
[retry]
max_retries = 1
"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay_secs, 5);
        assert_eq!(config.batch.checkpoint_interval, 10);
        assert_eq!(config.search.query_for("Sample Clinic"), "Sample Clinic 公式サイト");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig { max_retries: 2, base_delay_secs: 1 }.policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay(1, true), Duration::from_secs(8));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("[detail]\nlink_pattern = '('", "detail.link_pattern"),
            ("[search]\nquery_template = 'clinic'", "{name}"),
            ("[search]\nresult_selector = 'a[['", "search.result_selector"),
            ("[batch]\ncheckpoint_interval = 0", "batch.checkpoint_interval"),
            ("[search]\nendpoint = 'ftp://x'", "search.endpoint"),
        ];
        for (toml_text, needle) in cases {
            let err = AppConfig::from_toml(toml_text).unwrap_err();
            assert!(err.to_string().contains(needle), "{} -> {}", toml_text, err);
        }
    }

    #[test]
    fn test_create_default_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("faxfinder.toml");

        let created = AppConfig::create_default_config(&path).unwrap();
        assert_eq!(fs::read_to_string(&created).unwrap(), DEFAULT_CONFIG);
        assert!(matches!(
            AppConfig::create_default_config(&path),
            Err(ConfigError::AlreadyExists(_))
        ));
        assert!(AppConfig::load_from_path(&path).is_ok());
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            AppConfig::load_or_default(Some(&missing)),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
