//! Configuration loading for fedline clients.
//!
//! Configuration is loaded from a TOML file (default: `fedline.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use fedline_core::RetryPolicy;

/// Root configuration for a fedline client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Service configuration.
    #[serde(default)]
    pub service: ServiceConfig,
    /// OAuth client configuration.
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Session lifetime configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Timeouts and retries.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Timeline paging.
    #[serde(default)]
    pub timeline: TimelineConfig,
    /// Local storage.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the account's service (default: https://bsky.social).
    #[serde(default = "default_service_url")]
    pub url: String,
}

/// OAuth client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Client id sent to the authorization server.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Where the authorization server sends the user back.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Requested scope (default: "atproto transition:generic").
    #[serde(default = "default_scope")]
    pub scope: String,
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Refresh when the access token expires within this many seconds (default: 300).
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    /// Assumed access-token lifetime when the token does not say (default: 2 hours).
    #[serde(default = "default_access_lifetime_secs")]
    pub default_access_lifetime_secs: u64,
}

/// Timeouts and retries.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Per-call timeout in milliseconds (default: 15000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap on retry delay in milliseconds (default: 30000).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Timeline paging.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineConfig {
    /// Items requested per page (default: 30).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Profiles requested per hydration call (default: 25).
    #[serde(default = "default_hydration_batch")]
    pub hydration_batch: usize,
}

/// Local storage.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file, relative to the data directory.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

// Default value functions
fn default_service_url() -> String {
    "https://bsky.social".to_string()
}

fn default_client_id() -> String {
    "http://localhost".to_string()
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1/callback".to_string()
}

fn default_scope() -> String {
    "atproto transition:generic".to_string()
}

fn default_refresh_margin_secs() -> u64 {
    300 // 5 minutes
}

fn default_access_lifetime_secs() -> u64 {
    2 * 60 * 60 // 2 hours
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    30
}

fn default_hydration_batch() -> usize {
    25
}

fn default_database_path() -> PathBuf {
    PathBuf::from("fedline.db")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin_secs(),
            default_access_lifetime_secs: default_access_lifetime_secs(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            hydration_batch: default_hydration_batch(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl SessionConfig {
    /// Refresh margin as a duration.
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    /// Fallback access-token lifetime as a duration.
    pub fn default_access_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_access_lifetime_secs)
    }
}

impl NetworkConfig {
    /// Per-call timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retry policy built from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
