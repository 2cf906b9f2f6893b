//! Configuration management for xsoar-ctl
//!
//! This module handles loading, parsing, and validating the connection,
//! retry, sync and logging settings from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Connection to the XSOAR server
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Retry behavior for read requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Multi-tenant content sync settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml)?;
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix XSOAR_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("XSOAR_URL") {
            config.connection.url = url;
        }
        if let Ok(api_key) = std::env::var("XSOAR_API_KEY") {
            config.connection.api_key = Some(api_key);
        }
        if let Ok(api_key_id) = std::env::var("XSOAR_API_KEY_ID") {
            config.connection.api_key_id = Some(api_key_id);
        }
        if let Ok(username) = std::env::var("XSOAR_USERNAME") {
            config.connection.username = Some(username);
        }
        if let Ok(password) = std::env::var("XSOAR_PASSWORD") {
            config.connection.password = Some(password);
        }
        if let Ok(validate) = std::env::var("XSOAR_VALIDATE_CERTS") {
            config.connection.validate_certs = validate
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid XSOAR_VALIDATE_CERTS value".to_string()))?;
        }
        if let Ok(timeout) = std::env::var("XSOAR_REQUEST_TIMEOUT_SECS") {
            config.connection.request_timeout_secs = timeout.parse().map_err(|_| {
                ConfigError::Parse("Invalid XSOAR_REQUEST_TIMEOUT_SECS value".to_string())
            })?;
        }
        if let Ok(timeout) = std::env::var("XSOAR_SYNC_TIMEOUT_SECS") {
            config.sync.account_timeout_secs = timeout.parse().map_err(|_| {
                ConfigError::Parse("Invalid XSOAR_SYNC_TIMEOUT_SECS value".to_string())
            })?;
        }
        if let Ok(level) = std::env::var("XSOAR_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("XSOAR_LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        if conn.url.is_empty() {
            return Err(ConfigError::MissingRequired("connection.url".to_string()));
        }
        if !conn.url.starts_with("http://") && !conn.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "connection.url must be an http(s) URL, got '{}'",
                conn.url
            )));
        }
        match (&conn.api_key, &conn.username, &conn.password) {
            (Some(_), None, None) => {}
            (None, Some(_), Some(_)) => {}
            (Some(_), _, _) => {
                return Err(ConfigError::InvalidValue(
                    "connection.api_key and connection.username/password are mutually exclusive"
                        .to_string(),
                ))
            }
            (None, _, _) => {
                return Err(ConfigError::MissingRequired(
                    "connection.api_key or connection.username and connection.password"
                        .to_string(),
                ))
            }
        }
        if conn.api_key_id.is_some() && conn.api_key.is_none() {
            return Err(ConfigError::InvalidValue(
                "connection.api_key_id requires connection.api_key".to_string(),
            ));
        }
        if self.sync.account_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.account_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the XSOAR REST API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Base URL of the server, e.g. `https://xsoar.example.org`
    #[serde(default)]
    pub url: String,

    /// API key sent in the `Authorization` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// API key id sent as `x-xdr-auth-id` (XSOAR 8 advanced keys)
    #[serde(default)]
    pub api_key_id: Option<String>,

    /// Username for basic authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Whether TLS certificates are validated
    #[serde(default = "default_validate_certs")]
    pub validate_certs: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            api_key_id: None,
            username: None,
            password: None,
            validate_certs: default_validate_certs(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_validate_certs() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60
}

/// Retry configuration for read requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl RetryConfig {
    /// Configuration that never retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Multi-tenant content sync settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Time budget for diffing and pushing one account, in seconds
    #[serde(default = "default_account_timeout")]
    pub account_timeout_secs: u64,

    /// Field of an account record holding its run status
    #[serde(default = "default_status_field")]
    pub status_field: String,

    /// Status values (case-insensitive) that mark an account as down
    #[serde(default = "default_down_statuses")]
    pub down_statuses: Vec<String>,

    /// Fail the run after all accounts are processed if any account failed
    #[serde(default)]
    pub fail_on_error: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            account_timeout_secs: default_account_timeout(),
            status_field: default_status_field(),
            down_statuses: default_down_statuses(),
            fail_on_error: false,
        }
    }
}

fn default_account_timeout() -> u64 {
    300
}

fn default_status_field() -> String {
    "status".to_string()
}

fn default_down_statuses() -> Vec<String> {
    vec![
        "stopped".to_string(),
        "down".to_string(),
        "error".to_string(),
        "unreachable".to_string(),
    ]
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Replace `${VAR_NAME}` with the variable's value
///
/// Unset variables are left as written.
pub(crate) fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Parse(format!("Invalid variable pattern: {}", e)))?;

    Ok(re
        .replace_all(input, |caps: &regex_lite::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned())
}
