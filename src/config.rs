//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub ingest: IngestConfig,
    pub websub: WebSubConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Server identity configuration
///
/// Tributary does not serve HTTP itself, but outbound activities carry
/// actor and activity URIs rooted at the host application's public URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Actor URI for a local user
    pub fn actor_url(&self, user_id: &str) -> String {
        format!("{}/@{}", self.base_url(), user_id)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Remote fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// HTTP timeout in seconds
    pub timeout_seconds: u64,
    /// Maximum remote document size in bytes
    ///
    /// Feeds larger than this are rejected as a connection error rather
    /// than parsed.
    pub max_body_bytes: usize,
    /// User-Agent header for outbound requests
    pub user_agent: String,
}

/// Ingestion policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// How many of the newest items stay unread on a first connect.
    ///
    /// Everything past this count is marked read immediately so a new
    /// subscription does not flood the unread counter with backlog.
    pub unread_backlog: usize,
    /// Default purge window (days) for new Followings
    pub purge_days: i64,
}

/// WebSub subscription configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebSubConfig {
    /// Base URL the host application exposes for hub callbacks.
    ///
    /// The per-following callback is `<callback_base>/<following_id>`.
    /// Empty disables WebSub subscription attempts.
    pub callback_base: String,
    /// Requested lease length in seconds
    pub lease_seconds: u64,
}

/// Poller scheduling configuration (binary only)
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between connect sweeps
    pub poll_interval_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (TRIBUTARY_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/tributary.db")?
            .set_default("fetch.timeout_seconds", 30)?
            .set_default("fetch.max_body_bytes", 5 * 1024 * 1024)?
            .set_default("fetch.user_agent", "Tributary/0.1.0")?
            .set_default("ingest.unread_backlog", 6)?
            .set_default("ingest.purge_days", 14)?
            .set_default("websub.callback_base", "")?
            .set_default("websub.lease_seconds", 604_800)?
            .set_default("scheduler.poll_interval_seconds", 900)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (TRIBUTARY_*)
            .add_source(
                Environment::with_prefix("TRIBUTARY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.fetch.max_body_bytes == 0 {
            return Err(crate::error::AppError::Config(
                "fetch.max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if self.ingest.purge_days <= 0 {
            return Err(crate::error::AppError::Config(
                "ingest.purge_days must be greater than 0".to_string(),
            ));
        }

        if !self.websub.callback_base.is_empty() {
            url::Url::parse(&self.websub.callback_base).map_err(|e| {
                crate::error::AppError::Config(format!(
                    "websub.callback_base is not a valid URL: {}",
                    e
                ))
            })?;
        }

        Ok(())
    }
}
