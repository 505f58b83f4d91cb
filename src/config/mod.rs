//! Configuration management
//!
//! This module handles loading and parsing configuration for the Alexandria platform.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Payment ledger configuration
    #[serde(default)]
    pub payments: PaymentsConfig,
    /// AlexPoints configuration
    #[serde(default)]
    pub points: PointsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/alexandria.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Cache configuration (in-process moka cache)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_ttl() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    1_000
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
        }
    }
}

fn default_session_days() -> i64 {
    7
}

/// Payment ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Platform share of every sale, in percent (0-100, fractional allowed)
    #[serde(default = "default_platform_fee_percent")]
    pub platform_fee_percent: f64,
    /// ISO currency code all prices are denominated in
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Shared secret used to sign gateway webhooks
    #[serde(default)]
    pub webhook_secret: String,
    /// Smallest payout an educator may request (minor units)
    #[serde(default = "default_min_payout")]
    pub min_payout: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            platform_fee_percent: default_platform_fee_percent(),
            currency: default_currency(),
            webhook_secret: String::new(),
            min_payout: default_min_payout(),
        }
    }
}

fn default_platform_fee_percent() -> f64 {
    20.0
}

fn default_currency() -> String {
    "NGN".to_string()
}

fn default_min_payout() -> i64 {
    100_000
}

impl PaymentsConfig {
    /// Platform fee expressed in basis points (1% = 100 bps)
    pub fn fee_basis_points(&self) -> u32 {
        (self.platform_fee_percent * 100.0).round().clamp(0.0, 10_000.0) as u32
    }
}

/// AlexPoints configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Whether points are awarded at all
    #[serde(default = "default_points_enabled")]
    pub enabled: bool,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            enabled: default_points_enabled(),
        }
    }
}

fn default_points_enabled() -> bool {
    true
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - ALEXANDRIA_SERVER_HOST
    /// - ALEXANDRIA_SERVER_PORT
    /// - ALEXANDRIA_SERVER_CORS_ORIGIN
    /// - ALEXANDRIA_DATABASE_DRIVER
    /// - ALEXANDRIA_DATABASE_URL
    /// - ALEXANDRIA_CACHE_TTL_SECONDS
    /// - ALEXANDRIA_PAYMENTS_PLATFORM_FEE_PERCENT
    /// - ALEXANDRIA_PAYMENTS_CURRENCY
    /// - ALEXANDRIA_PAYMENTS_WEBHOOK_SECRET
    /// - ALEXANDRIA_POINTS_ENABLED
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot constrain on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pct = self.payments.platform_fee_percent;
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(ConfigError::ValidationError(format!(
                "payments.platform_fee_percent must be between 0 and 100, got {}",
                pct
            )));
        }
        if self.payments.min_payout < 0 {
            return Err(ConfigError::ValidationError(
                "payments.min_payout cannot be negative".to_string(),
            ));
        }
        if self.payments.currency.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "payments.currency cannot be empty".to_string(),
            ));
        }
        if self.auth.session_days <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.session_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ALEXANDRIA_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("ALEXANDRIA_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("ALEXANDRIA_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("ALEXANDRIA_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("ALEXANDRIA_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(ttl) = std::env::var("ALEXANDRIA_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = ttl;
            }
        }

        if let Ok(pct) = std::env::var("ALEXANDRIA_PAYMENTS_PLATFORM_FEE_PERCENT") {
            if let Ok(pct) = pct.parse::<f64>() {
                self.payments.platform_fee_percent = pct;
            }
        }
        if let Ok(currency) = std::env::var("ALEXANDRIA_PAYMENTS_CURRENCY") {
            self.payments.currency = currency.to_uppercase();
        }
        if let Ok(secret) = std::env::var("ALEXANDRIA_PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = secret;
        }

        if let Ok(enabled) = std::env::var("ALEXANDRIA_POINTS_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.points.enabled = true,
                "false" | "0" | "no" => self.points.enabled = false,
                _ => {}
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
