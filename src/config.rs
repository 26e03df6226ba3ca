use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TAX_RATE: f64 = 0.13;
const DEFAULT_PLATFORM_FEE_RATE: f64 = 0.05;
const DEFAULT_CURRENCY: &str = "CAD";
const DEFAULT_RESTOCK_COOLDOWN_HOURS: i64 = 12;
const DEFAULT_RESTOCK_THRESHOLD: u64 = 2;
const DEFAULT_ALLOCATION_RETRY_LIMIT: u32 = 3;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Hosted checkout gateway connection settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Base URL of the checkout gateway API
    #[validate(length(min = 1))]
    pub base_url: String,

    /// Bearer key sent with every gateway request
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4242".to_string(),
            api_key: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Sales tax rate applied after the platform fee (0.13 = 13%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_rate")]
    pub tax_rate: f64,

    /// Platform fee rate applied to the discounted base
    #[serde(default = "default_platform_fee_rate")]
    #[validate(custom = "validate_rate")]
    pub platform_fee_rate: f64,

    /// ISO currency code used when a listing does not carry one
    #[serde(default = "default_currency")]
    #[validate(length(min = 3, max = 3))]
    pub default_currency: String,

    /// Minimum hours between two restock notifications for one listing item
    #[serde(default = "default_restock_cooldown_hours")]
    pub restock_cooldown_hours: i64,

    /// Available-unit count at or below which a restock notification fires
    #[serde(default = "default_restock_threshold")]
    pub restock_threshold: u64,

    /// Attempts made by the allocator when it loses a race but stock remains
    #[serde(default = "default_allocation_retry_limit")]
    #[validate(range(min = 1, max = 20))]
    pub allocation_retry_limit: u32,

    /// Checkout gateway settings
    #[serde(default)]
    #[validate]
    pub payment_gateway: PaymentGatewayConfig,

    /// Shared secret for payment webhook signatures
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Allowed clock skew for signed webhooks (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: i64,

    /// Event channel capacity
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a new configuration with sensible defaults for everything but
    /// the connection and listen settings.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            tax_rate: default_tax_rate(),
            platform_fee_rate: default_platform_fee_rate(),
            default_currency: default_currency(),
            restock_cooldown_hours: default_restock_cooldown_hours(),
            restock_threshold: default_restock_threshold(),
            allocation_retry_limit: default_allocation_retry_limit(),
            payment_gateway: PaymentGatewayConfig::default(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let secret_missing = self
            .webhook_secret
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true);
        if !self.is_development() && secret_missing {
            let mut err = ValidationError::new("webhook_secret_required");
            err.message = Some(
                "Set APP__WEBHOOK_SECRET outside development so payment callbacks can be verified"
                    .into(),
            );
            errors.add("webhook_secret", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}

fn default_platform_fee_rate() -> f64 {
    DEFAULT_PLATFORM_FEE_RATE
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_restock_cooldown_hours() -> i64 {
    DEFAULT_RESTOCK_COOLDOWN_HOURS
}

fn default_restock_threshold() -> u64 {
    DEFAULT_RESTOCK_THRESHOLD
}

fn default_allocation_retry_limit() -> u32 {
    DEFAULT_ALLOCATION_RETRY_LIMIT
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_webhook_tolerance_secs() -> i64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate < 0.0 || rate > 1.0 {
        let mut err = ValidationError::new("rate");
        err.message = Some("rates must be finite values between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("marketplace_settlement={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://marketplace.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn defaults_match_marketplace_rates() {
        let cfg = base_config();
        assert_eq!(cfg.tax_rate, 0.13);
        assert_eq!(cfg.platform_fee_rate, 0.05);
        assert_eq!(cfg.default_currency, "CAD");
        assert_eq!(cfg.restock_cooldown_hours, 12);
    }

    #[test]
    fn production_requires_webhook_secret() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());

        let mut cfg = base_config();
        cfg.webhook_secret = Some("whsec_live_123".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_missing_secret() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn out_of_range_rates_are_rejected() {
        let mut cfg = base_config();
        cfg.tax_rate = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.platform_fee_rate = -0.01;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let mut cfg = base_config();
        cfg.event_channel_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
