use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_GATEWAY_MAX_RETRIES: u32 = 3;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_CHECKOUT_EXPIRY_MINUTES: i64 = 30;
const DEFAULT_RECONCILIATION_INTERVAL_SECS: u64 = 60;

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Base URL of the payment provider's API
    pub base_url: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Shared secret for inbound webhook signatures; unsigned webhooks are
    /// rejected when this is set
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Maximum accepted webhook timestamp skew in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    /// Per-call timeout for outbound gateway requests
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Bounded retry count for transient gateway failures
    #[serde(default = "default_gateway_retries")]
    pub max_retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            api_key: String::new(),
            webhook_secret: None,
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            max_retries: DEFAULT_GATEWAY_MAX_RETRIES,
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// ISO 4217 currency for all orders
    #[validate(length(equal = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Minutes a pending order may wait for payment confirmation before the
    /// reconciliation sweep cancels it as abandoned
    #[serde(default = "default_checkout_expiry")]
    pub checkout_expiry_minutes: i64,

    /// Seconds between reconciliation sweeps
    #[serde(default = "default_reconciliation_interval")]
    pub reconciliation_interval_secs: u64,

    /// Payment gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_checkout_expiry() -> i64 {
    DEFAULT_CHECKOUT_EXPIRY_MINUTES
}

fn default_reconciliation_interval() -> u64 {
    DEFAULT_RECONCILIATION_INTERVAL_SECS
}

fn default_gateway_timeout() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_gateway_retries() -> u32 {
    DEFAULT_GATEWAY_MAX_RETRIES
}

fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

impl AppConfig {
    /// Loads configuration from `config/default.toml` (optional) overlaid
    /// with `NEWSSTAND__`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("NEWSSTAND").separator("__"))
            .build()?
            .try_deserialize()?;

        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }
}

/// Initializes the tracing subscriber. Call once at startup.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_defaults_are_bounded() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.timeout_secs, 10);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.webhook_tolerance_secs, 300);
        assert!(cfg.webhook_secret.is_none());
    }
}
