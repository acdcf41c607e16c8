use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "USD";
/// VAT rate embedded in gross prices (receipt extraction, not an add-on).
const DEFAULT_TAX_RATE: f64 = 0.20;
const DEFAULT_PENDING_ORDER_TTL_HOURS: i64 = 48;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Hosted payment gateway configuration. The live gateway is considered
/// configured only when base URL, API key and webhook secret are all present;
/// otherwise the demo completion path is available instead.
#[derive(Clone, Debug, Deserialize, Validate, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Shared secret for callback HMAC verification.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Expected literal value of the caller-identity header (coarse filter
    /// only; the HMAC check is the trust boundary).
    #[serde(default = "default_gateway_caller")]
    pub expected_caller: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn is_live(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some() && self.webhook_secret.is_some()
    }
}

/// Routing collaborator used to resolve delivery distances.
#[derive(Clone, Debug, Deserialize, Validate, Default)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    /// Street address the delivery distance is measured from.
    #[serde(default = "default_origin_address")]
    pub origin_address: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

/// Transactional email collaborator (fire-and-forget).
#[derive(Clone, Debug, Deserialize, Validate, Default)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_email_from")]
    pub from_address: String,

    /// Internal address that receives the staff copy of each confirmation.
    #[serde(default = "default_email_staff")]
    pub staff_address: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Public base URL used to build gateway redirect/callback URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// ISO currency code used for all orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// VAT rate embedded in gross totals (e.g. 0.20 for 20%)
    #[serde(default = "default_tax_rate")]
    pub tax_rate: f64,

    /// Hours an order may stay (pending, pending) before the sweeper
    /// marks it expired
    #[serde(default = "default_pending_order_ttl_hours")]
    pub pending_order_ttl_hours: i64,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub routing: RoutingConfig,

    #[serde(default)]
    #[validate]
    pub email: EmailConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}
fn default_pending_order_ttl_hours() -> i64 {
    DEFAULT_PENDING_ORDER_TTL_HOURS
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_gateway_caller() -> String {
    "hosted-checkout".to_string()
}
fn default_origin_address() -> String {
    "12 Weavers Lane, Portland, OR".to_string()
}
fn default_email_from() -> String {
    "orders@kilimandsons.example".to_string()
}
fn default_email_staff() -> String {
    "fulfillment@kilimandsons.example".to_string()
}
fn default_upstream_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_SECS
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development") || self.environment == "dev"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an optional
/// environment-specific file, and `APP__`-prefixed environment variables
/// (later sources override earlier ones).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{run_env}.toml"));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let cfg: AppConfig = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(
        environment = %cfg.environment,
        gateway_live = cfg.gateway.is_live(),
        "Configuration loaded"
    );

    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kilim_api={log_level},tower_http=info")));

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

    fn minimal() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            public_base_url: default_public_base_url(),
            currency: default_currency(),
            tax_rate: default_tax_rate(),
            pending_order_ttl_hours: default_pending_order_ttl_hours(),
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            db_acquire_timeout_secs: 5,
            gateway: GatewayConfig::default(),
            routing: RoutingConfig::default(),
            email: EmailConfig::default(),
        }
    }

    #[test]
    fn gateway_is_live_only_with_all_credentials() {
        let mut cfg = minimal();
        assert!(!cfg.gateway.is_live());

        cfg.gateway.base_url = Some("https://gateway.example".into());
        cfg.gateway.api_key = Some("key".into());
        assert!(!cfg.gateway.is_live());

        cfg.gateway.webhook_secret = Some("secret".into());
        assert!(cfg.gateway.is_live());
    }

    #[test]
    fn development_detection() {
        let cfg = minimal();
        assert!(cfg.is_development());
    }
}
