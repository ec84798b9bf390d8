use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Mobile-money (Daraja) gateway settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct MpesaSettings {
    #[serde(default = "default_mpesa_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    /// Paybill/till number the STK push charges against.
    #[serde(default)]
    pub short_code: String,
    #[serde(default)]
    pub passkey: String,
    /// Public URL the gateway posts the stkCallback result to.
    #[serde(default)]
    pub callback_url: String,
}

impl Default for MpesaSettings {
    fn default() -> Self {
        Self {
            base_url: default_mpesa_base_url(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            short_code: String::new(),
            passkey: String::new(),
            callback_url: String::new(),
        }
    }
}

/// PayPal REST gateway settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PayPalSettings {
    #[serde(default = "default_paypal_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Webhook id registered with PayPal, required to verify signatures.
    #[serde(default)]
    pub webhook_id: String,
    /// Fixed local-currency units per USD used when creating gateway orders.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: Decimal,
}

impl Default for PayPalSettings {
    fn default() -> Self {
        Self {
            base_url: default_paypal_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            webhook_id: String::new(),
            exchange_rate: default_exchange_rate(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to verify bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,

    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,

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

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Flat shipping fee added to every order.
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: Decimal,

    /// Storefront currency code
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Stock level at or below which a size shows up in the low-stock report.
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i32,

    #[serde(default)]
    pub mpesa: MpesaSettings,

    #[serde(default)]
    pub paypal: PayPalSettings,
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
fn default_jwt_issuer() -> String {
    "storefront-auth".to_string()
}
fn default_jwt_audience() -> String {
    "storefront-api".to_string()
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
fn default_shipping_fee() -> Decimal {
    dec!(500)
}
fn default_currency() -> String {
    "KES".to_string()
}
fn default_low_stock_threshold() -> i32 {
    5
}
fn default_mpesa_base_url() -> String {
    "https://sandbox.safaricom.co.ke".to_string()
}
fn default_paypal_base_url() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}
fn default_exchange_rate() -> Decimal {
    dec!(130)
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// file, and `APP__*` environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .set_default("database_url", "postgres://localhost/storefront")?
        .set_default(
            "jwt_secret",
            "development_only_secret_change_me_in_production_environments",
        )?;

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

    info!(environment = %cfg.environment, port = cfg.port, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber. Safe to call once at startup.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
