use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
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

/// Stripe credentials
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// Accepted clock skew for webhook signatures
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
}

/// PayPal REST credentials
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayPalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_paypal_api_base")]
    pub api_base: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret_key: None,
            webhook_secret: None,
            api_base: default_stripe_api_base(),
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
        }
    }
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: None,
            client_secret: None,
            api_base: default_paypal_api_base(),
        }
    }
}

/// Outgoing mail settings. When `smtp_host` is unset mail is only logged.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: default_from_address(),
            from_name: default_from_name(),
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

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

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

    /// Request timeout applied by the HTTP stack (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Default tax rate (as decimal, e.g., 0.08 for 8%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub default_tax_rate: f64,

    /// Default currency code for carts and orders
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_positive_usize")]
    pub event_channel_capacity: usize,

    /// Lifetime of a stock reservation, refreshed on each cart touch
    #[serde(default = "default_reservation_ttl_mins")]
    #[validate(custom = "validate_positive_i64")]
    pub reservation_ttl_mins: i64,

    /// Interval between maintenance passes
    #[serde(default = "default_reservation_cleanup_interval_secs")]
    #[validate(custom = "validate_positive_u64")]
    pub reservation_cleanup_interval_secs: u64,

    /// Unpaid online orders older than this are cancelled by maintenance
    #[serde(default = "default_pending_order_ttl_mins")]
    #[validate(custom = "validate_positive_i64")]
    pub pending_order_ttl_mins: i64,

    /// Lifetime of a checkout session
    #[serde(default = "default_checkout_session_ttl_mins")]
    #[validate(custom = "validate_positive_i64")]
    pub checkout_session_ttl_mins: i64,

    /// Largest order total accepted for cash on delivery
    #[serde(default = "default_cod_max_order_amount")]
    pub cod_max_order_amount: Decimal,

    /// Days after delivery during which a return may be requested
    #[serde(default = "default_return_window_days")]
    #[validate(custom = "validate_positive_i64")]
    pub return_window_days: i64,

    /// Default page size for paginated API responses
    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    /// Maximum page size allowed for paginated API responses
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub paypal: PayPalConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

impl AppConfig {
    /// Creates a configuration populated with defaults
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            default_tax_rate: default_tax_rate(),
            default_currency: default_currency(),
            event_channel_capacity: default_event_channel_capacity(),
            reservation_ttl_mins: default_reservation_ttl_mins(),
            reservation_cleanup_interval_secs: default_reservation_cleanup_interval_secs(),
            pending_order_ttl_mins: default_pending_order_ttl_mins(),
            checkout_session_ttl_mins: default_checkout_session_ttl_mins(),
            cod_max_order_amount: default_cod_max_order_amount(),
            return_window_days: default_return_window_days(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            stripe: StripeConfig::default(),
            paypal: PayPalConfig::default(),
            email: EmailConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Tax rate as a decimal for money arithmetic
    pub fn tax_rate(&self) -> Decimal {
        Decimal::try_from(self.default_tax_rate)
            .unwrap_or(Decimal::ZERO)
            .round_dp(6)
    }

    /// Clamps a requested page size into the configured bounds
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.api_default_page_size)
            .clamp(1, self.api_max_page_size)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.stripe.enabled && self.stripe.secret_key.as_deref().unwrap_or("").is_empty() {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message = Some("Set APP__STRIPE__SECRET_KEY when Stripe is enabled".into());
            errors.add("stripe", err);
        }

        if self.paypal.enabled
            && (self.paypal.client_id.as_deref().unwrap_or("").is_empty()
                || self.paypal.client_secret.as_deref().unwrap_or("").is_empty())
        {
            let mut err = ValidationError::new("paypal_credentials_required");
            err.message = Some(
                "Set APP__PAYPAL__CLIENT_ID and APP__PAYPAL__CLIENT_SECRET when PayPal is enabled"
                    .into(),
            );
            errors.add("paypal", err);
        }

        if self.cod_max_order_amount < Decimal::ZERO {
            let mut err = ValidationError::new("cod_max_order_amount");
            err.message = Some("cod_max_order_amount must not be negative".into());
            errors.add("cod_max_order_amount", err);
        }

        if self.api_default_page_size == 0 || self.api_default_page_size > self.api_max_page_size
        {
            let mut err = ValidationError::new("api_default_page_size");
            err.message = Some("api_default_page_size must be between 1 and api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Runs derive and cross-field validation together
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.validate_additional_constraints()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
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
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_tax_rate() -> f64 {
    0.0
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_reservation_ttl_mins() -> i64 {
    15
}

fn default_reservation_cleanup_interval_secs() -> u64 {
    300
}

fn default_pending_order_ttl_mins() -> i64 {
    60
}

fn default_checkout_session_ttl_mins() -> i64 {
    30
}

fn default_cod_max_order_amount() -> Decimal {
    Decimal::new(500, 0)
}

fn default_return_window_days() -> i64 {
    30
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_paypal_api_base() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "orders@localhost".to_string()
}

fn default_from_name() -> String {
    "Storefront".to_string()
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("log_level");
            err.message = Some("log_level must be one of trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate < 0.0 || rate > 1.0 {
        let mut err = ValidationError::new("default_tax_rate");
        err.message = Some("default_tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_positive_usize(value: usize) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

fn validate_positive_u64(value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

fn validate_positive_i64(value: i64) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
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
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate_all().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
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
            "development".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate_all().is_ok());
        assert_eq!(cfg.reservation_ttl_mins, 15);
        assert_eq!(cfg.reservation_cleanup_interval_secs, 300);
        assert_eq!(cfg.checkout_session_ttl_mins, 30);
        assert_eq!(cfg.pending_order_ttl_mins, 60);
    }

    #[test]
    fn tax_rate_out_of_range_is_rejected() {
        let mut cfg = base_config();
        cfg.default_tax_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut cfg = base_config();
        cfg.reservation_ttl_mins = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_intervals_and_capacities_are_rejected() {
        let mut cfg = base_config();
        cfg.reservation_cleanup_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.event_channel_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.default_tax_rate = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn enabled_stripe_requires_secret_key() {
        let mut cfg = base_config();
        cfg.stripe.enabled = true;
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.stripe.secret_key = Some("sk_test_123".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn enabled_paypal_requires_both_credentials() {
        let mut cfg = base_config();
        cfg.paypal.enabled = true;
        cfg.paypal.client_id = Some("client".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.paypal.client_secret = Some("secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn page_size_is_clamped() {
        let cfg = base_config();
        assert_eq!(cfg.page_size(None), 20);
        assert_eq!(cfg.page_size(Some(0)), 1);
        assert_eq!(cfg.page_size(Some(5000)), 100);
    }

    #[test]
    fn tax_rate_converts_to_decimal() {
        let mut cfg = base_config();
        cfg.default_tax_rate = 0.08;
        assert_eq!(cfg.tax_rate(), Decimal::new(8, 2));
    }
}
