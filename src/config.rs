use std::env;

use dotenv::dotenv;
use tracing::warn;

/// Runtime configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Unset selects the in-memory store.
    pub database_url: Option<String>,
    pub stripe: StripeKeys,
    pub plan_prices: PlanPrices,
    pub zapier_webhook_url: Option<String>,
    /// Base of checkout redirect URLs, subscription links and embed snippets.
    pub app_base_url: String,
    pub session_ttl_hours: i64,
    pub cookie_secure: bool,
    pub trial_days: i64,
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct StripeKeys {
    pub secret_key: String,
    pub publishable_key: String,
    pub webhook_secret: String,
}

/// Stripe price ids of the SaaS tiers.
#[derive(Debug, Clone)]
pub struct PlanPrices {
    pub starter: String,
    pub professional: String,
    pub enterprise: String,
}

impl Default for PlanPrices {
    fn default() -> Self {
        Self {
            starter: "price_starter_monthly".to_string(),
            professional: "price_professional_monthly".to_string(),
            enterprise: "price_enterprise_monthly".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let stripe = StripeKeys {
            secret_key: required("STRIPE_SECRET_KEY")?,
            publishable_key: optional("STRIPE_PUBLISHABLE_KEY").unwrap_or_default(),
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
        };

        let defaults = PlanPrices::default();
        let plan_prices = PlanPrices {
            starter: optional("STRIPE_PRICE_STARTER").unwrap_or(defaults.starter),
            professional: optional("STRIPE_PRICE_PROFESSIONAL").unwrap_or(defaults.professional),
            enterprise: optional("STRIPE_PRICE_ENTERPRISE").unwrap_or(defaults.enterprise),
        };

        let app_base_url = optional("APP_BASE_URL")
            .unwrap_or_else(|| "http://localhost:5000".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed("PORT", 5000)?,
            database_url: optional("DATABASE_URL"),
            stripe,
            plan_prices,
            zapier_webhook_url: optional("ZAPIER_WEBHOOK_URL"),
            app_base_url,
            session_ttl_hours: parsed("SESSION_TTL_HOURS", 24 * 7)?,
            cookie_secure: parsed("COOKIE_SECURE", false)?,
            trial_days: parsed("TRIAL_DAYS", 14)?,
            log_json: parsed("LOG_JSON", false)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            warn!("Invalid value for {name}: {value}");
            ConfigError::Invalid { name, value }
        }),
    }
}
