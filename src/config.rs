// src/config.rs

use crate::types::{normalize_code, Balances};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PairConfig {
    /// Spent by Buy, received by Sell.
    pub funding: String,
    /// Received by Buy, spent by Sell.
    pub receiving: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub reference_currency: String,
    pub rates_url: String,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub state_file: String,
    pub trend_file: String,
    pub history_limit: usize,
    pub trend_points: usize,
    pub pair: PairConfig,
    pub initial_balance: Balances,
    pub log_dir: String,
    pub persist_retries: u32,
    pub persist_retry_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reference_currency: "USD".to_string(),
            rates_url: "https://open.er-api.com/v6/latest/USD".to_string(),
            refresh_interval_secs: 15,
            request_timeout_secs: 10,
            state_file: "fiskey_state.json".to_string(),
            trend_file: "fiskey_trend.json".to_string(),
            history_limit: 200,
            trend_points: 100,
            pair: PairConfig {
                funding: "USD".to_string(),
                receiving: "KES".to_string(),
            },
            initial_balance: [
                ("USD".to_string(), Decimal::new(1000, 0)),
                ("KES".to_string(), Decimal::new(156500, 0)),
            ]
            .into_iter()
            .collect(),
            log_dir: "logs".to_string(),
            persist_retries: 3,
            persist_retry_delay_ms: 500,
        }
    }
}

impl AppConfig {
    /// Defaults, then `Settings.*` if present, then `APP_*` environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(
            Config::builder().add_source(File::with_name("Settings").required(false)),
            environment(),
        )
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(
            Config::builder().add_source(File::with_name(path)),
            environment(),
        )
    }

    fn load(
        overrides: config::builder::ConfigBuilder<config::builder::DefaultState>,
        env: Environment,
    ) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(overrides.build()?)
            .add_source(env)
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;
        app.normalize();
        app.validate()?;
        Ok(app)
    }

    fn normalize(&mut self) {
        self.reference_currency = normalize_code(&self.reference_currency);
        self.pair.funding = normalize_code(&self.pair.funding);
        self.pair.receiving = normalize_code(&self.pair.receiving);
        self.initial_balance = std::mem::take(&mut self.initial_balance)
            .into_iter()
            .map(|(code, amount)| (normalize_code(&code), amount))
            .collect();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Message(msg)) };

        if self.reference_currency.is_empty()
            || self.pair.funding.is_empty()
            || self.pair.receiving.is_empty()
        {
            return invalid("currency codes must not be empty".to_string());
        }
        if self.pair.funding == self.pair.receiving {
            return invalid(format!(
                "pair needs two different currencies, got {}/{}",
                self.pair.funding, self.pair.receiving
            ));
        }
        if self.refresh_interval_secs == 0 || self.request_timeout_secs == 0 {
            return invalid("refresh interval and request timeout must be positive".to_string());
        }
        if self.history_limit == 0 || self.trend_points == 0 {
            return invalid("history_limit and trend_points must be positive".to_string());
        }
        if let Some((code, amount)) = self
            .initial_balance
            .iter()
            .find(|(_, amount)| **amount < Decimal::ZERO)
        {
            return invalid(format!("initial {} balance {} is negative", code, amount));
        }
        if self.state_file == self.trend_file {
            return invalid(format!("state_file and trend_file both point at {}", self.state_file));
        }
        if let Err(e) = Url::parse(&self.rates_url) {
            return invalid(format!("rates_url {:?}: {}", self.rates_url, e));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn persist_retry_delay(&self) -> Duration {
        Duration::from_millis(self.persist_retry_delay_ms)
    }
}

/// `APP_HISTORY_LIMIT` sets a top-level key, `APP_PAIR__RECEIVING` a nested one.
fn environment() -> Environment {
    Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
}
