//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file. Credentials (the Telegram bot
//! token and chat id) come only from the environment, never from the file.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::Symbol;
use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub reconnection: ReconnectionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Market data feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Symbols to monitor, e.g. `["BTCUSDT", "SOLUSDT"]`.
    pub symbols: Vec<Symbol>,
    /// Base WebSocket endpoint for depth streams.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// REST endpoint for the initial depth snapshot.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Number of best levels per side summed into the imbalance ratio.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Level count requested from the snapshot endpoint.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: u32,
}

/// Alert threshold and rate limiting.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Alert fires when `|ratio|` exceeds this value. Must be in `(0, 1]`.
    #[serde(default = "default_threshold")]
    pub threshold: Decimal,
    /// Minimum seconds between two alerts for the same symbol.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl AlertConfig {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Feed reconnection and pipeline restart tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionConfig {
    /// Base backoff delay for connection attempts.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff delay ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Consecutive connection failures before the feed is declared fatal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause before the supervisor restarts a fatally failed pipeline.
    #[serde(default = "default_restart_cooldown_ms")]
    pub restart_cooldown_ms: u64,
    /// Fatal failures tolerated per symbol before it is abandoned.
    #[serde(default = "default_max_pipeline_restarts")]
    pub max_pipeline_restarts: u32,
}

impl ReconnectionConfig {
    #[must_use]
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: default_max_retries(),
            restart_cooldown_ms: default_restart_cooldown_ms(),
            max_pipeline_restarts: default_max_pipeline_restarts(),
        }
    }
}

/// Outbound alert delivery tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Send attempts per alert, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay after a transient send failure.
    #[serde(default = "default_dispatch_delay_ms")]
    pub initial_delay_ms: u64,
    /// Retry delay ceiling.
    #[serde(default = "default_dispatch_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Grace period for in-flight sends during shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl DispatchConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_dispatch_delay_ms(),
            max_delay_ms: default_dispatch_max_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.feed.symbols.is_empty() {
            return Err(ConfigError::MissingField {
                field: "feed.symbols",
            });
        }
        if self.feed.depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feed.depth",
                reason: "must be at least 1".into(),
            });
        }
        if self.alerts.threshold <= Decimal::ZERO || self.alerts.threshold > Decimal::ONE {
            return Err(ConfigError::InvalidValue {
                field: "alerts.threshold",
                reason: format!("{} is outside (0, 1]", self.alerts.threshold),
            });
        }
        if self.reconnection.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnection.backoff_multiplier",
                reason: "must not shrink the delay".into(),
            });
        }
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatch.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".into()
}

fn default_api_url() -> String {
    "https://api.binance.com/api/v3/depth".into()
}

fn default_depth() -> usize {
    10
}

fn default_snapshot_limit() -> u32 {
    1000
}

fn default_threshold() -> Decimal {
    dec!(0.5)
}

fn default_cooldown_secs() -> u64 {
    10
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    5
}

fn default_restart_cooldown_ms() -> u64 {
    5_000
}

fn default_max_pipeline_restarts() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_dispatch_delay_ms() -> u64 {
    250
}

fn default_dispatch_max_delay_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_minimal_config_uses_defaults() {
        let file = write_config(
            r#"
            [feed]
            symbols = ["BTCUSDT", "SOLUSDT"]
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.feed.symbols.len(), 2);
        assert_eq!(config.feed.depth, 10);
        assert_eq!(config.alerts.threshold, dec!(0.5));
        assert_eq!(config.alerts.cooldown(), Duration::from_secs(10));
        assert_eq!(config.reconnection.max_retries, 5);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_rejects_empty_symbol_list() {
        let file = write_config(
            r#"
            [feed]
            symbols = []
            "#,
        );

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("feed.symbols"));
    }

    #[test]
    fn load_rejects_threshold_above_one() {
        let file = write_config(
            r#"
            [feed]
            symbols = ["BTCUSDT"]

            [alerts]
            threshold = 1.5
            "#,
        );

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("alerts.threshold"));
    }

    #[test]
    fn load_rejects_zero_threshold() {
        let file = write_config(
            r#"
            [feed]
            symbols = ["BTCUSDT"]

            [alerts]
            threshold = 0.0
            "#,
        );

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn load_accepts_full_overrides() {
        let file = write_config(
            r#"
            [feed]
            symbols = ["DOTUSDT"]
            depth = 5
            snapshot_limit = 100

            [alerts]
            threshold = 0.7
            cooldown_secs = 30

            [reconnection]
            max_retries = 3
            restart_cooldown_ms = 1000

            [dispatch]
            max_attempts = 5

            [logging]
            level = "debug"
            format = "json"
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.feed.depth, 5);
        assert_eq!(config.alerts.threshold, dec!(0.7));
        assert_eq!(config.reconnection.max_retries, 3);
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/nonexistent/config.toml").unwrap_err();
        assert!(err.to_string().contains("read config file"));
    }
}
