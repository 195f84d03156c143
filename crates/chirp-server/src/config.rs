//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`PORT`, `API_CODE`, `CORS_ALLOWED_ORIGINS`, and
//!   `SECTION__KEY` for nested keys such as `HISTORY__CAPACITY`)
//! - TOML configuration file
//!
//! Environment variables override the file. `PORT` is required.

use chirp_core::{HubConfig, LivenessConfig};
use config::{Environment, File, FileFormat, FileSourceFile, Source};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Shared secret used when `API_CODE` is not set.
pub const DEFAULT_API_CODE: &str = "changeme";

/// Configuration errors. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No port was configured.
    #[error("Missing PORT")]
    MissingPort,

    /// A value is out of range or inconsistent with another.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Shared secret expected in the `Authorization` header of send requests.
    #[serde(default = "default_api_code")]
    pub api_code: String,

    /// Browser origins allowed to call the API. `*` allows any origin.
    #[serde(default, deserialize_with = "comma_separated")]
    pub cors_allowed_origins: Vec<String>,

    /// Single-origin form of `cors_allowed_origins`.
    #[serde(default, skip_serializing)]
    cors_allowed_origin: Option<String>,

    /// Message history configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Message history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of recent messages replayed to new subscribers.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    /// Avatar reference used when a sender gives none.
    #[serde(default)]
    pub default_avatar: String,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keep-alive ping interval in milliseconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,

    /// Occupancy report interval in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,

    /// Broadcast `activeClients` when subscribers come and go.
    #[serde(default = "default_true")]
    pub announce_active_clients: bool,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of simultaneous subscribers.
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    /// Maximum message text length in bytes.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Frames buffered per subscriber before it is dropped as stalled.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_code() -> String {
    DEFAULT_API_CODE.to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3001".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_history_capacity() -> usize {
    50
}

fn default_keepalive_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_report_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_max_subscribers() -> usize {
    10_000
}

fn default_max_message_len() -> usize {
    4 * 1024 // 4 KB
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_metrics_port() -> u16 {
    9090
}

/// Top-level keys read from the process environment.
const ENV_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "API_CODE",
    "CORS_ALLOWED_ORIGIN",
    "CORS_ALLOWED_ORIGINS",
];

/// Prefixes of nested keys read from the process environment.
const ENV_SECTIONS: &[&str] = &["HISTORY__", "HEARTBEAT__", "LIMITS__", "METRICS__"];

/// The subset of the process environment that belongs to this server.
fn process_env() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| {
            ENV_KEYS.contains(&key.as_str())
                || ENV_SECTIONS.iter().any(|prefix| key.starts_with(prefix))
        })
        .collect()
}

/// Accept either a list or a comma separated string.
fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let items = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(joined) => joined.split(',').map(str::to_string).collect(),
        OneOrMany::Many(items) => items,
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            default_avatar: String::new(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: default_keepalive_interval(),
            report_interval_ms: default_report_interval(),
            announce_active_clients: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_subscribers: default_max_subscribers(),
            max_message_len: default_max_message_len(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overridden by
    /// the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is missing, a source cannot be parsed, or
    /// a value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = [
            "chirp.toml",
            "/etc/chirp/chirp.toml",
            "~/.config/chirp/chirp.toml",
        ];

        let file = config_paths.iter().find_map(|path| {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            path.exists()
                .then(|| File::<FileSourceFile, FileFormat>::from(path).format(FileFormat::Toml))
        });

        Self::from_sources(file, Some(process_env()))
    }

    /// Load configuration from environment variables only.
    ///
    /// `env` replaces the process environment when given. Without it every
    /// process variable is visible to the loader.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_env(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Self::from_sources(None::<File<FileSourceFile, FileFormat>>, env)
    }

    /// Layer `env` (or the process environment) over an optional file source.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_sources<S>(
        file: Option<S>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let settings = builder
            .add_source(Environment::default().separator("__").source(env))
            .build()?;

        if let Err(config::ConfigError::NotFound(_)) = settings.get::<u16>("port") {
            return Err(ConfigError::MissingPort);
        }

        let config: Config = settings.try_deserialize()?;
        config.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.cors_allowed_origins.is_empty() {
            self.cors_allowed_origins = match self.cors_allowed_origin.take() {
                Some(origin) if !origin.trim().is_empty() => vec![origin.trim().to_string()],
                _ => default_cors_origins(),
            };
        }

        if self.api_code.is_empty() {
            return Err(ConfigError::Invalid("api_code must not be empty".into()));
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::Invalid("history.capacity must be at least 1".into()));
        }
        if self.limits.subscriber_buffer <= self.history.capacity {
            return Err(ConfigError::Invalid(format!(
                "limits.subscriber_buffer ({}) must exceed history.capacity ({})",
                self.limits.subscriber_buffer, self.history.capacity
            )));
        }
        if self.limits.max_subscribers == 0 || self.limits.max_message_len == 0 {
            return Err(ConfigError::Invalid("limits must be positive".into()));
        }
        if self.heartbeat.keepalive_interval_ms == 0 || self.heartbeat.report_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat intervals must be positive".into()));
        }

        Ok(self)
    }

    /// Check if the shared secret was left at its default.
    #[must_use]
    pub fn uses_default_api_code(&self) -> bool {
        self.api_code == DEFAULT_API_CODE
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("host {:?}: {}", self.host, e)))
    }

    /// Broadcast engine settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            history_capacity: self.history.capacity,
            max_subscribers: self.limits.max_subscribers,
            subscriber_buffer: self.limits.subscriber_buffer,
            announce_active_clients: self.heartbeat.announce_active_clients,
            default_avatar: self.history.default_avatar.clone(),
        }
    }

    /// Keep-alive and occupancy report timing.
    #[must_use]
    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            keepalive_interval: Duration::from_millis(self.heartbeat.keepalive_interval_ms),
            report_interval: Duration::from_millis(self.heartbeat.report_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_port_is_required() {
        assert!(matches!(
            Config::from_env(env(&[("API_CODE", "secret")])),
            Err(ConfigError::MissingPort)
        ));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env(env(&[("PORT", "8080")])).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.uses_default_api_code());
        assert_eq!(config.cors_allowed_origins, ["http://localhost:3001"]);
        assert_eq!(config.history.capacity, 50);
        assert_eq!(config.heartbeat.keepalive_interval_ms, 30_000);
        assert_eq!(config.heartbeat.report_interval_ms, 5_000);
        assert!(config.heartbeat.announce_active_clients);
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_env(env(&[
            ("PORT", "3000"),
            ("API_CODE", "00123"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ("HISTORY__CAPACITY", "10"),
            ("HEARTBEAT__ANNOUNCE_ACTIVE_CLIENTS", "false"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.api_code, "00123");
        assert_eq!(
            config.cors_allowed_origins,
            ["https://a.example", "https://b.example"]
        );
        assert_eq!(config.hub_config().history_capacity, 10);
        assert!(!config.hub_config().announce_active_clients);
    }

    #[test]
    fn test_single_origin_variable() {
        let config = Config::from_env(env(&[
            ("PORT", "3000"),
            ("CORS_ALLOWED_ORIGIN", "https://chat.example"),
        ]))
        .unwrap();

        assert_eq!(config.cors_allowed_origins, ["https://chat.example"]);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            port = 9000
            api_code = "from-file"
            cors_allowed_origins = ["https://chat.example"]

            [history]
            capacity = 20

            [limits]
            max_subscribers = 500
        "#;

        let config = Config::from_sources(
            Some(File::from_str(toml_str, FileFormat::Toml)),
            env(&[("API_CODE", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.api_code, "from-env");
        assert_eq!(config.cors_allowed_origins, ["https://chat.example"]);
        assert_eq!(config.history.capacity, 20);
        assert_eq!(config.limits.max_subscribers, 500);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_env(env(&[("PORT", "8080"), ("HISTORY__CAPACITY", "0")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_env(env(&[
                ("PORT", "8080"),
                ("HISTORY__CAPACITY", "300"),
                ("LIMITS__SUBSCRIBER_BUFFER", "300"),
            ])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(Config::from_env(env(&[("PORT", "not-a-port")])).is_err());
    }

    #[test]
    fn test_liveness_config() {
        let config = Config::from_env(env(&[
            ("PORT", "8080"),
            ("HEARTBEAT__KEEPALIVE_INTERVAL_MS", "1000"),
        ]))
        .unwrap();

        let liveness = config.liveness_config();
        assert_eq!(liveness.keepalive_interval, Duration::from_secs(1));
        assert_eq!(liveness.report_interval, Duration::from_secs(5));
    }
}
