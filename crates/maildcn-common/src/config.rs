//! Configuration for MailDCN

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides, e.g. `MAILDCN__BACKEND__API_URL`
pub const ENV_PREFIX: &str = "MAILDCN";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend collaborator addresses
    #[serde(default)]
    pub backend: BackendConfig,

    /// Push channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Monitor presentation configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Durable session storage
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// REST base address
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Real-time channel address
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: default_socket_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_socket_url() -> String {
    "ws://localhost:5000".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Topic carrying protocol events
    #[serde(default = "default_event_topic")]
    pub event_topic: String,

    /// Topic asking the backend for a demonstration batch
    #[serde(default = "default_demo_topic")]
    pub demo_topic: String,

    /// Topic announcing mail server start and stop
    #[serde(default = "default_status_topic")]
    pub status_topic: String,

    /// Topic announcing newly delivered mail
    #[serde(default = "default_mail_topic")]
    pub mail_topic: String,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Reconnect attempts before giving up (0 = unlimited)
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Connection is considered dead after this long without traffic
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_topic: default_event_topic(),
            demo_topic: default_demo_topic(),
            status_topic: default_status_topic(),
            mail_topic: default_mail_topic(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_reconnect_attempts: 0,
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

fn default_event_topic() -> String {
    "dcn_process".to_string()
}

fn default_demo_topic() -> String {
    "request_dcn_demo".to_string()
}

fn default_status_topic() -> String {
    "server_status".to_string()
}

fn default_mail_topic() -> String {
    "new_email".to_string()
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_ping_timeout() -> u64 {
    45
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Base delay before an event shows up in the recent-events view
    #[serde(default = "default_recent_delay")]
    pub recent_delay_ms: u64,

    /// Initial simulation speed multiplier
    #[serde(default = "default_speed")]
    pub simulation_speed: f64,

    /// Only feed the live views while the story is playing
    #[serde(default)]
    pub follow_playback: bool,

    /// How long a notice stays visible
    #[serde(default = "default_notice_ttl")]
    pub notice_ttl_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            recent_delay_ms: default_recent_delay(),
            simulation_speed: default_speed(),
            follow_playback: false,
            notice_ttl_secs: default_notice_ttl(),
        }
    }
}

fn default_recent_delay() -> u64 {
    1000
}

fn default_speed() -> f64 {
    1.0
}

fn default_notice_ttl() -> u64 {
    5
}

/// Session storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path of the session file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations, layered with
    /// `MAILDCN__*` environment overrides. Missing files fall back to defaults.
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./maildcn.toml"),
            PathBuf::from("/etc/maildcn/config.toml"),
        ];

        let found = paths.into_iter().find(|p| p.exists());
        Self::load_from(found.as_deref())
    }

    /// Load configuration from an optional file plus environment overrides
    pub fn load_from(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate value ranges that serde cannot express
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.monitor.simulation_speed > 0.0) {
            return Err(crate::Error::Validation(format!(
                "monitor.simulation_speed must be positive, got {}",
                self.monitor.simulation_speed
            )));
        }
        if self.channel.initial_backoff_ms > self.channel.max_backoff_ms {
            return Err(crate::Error::Validation(
                "channel.initial_backoff_ms exceeds channel.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.api_url, "http://localhost:5000");
        assert_eq!(config.channel.event_topic, "dcn_process");
        assert_eq!(config.channel.demo_topic, "request_dcn_demo");
        assert_eq!(config.channel.status_topic, "server_status");
        assert_eq!(config.channel.mail_topic, "new_email");
        assert_eq!(config.monitor.recent_delay_ms, 1000);
        assert!(!config.monitor.follow_playback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[backend]
api_url = "http://mail.example.com:5000"
socket_url = "ws://mail.example.com:5000"

[monitor]
simulation_speed = 2.0
follow_playback = true

[logging]
format = "json"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.api_url, "http://mail.example.com:5000");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.monitor.simulation_speed, 2.0);
        assert!(config.monitor.follow_playback);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.channel.max_backoff_ms, 30_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[channel]\nmax_reconnect_attempts = 3").unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.channel.max_reconnect_attempts, 3);
        assert_eq!(config.channel.event_topic, "dcn_process");
    }

    #[test]
    fn test_validate_rejects_zero_speed() {
        let mut config = Config::default();
        config.monitor.simulation_speed = 0.0;
        assert!(config.validate().is_err());
    }
}
