//! Configuration management for beacond
//!
//! Provides a TOML-backed configuration with:
//! - Human-readable durations (`ttl = "30s"`)
//! - Environment variable overrides (`BEACOND_*`)
//! - Runtime validation

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub tracking: TrackingConfig,
    pub sender: SenderConfig,
    pub transport: TransportConfig,
    pub http: HttpConfig,
    pub database: DatabaseConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
}

/// Presence tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Inactivity tolerance before a track is considered lost
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Interval between TTL scans of the track map
    #[serde(with = "humantime_serde")]
    pub heartbeat: Duration,
}

/// Notification sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Capacity of the found/lost track streams
    pub channel_buffer: usize,
}

/// Outbound HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    pub max_concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Admin HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_address: SocketAddr,
}

/// Registration store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "beacond".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            heartbeat: Duration::from_secs(30),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self { channel_buffer: 500 }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
            max_concurrency: 250,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_address: ([127, 0, 0, 1], 8080).into(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("beacond.db"),
        }
    }
}

impl Config {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Config::default(),
        };

        config.override_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Override configuration with environment variables
    fn override_from_env(&mut self) -> Result<()> {
        if let Ok(val) = env::var("BEACOND_LOG_LEVEL") {
            self.app.log_level = val;
        }

        if let Ok(val) = env::var("BEACOND_TRACKING_TTL") {
            self.tracking.ttl = parse_duration("BEACOND_TRACKING_TTL", &val)?;
        }

        if let Ok(val) = env::var("BEACOND_TRACKING_HEARTBEAT") {
            self.tracking.heartbeat = parse_duration("BEACOND_TRACKING_HEARTBEAT", &val)?;
        }

        if let Ok(val) = env::var("BEACOND_CHANNEL_BUFFER") {
            self.sender.channel_buffer = val
                .parse()
                .map_err(|_| Error::Config("Invalid channel buffer".to_string()))?;
        }

        if let Ok(val) = env::var("BEACOND_LISTEN_ADDRESS") {
            self.http.listen_address = val
                .parse()
                .map_err(|_| Error::Config("Invalid listen address".to_string()))?;
        }

        if let Ok(val) = env::var("BEACOND_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.tracking.ttl.is_zero() {
            return Err(Error::Config("tracking.ttl must be positive".to_string()));
        }

        if self.tracking.heartbeat.is_zero() {
            return Err(Error::Config(
                "tracking.heartbeat must be positive".to_string(),
            ));
        }

        if self.sender.channel_buffer == 0 {
            return Err(Error::Config(
                "sender.channel_buffer must be positive".to_string(),
            ));
        }

        if self.transport.max_concurrency == 0 {
            return Err(Error::Config(
                "transport.max_concurrency must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_duration(name: &str, val: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(val)
        .map_err(|_| Error::Config(format!("Invalid duration in {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracking.ttl, Duration::from_secs(30));
        assert_eq!(config.tracking.heartbeat, Duration::from_secs(30));
        assert_eq!(config.sender.channel_buffer, 500);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [tracking]
            ttl = "45s"
            heartbeat = "10s"

            [sender]
            channel_buffer = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.tracking.ttl, Duration::from_secs(45));
        assert_eq!(config.tracking.heartbeat, Duration::from_secs(10));
        assert_eq!(config.sender.channel_buffer, 64);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = Config::default();
        config.tracking.ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
