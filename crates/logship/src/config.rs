// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Values come from [`Config::default`], from a host-provided serde source, or
//! from `LOGSHIP_*` environment variables via [`Config::from_env`]. Unparseable
//! numbers and booleans fall back to their defaults; unknown enum values are
//! rejected.
//!
//! Numeric notes:
//! - `log_tick_rate <= 0` disables the periodic flush loop; positive rates are
//!   clamped to between 1 ms and one day
//! - `max_time_between_flushes` too large for a [`Duration`] means "never"
//! - `flush_timeout = 0` falls back to the 5 second default

use crate::error::{Error, Result};
use crate::formatter::Codec;
use crate::host::HostType;
use crate::log_line::Severity;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FLUSH_TIMEOUT: u64 = 5;
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);
const MAX_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Collector base URL, endpoint suffixes are appended to it.
    pub base_url: String,
    /// Environment key sent in the auth handshake.
    pub auth_key: String,
    pub auth_suffix: String,
    pub log_chunk_suffix: String,
    pub log_metadata_suffix: String,
    /// Seconds between flush checks.
    pub log_tick_rate: f64,
    /// Seconds after which a non-empty buffer is flushed.
    pub max_time_between_flushes: f64,
    /// Buffered line count that forces a flush.
    pub max_lines_between_flushes: usize,
    pub use_compression: bool,
    pub compression_codec: Codec,
    pub compression_level: i32,
    /// Keep a local copy of every batch under `log_dir`.
    pub write_to_disk: bool,
    pub log_dir: PathBuf,
    /// Least severe level that gets captured.
    pub severity_filter: Severity,
    pub host_type: HostType,
    /// HTTP request timeout in seconds.
    pub flush_timeout: u64,
    /// Grace period in seconds for the final flush on shutdown.
    pub shutdown_timeout: u64,
    pub proxy_https: Option<String>,
    /// Send an empty link document when the last linked session is removed.
    pub sync_empty_links: bool,
    /// Serialize deliveries so chunks reach the collector in flush order.
    pub ordered_delivery: bool,
    /// Level filter for the agent's own diagnostics.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_key: String::new(),
            auth_suffix: "/v1/auth/client".to_string(),
            log_chunk_suffix: "/v1/log/chunk".to_string(),
            log_metadata_suffix: "/v1/log/metadata".to_string(),
            log_tick_rate: 1.0,
            max_time_between_flushes: 10.0,
            max_lines_between_flushes: 100,
            use_compression: true,
            compression_codec: Codec::Zlib,
            compression_level: 6,
            write_to_disk: false,
            log_dir: PathBuf::from("logs"),
            severity_filter: Severity::VeryVerbose,
            host_type: HostType::Client,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            shutdown_timeout: 5,
            proxy_https: None,
            sync_empty_links: true,
            ordered_delivery: false,
            log_level: "info".to_string(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key).map_or(default, |val| {
        matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes")
    })
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_enum<T: std::str::FromStr<Err = String>>(key: &str, default: T) -> Result<T> {
    match env_string(key) {
        Some(val) => val
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');

    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

impl Config {
    /// Builds a configuration from `LOGSHIP_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            base_url: normalize_url(&env_string("LOGSHIP_BASE_URL").unwrap_or_default()),
            auth_key: env_string("LOGSHIP_AUTH_KEY").unwrap_or_default(),
            auth_suffix: env_string("LOGSHIP_URL_AUTH_SUFFIX").unwrap_or(defaults.auth_suffix),
            log_chunk_suffix: env_string("LOGSHIP_URL_LOG_CHUNK_SUFFIX")
                .unwrap_or(defaults.log_chunk_suffix),
            log_metadata_suffix: env_string("LOGSHIP_URL_LOG_METADATA_SUFFIX")
                .unwrap_or(defaults.log_metadata_suffix),
            log_tick_rate: env_parse("LOGSHIP_LOG_TICK_RATE", defaults.log_tick_rate),
            max_time_between_flushes: env_parse(
                "LOGSHIP_MAX_TIME_BETWEEN_LOG_FLUSHES",
                defaults.max_time_between_flushes,
            ),
            max_lines_between_flushes: env_parse(
                "LOGSHIP_MAX_LOG_LINES_BETWEEN_LOG_FLUSHES",
                defaults.max_lines_between_flushes,
            ),
            use_compression: env_bool("LOGSHIP_USE_COMPRESSION", defaults.use_compression),
            compression_codec: env_enum("LOGSHIP_COMPRESSION_CODEC", defaults.compression_codec)?,
            compression_level: env_parse("LOGSHIP_COMPRESSION_LEVEL", defaults.compression_level),
            write_to_disk: env_bool("LOGSHIP_WRITE_TO_DISK", defaults.write_to_disk),
            log_dir: env_string("LOGSHIP_LOG_DIR").map_or(defaults.log_dir, PathBuf::from),
            severity_filter: env_enum("LOGSHIP_SEVERITY_FILTER", defaults.severity_filter)?,
            host_type: env_enum("LOGSHIP_HOST_TYPE", defaults.host_type)?,
            flush_timeout: match env_parse("LOGSHIP_FLUSH_TIMEOUT", defaults.flush_timeout) {
                0 => DEFAULT_FLUSH_TIMEOUT,
                secs => secs,
            },
            shutdown_timeout: env_parse("LOGSHIP_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            proxy_https: env_string("LOGSHIP_PROXY_HTTPS").or_else(|| env_string("HTTPS_PROXY")),
            sync_empty_links: env_bool("LOGSHIP_SYNC_EMPTY_LINKS", defaults.sync_empty_links),
            ordered_delivery: env_bool("LOGSHIP_ORDERED_DELIVERY", defaults.ordered_delivery),
            log_level: env_string("LOGSHIP_LOG_LEVEL")
                .map_or(defaults.log_level, |val| val.to_lowercase()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings every operation depends on.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("base URL cannot be empty".to_string()));
        }

        if self.auth_key.trim().is_empty() {
            return Err(Error::Config("auth key cannot be empty".to_string()));
        }

        if !self.log_tick_rate.is_finite() {
            return Err(Error::Config(format!(
                "log tick rate must be a finite number of seconds, got {}",
                self.log_tick_rate
            )));
        }

        if !self.max_time_between_flushes.is_finite() || self.max_time_between_flushes < 0.0 {
            return Err(Error::Config(format!(
                "max time between flushes must be a non-negative number of seconds, got {}",
                self.max_time_between_flushes
            )));
        }

        if self.max_lines_between_flushes == 0 {
            return Err(Error::Config(
                "max lines between flushes must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error, off",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Period of the flush check loop, `None` when the loop is disabled.
    #[must_use]
    pub fn tick_interval(&self) -> Option<Duration> {
        if !(self.log_tick_rate.is_finite() && self.log_tick_rate > 0.0) {
            return None;
        }
        let period = Duration::try_from_secs_f64(self.log_tick_rate).unwrap_or(MAX_TICK_INTERVAL);
        Some(period.clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL))
    }

    /// Saturates at [`Duration::MAX`] instead of wrapping to zero.
    #[must_use]
    pub fn max_flush_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_time_between_flushes.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        match self.flush_timeout {
            0 => Duration::from_secs(DEFAULT_FLUSH_TIMEOUT),
            secs => Duration::from_secs(secs),
        }
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn auth_url(&self) -> Result<String> {
        self.endpoint(&self.auth_suffix)
    }

    pub fn log_chunk_url(&self) -> Result<String> {
        self.endpoint(&self.log_chunk_suffix)
    }

    pub fn log_metadata_url(&self) -> Result<String> {
        self.endpoint(&self.log_metadata_suffix)
    }

    fn endpoint(&self, suffix: &str) -> Result<String> {
        let base = normalize_url(&self.base_url);
        if base.is_empty() {
            return Err(Error::Config("base URL cannot be empty".to_string()));
        }
        Ok(format!("{base}{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: [&str; 22] = [
        "LOGSHIP_BASE_URL",
        "LOGSHIP_AUTH_KEY",
        "LOGSHIP_URL_AUTH_SUFFIX",
        "LOGSHIP_URL_LOG_CHUNK_SUFFIX",
        "LOGSHIP_URL_LOG_METADATA_SUFFIX",
        "LOGSHIP_LOG_TICK_RATE",
        "LOGSHIP_MAX_TIME_BETWEEN_LOG_FLUSHES",
        "LOGSHIP_MAX_LOG_LINES_BETWEEN_LOG_FLUSHES",
        "LOGSHIP_USE_COMPRESSION",
        "LOGSHIP_COMPRESSION_CODEC",
        "LOGSHIP_COMPRESSION_LEVEL",
        "LOGSHIP_WRITE_TO_DISK",
        "LOGSHIP_LOG_DIR",
        "LOGSHIP_SEVERITY_FILTER",
        "LOGSHIP_HOST_TYPE",
        "LOGSHIP_FLUSH_TIMEOUT",
        "LOGSHIP_SHUTDOWN_TIMEOUT",
        "LOGSHIP_PROXY_HTTPS",
        "HTTPS_PROXY",
        "LOGSHIP_SYNC_EMPTY_LINKS",
        "LOGSHIP_ORDERED_DELIVERY",
        "LOGSHIP_LOG_LEVEL",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    fn valid_config() -> Config {
        Config {
            base_url: "https://collector.example.com".to_string(),
            auth_key: "env-key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_needs_url_and_key() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_auth_key() {
        let config = Config {
            auth_key: "  ".to_string(),
            ..valid_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auth key"));
    }

    #[test]
    fn test_validate_zero_max_lines() {
        let config = Config {
            max_lines_between_flushes: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let config = Config {
            log_level: "loud".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let config = Config {
            base_url: "collector.example.com/".to_string(),
            ..valid_config()
        };
        assert_eq!(
            config.auth_url().unwrap(),
            "https://collector.example.com/v1/auth/client"
        );
        assert_eq!(
            config.log_chunk_url().unwrap(),
            "https://collector.example.com/v1/log/chunk"
        );
        assert_eq!(
            config.log_metadata_url().unwrap(),
            "https://collector.example.com/v1/log/metadata"
        );
    }

    #[test]
    fn test_endpoint_without_base_url() {
        let config = Config::default();
        assert!(matches!(config.auth_url(), Err(Error::Config(_))));
    }

    #[test]
    fn test_tick_interval_disabled() {
        let config = Config {
            log_tick_rate: 0.0,
            ..valid_config()
        };
        assert_eq!(config.tick_interval(), None);
        assert_eq!(
            valid_config().tick_interval(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_tick_interval_is_clamped() {
        let tiny = Config {
            log_tick_rate: 1e-10,
            ..valid_config()
        };
        assert!(tiny.validate().is_ok());
        assert_eq!(tiny.tick_interval(), Some(Duration::from_millis(1)));

        let huge = Config {
            log_tick_rate: 1e30,
            ..valid_config()
        };
        assert_eq!(huge.tick_interval(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_validate_non_finite_tick_rate() {
        let config = Config {
            log_tick_rate: f64::NAN,
            ..valid_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tick rate"));
    }

    #[test]
    fn test_huge_flush_interval_saturates() {
        let config = Config {
            max_time_between_flushes: 1e30,
            ..valid_config()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.max_flush_interval(), Duration::MAX);

        let zero = Config {
            max_time_between_flushes: 0.0,
            ..valid_config()
        };
        assert_eq!(zero.max_flush_interval(), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "base_url": "http://localhost:8080",
                "auth_key": "k",
                "compression_codec": "zstd",
                "severity_filter": "warning",
                "host_type": "server"
            }"#,
        )
        .unwrap();
        assert_eq!(config.compression_codec, Codec::Zstd);
        assert_eq!(config.severity_filter, Severity::Warning);
        assert_eq!(config.host_type, HostType::Server);
        assert_eq!(config.max_lines_between_flushes, 100);
    }

    #[test]
    #[serial]
    fn test_from_env_requires_base_url() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("LOGSHIP_BASE_URL", "collector.example.com");
        env::set_var("LOGSHIP_AUTH_KEY", "secret");
        env::set_var("LOGSHIP_MAX_LOG_LINES_BETWEEN_LOG_FLUSHES", "250");
        env::set_var("LOGSHIP_USE_COMPRESSION", "false");
        env::set_var("LOGSHIP_HOST_TYPE", "editor");
        env::set_var("LOGSHIP_FLUSH_TIMEOUT", "0");
        env::set_var("HTTPS_PROXY", "https://proxy.example.com:3128");
        env::set_var("LOGSHIP_LOG_TICK_RATE", "not-a-number");

        let config = Config::from_env().unwrap();
        assert_eq!(config.base_url, "https://collector.example.com");
        assert_eq!(config.auth_key, "secret");
        assert_eq!(config.max_lines_between_flushes, 250);
        assert!(!config.use_compression);
        assert_eq!(config.host_type, HostType::Editor);
        assert_eq!(config.flush_timeout, 5);
        assert_eq!(
            config.proxy_https.as_deref(),
            Some("https://proxy.example.com:3128")
        );
        assert!((config.log_tick_rate - 1.0).abs() < f64::EPSILON);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_codec() {
        clear_env();
        env::set_var("LOGSHIP_BASE_URL", "https://collector.example.com");
        env::set_var("LOGSHIP_AUTH_KEY", "secret");
        env::set_var("LOGSHIP_COMPRESSION_CODEC", "lzma");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("LOGSHIP_COMPRESSION_CODEC"));

        clear_env();
    }
}
