//! Configuration management for MediaGate
//!
//! Handles config file loading/saving and the media server address.
//! Config is stored at ~/.config/mediagate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthSettings, RefreshSettings};
use crate::health::HealthSettings;
use crate::resilience::{BreakerSettings, RetryPolicy};

/// Environment variable overriding the configured server
pub const SERVER_URL_ENV: &str = "MEDIAGATE_SERVER_URL";

/// Application configuration (every field optional, defaults apply)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Media server base URL (e.g. http://media.local:8096)
    pub server_url: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout_secs: Option<u64>,
    /// Attempts per request on 5xx / network failure
    pub retry_max_attempts: Option<u32>,
    /// Backoff unit; delay after attempt n is unit * 2^n
    pub retry_base_delay_ms: Option<u64>,
    pub circuit_failure_threshold: Option<u32>,
    pub circuit_cooldown_secs: Option<u64>,
    pub circuit_reset_window_secs: Option<u64>,
    pub refresh_max_attempts: Option<u32>,
    pub refresh_retry_delay_ms: Option<u64>,
    pub health_debounce_ms: Option<u64>,
    pub health_settle_delay_ms: Option<u64>,
    pub health_recovery_interval_secs: Option<u64>,
    pub auth_poll_interval_ms: Option<u64>,
    pub auth_timeout_secs: Option<u64>,
    /// Name shown on the server when pairing by QR code
    pub device_name: Option<String>,
    /// Where credentials are kept (default: beside this file)
    pub credentials_path: Option<PathBuf>,
}

/// Typed settings for every component, derived from a `Config`
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: Option<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerSettings,
    pub refresh: RefreshSettings,
    pub health: HealthSettings,
    pub auth: AuthSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            breaker: BreakerSettings::default(),
            refresh: RefreshSettings::default(),
            health: HealthSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl Config {
    /// Get config file path (~/.config/mediagate/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mediagate").join("config.toml"))
    }

    /// Load config from the default file, or return default if not found
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    /// Load config from `path`; a missing or malformed file yields defaults
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to the default file
    pub fn save(&self) -> Result<()> {
        let path = Self::path().context("Could not determine config path")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml).with_context(|| format!("Writing {}", path.display()))?;
        Ok(())
    }

    /// Server URL with fallback chain:
    /// 1. Explicit override (the --server flag)
    /// 2. Environment variable MEDIAGATE_SERVER_URL
    /// 3. Config file
    ///
    /// `None` leaves the stored credentials' server in charge.
    pub fn resolve_server_url(&self, flag: Option<&str>) -> Option<String> {
        flag.map(str::to_string)
            .or_else(|| std::env::var(SERVER_URL_ENV).ok())
            .or_else(|| self.server_url.clone())
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
    }

    /// Credentials file location
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials_path
            .clone()
            .or_else(crate::session::FileStorage::default_path)
    }

    /// Convert into component settings, filling gaps with defaults
    pub fn settings(&self, server_flag: Option<&str>) -> Settings {
        let defaults = Settings::default();
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let millis = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);

        Settings {
            server_url: self.resolve_server_url(server_flag),
            request_timeout: secs(self.request_timeout_secs, defaults.request_timeout),
            retry: RetryPolicy {
                max_attempts: self
                    .retry_max_attempts
                    .unwrap_or(defaults.retry.max_attempts)
                    .max(1),
                base_delay: millis(self.retry_base_delay_ms, defaults.retry.base_delay),
            },
            breaker: BreakerSettings {
                threshold: self
                    .circuit_failure_threshold
                    .unwrap_or(defaults.breaker.threshold)
                    .max(1),
                cooldown: secs(self.circuit_cooldown_secs, defaults.breaker.cooldown),
                reset_window: secs(self.circuit_reset_window_secs, defaults.breaker.reset_window),
            },
            refresh: RefreshSettings {
                max_attempts: self
                    .refresh_max_attempts
                    .unwrap_or(defaults.refresh.max_attempts)
                    .max(1),
                retry_delay: millis(self.refresh_retry_delay_ms, defaults.refresh.retry_delay),
            },
            health: HealthSettings {
                debounce_window: millis(self.health_debounce_ms, defaults.health.debounce_window),
                settle_delay: millis(self.health_settle_delay_ms, defaults.health.settle_delay),
                recovery_interval: secs(
                    self.health_recovery_interval_secs,
                    defaults.health.recovery_interval,
                ),
            },
            auth: AuthSettings {
                poll_interval: millis(self.auth_poll_interval_ms, defaults.auth.poll_interval),
                flow_timeout: secs(self.auth_timeout_secs, defaults.auth.flow_timeout),
                device_name: self.device_name.clone(),
            },
        }
    }
}
