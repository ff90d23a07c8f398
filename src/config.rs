//! Configuration loading and persistence.
//!
//! Handles reading and writing the fbns-push configuration file. The
//! session cookie is never written to disk; it comes from `FBNS_COOKIE`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::api::AccountSession;
use crate::constants;
use crate::device::DeviceDescriptor;
use crate::store::FileConnectionStore;

/// Configuration for the fbns-push CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Broker hostname.
    pub broker_host: String,
    /// Broker TLS port.
    pub broker_port: u16,
    /// Keep-alive announced in CONNECT, in seconds.
    pub keep_alive_secs: u16,
    /// Delay before reconnecting after a failure, in seconds.
    pub reconnect_delay_secs: u64,
    /// Grace period between the final ping and hand-off, in seconds.
    pub handoff_grace_secs: u64,
    /// Upper bound on TCP connect + TLS handshake, in seconds.
    pub connect_timeout_secs: u64,
    /// Token registration endpoint.
    pub registration_url: String,
    /// Registration retries after the first failed call.
    pub registration_retries: u32,
    /// Delay between registration attempts, in seconds.
    pub registration_retry_delay_secs: u64,
    /// Push tokens older than this are discarded, in seconds.
    pub token_max_age_secs: u64,
    /// Emulated device, generated on first run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDescriptor>,
    /// Logged-in user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// CSRF token of the web session.
    pub csrf_token: String,
    /// Session cookie - NOT serialized to disk.
    #[serde(skip)]
    pub cookie: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: constants::BROKER_HOST.to_string(),
            broker_port: constants::BROKER_PORT,
            keep_alive_secs: constants::KEEP_ALIVE_SECS,
            reconnect_delay_secs: constants::RECONNECT_DELAY.as_secs(),
            handoff_grace_secs: constants::HANDOFF_GRACE.as_secs(),
            connect_timeout_secs: constants::CONNECT_TIMEOUT.as_secs(),
            registration_url: constants::REGISTRATION_URL.to_string(),
            registration_retries: constants::REGISTRATION_RETRIES,
            registration_retry_delay_secs: constants::REGISTRATION_RETRY_DELAY.as_secs(),
            token_max_age_secs: constants::TOKEN_MAX_AGE.as_secs(),
            device: None,
            user_id: None,
            csrf_token: String::new(),
            cookie: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `FBNS_CONFIG_DIR` env var: explicit override
    /// 2. `#[cfg(test)]` (unit tests): `fbns-push-test` under the temp dir
    /// 3. Default: platform config dir (Linux: ~/.config/fbns-push)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("FBNS_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            #[cfg(test)]
            {
                std::env::temp_dir().join("fbns-push-test")
            }

            #[cfg(not(test))]
            {
                dirs::config_dir()
                    .context("Could not determine config directory")?
                    .join("fbns-push")
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|e| {
            log::debug!("Using default config: {e}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("FBNS_BROKER_HOST") {
            self.broker_host = host;
        }

        if let Some(port) = lookup("FBNS_BROKER_PORT").and_then(|v| v.parse().ok()) {
            self.broker_port = port;
        }

        if let Some(keep_alive) = lookup("FBNS_KEEP_ALIVE").and_then(|v| v.parse().ok()) {
            self.keep_alive_secs = keep_alive;
        }

        if let Some(retries) = lookup("FBNS_REGISTRATION_RETRIES").and_then(|v| v.parse().ok()) {
            self.registration_retries = retries;
        }

        if let Some(user_id) = lookup("FBNS_USER_ID").and_then(|v| v.parse().ok()) {
            self.user_id = Some(user_id);
        }

        if let Some(csrf) = lookup("FBNS_CSRF_TOKEN") {
            self.csrf_token = csrf;
        }

        // Cookie only ever comes from the environment
        if let Some(cookie) = lookup("FBNS_COOKIE") {
            self.cookie = Some(cookie);
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the cookie is NOT saved.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Device descriptor, generating one on first use.
    ///
    /// Returns `true` alongside it when a new device was generated and the
    /// config should be saved.
    pub fn ensure_device(&mut self) -> (DeviceDescriptor, bool) {
        match &self.device {
            Some(device) => (device.clone(), false),
            None => {
                let device = DeviceDescriptor::generate();
                self.device = Some(device.clone());
                (device, true)
            }
        }
    }

    /// Account credentials for the HTTP collaborator.
    #[must_use]
    pub fn account_session(&self) -> AccountSession {
        AccountSession {
            user_id: self.user_id,
            csrf_token: self.csrf_token.clone(),
            cookie: self.cookie.clone(),
        }
    }

    /// Store for the connection record, next to the config file.
    pub fn connection_store(&self) -> Result<FileConnectionStore> {
        Ok(FileConnectionStore::in_dir(&Self::config_dir()?))
    }

    /// Session-facing settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            broker_host: self.broker_host.clone(),
            broker_port: self.broker_port,
            keep_alive_secs: self.keep_alive_secs,
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            handoff_grace: Duration::from_secs(self.handoff_grace_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            registration_url: self.registration_url.clone(),
            registration_retries: self.registration_retries,
            registration_retry_delay: Duration::from_secs(self.registration_retry_delay_secs),
            token_max_age: Duration::from_secs(self.token_max_age_secs),
        }
    }
}

/// Timings and endpoints the push session runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Broker hostname.
    pub broker_host: String,
    /// Broker port.
    pub broker_port: u16,
    /// Keep-alive announced in CONNECT, in seconds.
    pub keep_alive_secs: u16,
    /// Delay before reconnecting.
    pub reconnect_delay: Duration,
    /// Grace period between the final ping and hand-off.
    pub handoff_grace: Duration,
    /// Upper bound on connect + TLS handshake.
    pub connect_timeout: Duration,
    /// Token registration endpoint.
    pub registration_url: String,
    /// Registration retries after the first failed call.
    pub registration_retries: u32,
    /// Delay between registration attempts.
    pub registration_retry_delay: Duration,
    /// Maximum stored token age.
    pub token_max_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}

impl SessionConfig {
    /// Interval between keep-alive pings, also the hand-off standby window.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
            .saturating_sub(constants::KEEP_ALIVE_HEADROOM)
            .max(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker_host, "mqtt-mini.facebook.com");
        assert_eq!(config.broker_port, 443);
        assert_eq!(config.keep_alive_secs, 900);
        assert_eq!(config.registration_retries, 1);
        assert_eq!(config.session_config().ping_interval(), Duration::from_secs(840));
    }

    #[test]
    fn test_config_serialization_excludes_cookie() {
        let mut config = Config::default();
        config.cookie = Some("sessionid=secret_cookie".to_string());
        let json = serde_json::to_string(&config).expect("serialize");

        assert!(!json.contains("secret_cookie"));
        assert!(!json.contains("cookie"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"broker_port": 8883}"#).expect("parse");
        assert_eq!(config.broker_port, 8883);
        assert_eq!(config.broker_host, constants::BROKER_HOST);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("FBNS_BROKER_HOST", "localhost"),
            ("FBNS_BROKER_PORT", "not-a-port"),
            ("FBNS_KEEP_ALIVE", "120"),
            ("FBNS_REGISTRATION_RETRIES", "3"),
            ("FBNS_USER_ID", "42"),
            ("FBNS_COOKIE", "sessionid=abc"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 443);
        assert_eq!(config.keep_alive_secs, 120);
        assert_eq!(config.registration_retries, 3);
        assert_eq!(config.account_session().user_id, Some(42));
        assert_eq!(config.cookie.as_deref(), Some("sessionid=abc"));
        assert_eq!(config.session_config().ping_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_ensure_device_generates_once() {
        let mut config = Config::default();
        let (first, created) = config.ensure_device();
        assert!(created);
        let (second, created) = config.ensure_device();
        assert!(!created);
        assert_eq!(first, second);
    }
}
