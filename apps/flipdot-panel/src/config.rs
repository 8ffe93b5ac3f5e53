use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::connection::DEFAULT_RETRY_DELAY;

pub const DEVICE_URL_VAR: &str = "FLIPDOT_DEVICE_URL";
pub const RETRY_MS_VAR: &str = "FLIPDOT_RETRY_MS";
pub const PATTERN_URL_VAR: &str = "FLIPDOT_PATTERN_URL";

const DEFAULT_DEVICE: &str = "127.0.0.1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var} value {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
}

/// Flipdot panel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device address, with or without scheme and path (defaults to "127.0.0.1")
    pub device: String,
    /// Pause between losing the link and reconnecting
    pub retry_delay: Duration,
    /// Base url of the pattern server; saving is disabled without it
    pub pattern_url: Option<String>,
}

/// Command line values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub device: Option<String>,
    pub retry_ms: Option<u64>,
    pub pattern_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(device) = env::var(DEVICE_URL_VAR) {
            config.device = device;
        }
        if let Ok(value) = env::var(RETRY_MS_VAR) {
            let ms = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: RETRY_MS_VAR,
                    value: value.clone(),
                })?;
            config.retry_delay = Duration::from_millis(ms);
        }
        config.pattern_url = env::var(PATTERN_URL_VAR)
            .ok()
            .filter(|url| !url.trim().is_empty());
        Ok(config)
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(device) = overrides.device {
            self.device = device;
        }
        if let Some(ms) = overrides.retry_ms {
            self.retry_delay = Duration::from_millis(ms);
        }
        if overrides.pattern_url.is_some() {
            self.pattern_url = overrides.pattern_url;
        }
        self
    }

    /// WebSocket endpoint of the device. Bare hosts get `ws://`, `localhost`
    /// becomes `127.0.0.1` to avoid IPv6 preference, and an empty path
    /// becomes `/ws`.
    pub fn ws_url(&self) -> Result<Url, ConfigError> {
        let mut url = parse_with_default_scheme(&self.device, "ws")?;
        match url.scheme() {
            "ws" | "wss" => {}
            "http" => set_scheme(&mut url, "ws")?,
            "https" => set_scheme(&mut url, "wss")?,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if url.path().is_empty() || url.path() == "/" {
            url.set_path("/ws");
        }
        Ok(url)
    }

    pub fn pattern_url(&self) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = self.pattern_url.as_deref() else {
            return Ok(None);
        };
        let url = parse_with_default_scheme(raw, "http")?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url)),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            pattern_url: None,
        }
    }
}

fn parse_with_default_scheme(raw: &str, scheme: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{scheme}://{raw}")
    };
    let mut url = Url::parse(&candidate).map_err(|err| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    if url.host_str() == Some("localhost") {
        url.set_host(Some("127.0.0.1"))
            .map_err(|err| ConfigError::InvalidUrl {
                url: raw.to_string(),
                reason: err.to_string(),
            })?;
    }
    Ok(url)
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<(), ConfigError> {
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear_env() {
        unsafe {
            env::remove_var(DEVICE_URL_VAR);
            env::remove_var(RETRY_MS_VAR);
            env::remove_var(PATTERN_URL_VAR);
        }
    }

    fn device(device: &str) -> Config {
        Config {
            device: device.to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device, "127.0.0.1");
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert_eq!(config.pattern_url, None);
        assert_eq!(config.ws_url().unwrap().as_str(), "ws://127.0.0.1/ws");
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(Config::from_env().unwrap(), Config::default());
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            env::set_var(DEVICE_URL_VAR, "flipdot.local:81");
            env::set_var(RETRY_MS_VAR, "1500");
            env::set_var(PATTERN_URL_VAR, "patterns.local");
        }
        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.device, "flipdot.local:81");
        assert_eq!(config.retry_delay, Duration::from_millis(1500));
        assert_eq!(
            config.pattern_url().unwrap().unwrap().as_str(),
            "http://patterns.local/"
        );
    }

    #[test]
    fn test_config_from_env_bad_retry() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(RETRY_MS_VAR, "soon");
        }
        let result = Config::from_env();
        clear_env();
        assert!(matches!(result, Err(ConfigError::InvalidNumber { .. })));
    }

    #[test]
    fn overrides_win() {
        let config = Config::default().apply(Overrides {
            device: Some("10.0.0.9".into()),
            retry_ms: Some(250),
            pattern_url: None,
        });
        assert_eq!(config.device, "10.0.0.9");
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.pattern_url, None);
    }

    #[test]
    fn ws_url_normalisation() {
        assert_eq!(
            device("localhost:8080").ws_url().unwrap().as_str(),
            "ws://127.0.0.1:8080/ws"
        );
        assert_eq!(
            device("http://panel.lan").ws_url().unwrap().as_str(),
            "ws://panel.lan/ws"
        );
        assert_eq!(
            device("wss://panel.lan/socket").ws_url().unwrap().as_str(),
            "wss://panel.lan/socket"
        );
        assert!(matches!(
            device("ftp://panel.lan").ws_url(),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }
}
