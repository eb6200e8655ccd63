use shared::http::ConnectionTimeouts;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;

/// Largest request body the relay will read, in bytes.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Port cannot be 0")]
    InvalidPort,
}

/// Shared secret callers must present in the `x-api-key` header.
///
/// The value never shows up in `Debug` output, so the config can be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for an empty key, which counts as "not configured".
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(ApiKey(key)) }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Network listener configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

/// Relay configuration, loaded once at startup and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub listener: Listener,
    pub timeouts: ConnectionTimeouts,
    /// `None` when no key is configured. The relay endpoint then refuses every call.
    pub api_key: Option<ApiKey>,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            timeouts: ConnectionTimeouts::default(),
            api_key: None,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// Reads `HOST`, `PORT` and `APIKEY` (or `API_KEY`) from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut listener = Listener::default();
        if let Some(host) = non_empty("HOST") {
            listener.host = host.trim().to_string();
        }
        if let Some(port) = non_empty("PORT") {
            listener.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "PORT",
                    value: port.clone(),
                })?;
        }

        let api_key = lookup("APIKEY")
            .and_then(ApiKey::new)
            .or_else(|| lookup("API_KEY").and_then(ApiKey::new));

        let config = Config {
            listener,
            api_key,
            ..Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()
    }
}
