use relay::config::Config as RelayConfig;
use sentry::types::Dsn;

pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

pub struct LoggingConfig {
    pub sentry_dsn: Dsn,
}

pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

pub struct Config {
    pub common: CommonConfig,
    pub relay: RelayConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            common: CommonConfig::from_lookup(&lookup)?,
            relay: RelayConfig::from_lookup(&lookup)?,
        })
    }
}

impl CommonConfig {
    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let metrics = match (non_empty("STATSD_HOST"), non_empty("STATSD_PORT")) {
            (Some(statsd_host), Some(port)) => Some(MetricsConfig {
                statsd_host,
                statsd_port: port
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidStatsdPort(port.clone()))?,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteMetrics),
        };

        let logging = match non_empty("SENTRY_DSN") {
            Some(dsn) => Some(LoggingConfig {
                sentry_dsn: dsn.trim().parse()?,
            }),
            None => None,
        };

        Ok(CommonConfig { metrics, logging })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid SENTRY_DSN: {0}")]
    InvalidDsn(#[from] sentry::types::ParseDsnError),
    #[error("invalid STATSD_PORT: {0:?}")]
    InvalidStatsdPort(String),
    #[error("STATSD_HOST and STATSD_PORT must be set together")]
    IncompleteMetrics,
    #[error(transparent)]
    Relay(#[from] relay::config::ConfigError),
}
