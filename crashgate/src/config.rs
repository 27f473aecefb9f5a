use crash_proxy::config::Config as CrashProxyConfig;
use serde::Deserialize;
use std::fs::File;
use url::Url;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub crash_proxy: Option<CrashProxyConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

/// Settings given on the command line. They take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub target: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_log_chars: Option<usize>,
    pub max_failed_task_chars: Option<usize>,
    pub requests_per_minute: Option<u32>,
}

/// Merges the file section and the command line into a validated proxy config.
///
/// The upstream target must come from one of the two.
pub fn build_proxy_config(
    section: Option<CrashProxyConfig>,
    overrides: &Overrides,
) -> Result<CrashProxyConfig, ConfigError> {
    let target = overrides.target.as_deref().map(parse_target).transpose()?;

    let mut config = match (section, target) {
        (Some(mut config), Some(url)) => {
            config.upstream.url = url;
            config
        }
        (Some(config), None) => config,
        (None, Some(url)) => CrashProxyConfig::new(url),
        (None, None) => return Err(ConfigError::MissingTarget),
    };

    if let Some(host) = &overrides.host {
        config.listener.host = host.clone();
    }
    if let Some(port) = overrides.port {
        config.listener.port = port;
    }
    if let Some(max) = overrides.max_log_chars {
        config.limits.max_log_chars = max;
    }
    if let Some(max) = overrides.max_failed_task_chars {
        config.limits.max_failed_task_chars = max;
    }
    if let Some(rpm) = overrides.requests_per_minute {
        config.rate_limit.requests_per_minute = rpm;
    }

    config.validate()?;
    Ok(config)
}

fn parse_target(target: &str) -> Result<Url, ConfigError> {
    Url::parse(target).map_err(|source| ConfigError::InvalidTarget {
        target: target.to_string(),
        source,
    })
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("no target given, pass --target or set crash_proxy.upstream.url")]
    MissingTarget,
    #[error("invalid target `{target}`: {source}")]
    InvalidTarget {
        target: String,
        source: url::ParseError,
    },
    #[error("invalid configuration: {0}")]
    Invalid(#[from] crash_proxy::config::ConfigError),
}
