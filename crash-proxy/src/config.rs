use serde::Deserialize;
use thiserror::Error;
use url::Url;

const DEFAULT_MAX_LOG_CHARS: usize = 2_000_000;
const DEFAULT_MAX_FAILED_TASK_CHARS: usize = 400;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_KEY_TTL_SECS: u64 = 3600;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

// Room for field names, escapes and whitespace on top of the field ceilings.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Upstream URL has no host: {0}")]
    MissingUpstreamHost(String),

    #[error("Upstream timeout cannot be 0")]
    InvalidTimeout,

    #[error("Rate limit must allow at least one request per minute")]
    InvalidRateLimit,

    #[error("Rate limit key TTL cannot be 0")]
    InvalidKeyTtl,

    #[error("Size ceiling `{0}` cannot be 0")]
    InvalidCeiling(&'static str),
}

/// Crash proxy configuration
///
/// Built once at startup and shared read-only with every request handler.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for crash report submissions
    #[serde(default)]
    pub listener: Listener,
    /// Where validated requests are forwarded to
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Configuration with defaults for everything but the upstream target.
    pub fn new(upstream_url: Url) -> Self {
        Self {
            listener: Listener::default(),
            upstream: UpstreamConfig {
                url: upstream_url,
                timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            },
            limits: Limits::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        self.upstream.validate()?;
        self.limits.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8081,
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

/// Upstream (document index) configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL of the upstream. Its path, if any, prefixes forwarded paths.
    ///
    /// Invalid URLs are rejected during config deserialization.
    pub url: Url,
    /// Maximum time to wait for the upstream response head
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme(self.url.scheme().to_string()));
        }
        if self.url.host_str().is_none() {
            return Err(ConfigError::MissingUpstreamHost(self.url.to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Field size ceilings, counted in characters, and the raw body ceiling in bytes.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub max_log_chars: usize,
    pub max_failed_task_chars: usize,
    /// Derived from the field ceilings when unset
    pub max_body_bytes: Option<usize>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_log_chars: DEFAULT_MAX_LOG_CHARS,
            max_failed_task_chars: DEFAULT_MAX_FAILED_TASK_CHARS,
            max_body_bytes: None,
        }
    }
}

impl Limits {
    /// Largest request body read into memory before decoding.
    ///
    /// JSON escaping can make the wire form of a field longer than its decoded
    /// value, so the derived ceiling doubles the field ceilings.
    pub fn body_ceiling(&self) -> usize {
        self.max_body_bytes.unwrap_or_else(|| {
            self.max_log_chars
                .saturating_add(self.max_failed_task_chars)
                .saturating_mul(2)
                .saturating_add(BODY_OVERHEAD_BYTES)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_log_chars == 0 {
            return Err(ConfigError::InvalidCeiling("max_log_chars"));
        }
        if self.max_failed_task_chars == 0 {
            return Err(ConfigError::InvalidCeiling("max_failed_task_chars"));
        }
        if self.max_body_bytes == Some(0) {
            return Err(ConfigError::InvalidCeiling("max_body_bytes"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Allowance per route; also the burst size
    pub requests_per_minute: u32,
    /// Idle time after which a key's bucket is dropped
    pub key_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            key_ttl_secs: DEFAULT_KEY_TTL_SECS,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        if self.key_ttl_secs == 0 {
            return Err(ConfigError::InvalidKeyTtl);
        }
        Ok(())
    }
}

fn default_upstream_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "127.0.0.1"
    port: 9000
upstream:
    url: "http://elasticsearch:9200"
    timeout_secs: 5
limits:
    max_log_chars: 1000
    max_failed_task_chars: 100
rate_limit:
    requests_per_minute: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.upstream.url.as_str(), "http://elasticsearch:9200/");
        assert_eq!(config.upstream.timeout_secs, 5);
        assert_eq!(config.limits.max_log_chars, 1000);
        assert_eq!(config.limits.body_ceiling(), 2200 + BODY_OVERHEAD_BYTES);
        assert_eq!(config.rate_limit.requests_per_minute, 10);
        assert_eq!(config.rate_limit.key_ttl_secs, DEFAULT_KEY_TTL_SECS);
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("upstream: {url: \"http://es\"}").unwrap();
        assert_eq!(config, Config::new(Url::parse("http://es").unwrap()));
        assert_eq!(config.listener.port, 8081);
        assert_eq!(config.limits.max_log_chars, 2_000_000);
        assert_eq!(config.limits.max_failed_task_chars, 400);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.upstream.timeout_secs, 30);
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config::new(Url::parse("http://127.0.0.1:9200").unwrap());

        let mut config = base_config.clone();
        config.listener.port = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::InvalidPort);

        let mut config = base_config.clone();
        config.upstream.url = Url::parse("https://127.0.0.1:9200").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::UnsupportedScheme(_)
        ));

        let mut config = base_config.clone();
        config.upstream.timeout_secs = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::InvalidTimeout);

        let mut config = base_config.clone();
        config.rate_limit.requests_per_minute = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::InvalidRateLimit);

        let mut config = base_config.clone();
        config.rate_limit.key_ttl_secs = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::InvalidKeyTtl);

        let mut config = base_config.clone();
        config.limits.max_failed_task_chars = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InvalidCeiling("max_failed_task_chars")
        );

        let mut config = base_config;
        config.limits.max_body_bytes = Some(0);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InvalidCeiling("max_body_bytes")
        );
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(serde_yaml::from_str::<Config>("upstream: {url: \"not-a-url\"}").is_err());

        // Missing upstream
        assert!(serde_yaml::from_str::<Config>("listener: {host: \"0.0.0.0\", port: 1}").is_err());

        // Invalid port type
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: "not_a_number"}
upstream: {url: "http://es"}
"#
            )
            .is_err()
        );
    }
}
