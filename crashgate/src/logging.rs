use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("invalid sentry dsn: {0}")]
    InvalidDsn(#[from] sentry::types::ParseDsnError),
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
///
/// The returned guard flushes pending Sentry events on drop and must outlive
/// the server.
pub fn init(config: &LoggingConfig) -> Result<Option<sentry::ClientInitGuard>, LoggingError> {
    let guard = match &config.sentry_dsn {
        Some(dsn) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.parse()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        None => None,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_dsn() {
        let config = LoggingConfig {
            level: "info".into(),
            sentry_dsn: Some("not a dsn".into()),
        };
        assert!(matches!(init(&config), Err(LoggingError::InvalidDsn(_))));
    }
}
