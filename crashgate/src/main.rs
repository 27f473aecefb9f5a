mod config;
mod logging;
mod statsd;

use clap::{Args, Parser};
use config::{Config, ConfigError, Overrides, build_proxy_config};
use crash_proxy::errors::CrashProxyError;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "crashgate", about = "Validating reverse proxy for crash app reports")]
enum CliCommand {
    /// Starts the proxy in front of the crash report index
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// YAML file with metrics, logging and crash_proxy sections
    #[arg(long)]
    config_file_path: Option<PathBuf>,

    /// Base URL of the upstream index, e.g. http://elasticsearch:9200
    #[arg(long)]
    target: Option<String>,

    /// Maximum length of the crash log, in characters
    #[arg(long)]
    logmax: Option<usize>,

    /// Maximum length of the failed task, in characters
    #[arg(long)]
    taskmax: Option<usize>,

    /// Requests per minute admitted on each route
    #[arg(long)]
    ratelimit: Option<u32>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

impl ServeArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            target: self.target.clone(),
            host: self.host.clone(),
            port: self.port,
            max_log_chars: self.logmax,
            max_failed_task_chars: self.taskmax,
            requests_per_minute: self.ratelimit,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] logging::LoggingError),
    #[error(transparent)]
    Metrics(#[from] statsd::MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Proxy(#[from] CrashProxyError),
}

fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Serve(args) => {
            if let Err(e) = serve(&args) {
                eprintln!("crashgate: {e}");
                process::exit(1);
            }
        }
    }
}

fn serve(args: &ServeArgs) -> Result<(), CliError> {
    let file_config = match &args.config_file_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let proxy_config = build_proxy_config(file_config.crash_proxy, &args.overrides())?;

    let _sentry = logging::init(&file_config.common.logging)?;
    if let Some(metrics_config) = &file_config.common.metrics {
        statsd::init(metrics_config)?;
    }

    tracing::info!(
        upstream = %proxy_config.upstream.url,
        max_log_chars = proxy_config.limits.max_log_chars,
        max_failed_task_chars = proxy_config.limits.max_failed_task_chars,
        requests_per_minute = proxy_config.rate_limit.requests_per_minute,
        "Starting crashgate"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(crash_proxy::run(proxy_config))?;

    Ok(())
}
