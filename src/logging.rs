//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file
//! output. Log lines go to stderr so command output on stdout stays clean.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used for `--verbose`
pub const VERBOSE_LEVEL: &str = "mathchat=debug";

/// Filter used while the configuration is still loading
const BOOTSTRAP_LEVEL: &str = "mathchat=warn";

/// Runs `f` with a stderr subscriber installed for the current thread only
///
/// Configuration loading logs before [`init_logging`] can run. This keeps
/// those warnings visible without claiming the global subscriber.
pub fn with_bootstrap_logging<T>(verbose: bool, f: impl FnOnce() -> T) -> T {
    let level = if verbose { VERBOSE_LEVEL } else { BOOTSTRAP_LEVEL };
    tracing::subscriber::with_default(bootstrap_subscriber(level, std::io::stderr), f)
}

fn bootstrap_subscriber<W>(level: &str, writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = build_filter(level).unwrap_or_else(|_| EnvFilter::new(BOOTSTRAP_LEVEL));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(writer))
}

/// Initialize logging based on configuration
///
/// `RUST_LOG` takes precedence over `config.level`.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid, the log file cannot
/// be opened, or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use mathchat::config::LoggingConfig;
/// use mathchat::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "mathchat=debug".to_string(),
///     json_format: true,
///     file_path: None,
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_format {
        let stderr_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);

        if let Some(file_path) = &config.file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(Arc::new(file));

            registry.with(stderr_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stderr_layer).try_init()?;
        }
    } else {
        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);

        if let Some(file_path) = &config.file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));

            registry.with(stderr_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stderr_layer).try_init()?;
        }
    }

    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}
