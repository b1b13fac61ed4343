//! Tracing subscriber setup for binaries embedding the harvester.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{HarvestError, HarvestResult};

const DEFAULT_LOG_FILTER: &str = "instrument_harvester=info";
const VERBOSE_LOG_FILTER: &str = "instrument_harvester=debug";

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Log at debug level (ignored when `RUST_LOG` is set).
    pub verbose: bool,
    /// Also append log lines to this file.
    pub log_file: Option<PathBuf>,
}

/// Install a global tracing subscriber writing to stderr and, optionally, a log file.
pub fn init_logging(config: &LogConfig) -> HarvestResult<()> {
    let default = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| HarvestError::Config {
            message: format!("failed to install tracing subscriber: {e}"),
        })
}
