//! Logger initialization.
//!
//! All crates log through the `log` facade macros re-exported from the crate root.
//! The process owner calls [`init_logger`] once at startup; tests use [`try_init_logger`].

mod appender;
mod consts;
mod logger;

use appender::AppenderSpec;
use consts::{DEFAULT_LOGGER_ENV, ERR_LOG_FILE_NAME, LOG_FILE_NAME};
use log::LevelFilter;
use log4rs::config::{Config, Root};
use logger::Builder;
use thiserror::Error;

pub use log::LevelFilter as LogLevel;

const CONSOLE_APPENDER: &str = "stdout";
const LOG_FILE_APPENDER: &str = "log_file";
const ERR_LOG_FILE_APPENDER: &str = "err_log_file";

#[derive(Clone, Debug, Error)]
pub enum LogError {
    #[error("logger spec parsing error: {0}")]
    ParseLoggerSpecError(String),

    #[error("log directory {0} is not a valid UTF-8 path")]
    InvalidLogDir(String),

    #[error("log appender error: {0}")]
    AppenderError(String),

    #[error("log config error: {0}")]
    ConfigError(String),

    #[error("a logger is already installed")]
    AlreadyInitialized,
}

/// Installs the global logger.
///
/// Logs go to stdout and, when `log_dir` is provided, to a rolling log file plus an errors-only
/// rolling file. `filters` follows the `RUST_LOG` syntax and is applied on top of the `RUST_LOG`
/// environment variable itself.
pub fn init_logger(log_dir: Option<&str>, filters: &str) -> Result<(), LogError> {
    let config = build_config(log_dir, filters)?;
    log4rs::init_config(config).map_err(|_| LogError::AlreadyInitialized)?;
    Ok(())
}

/// Console-only variant of [`init_logger`] for tests, silently does nothing if a logger is already set.
pub fn try_init_logger(filters: &str) {
    if let Ok(config) = build_config(None, filters) {
        let _ = log4rs::init_config(config);
    }
}

fn build_config(log_dir: Option<&str>, filters: &str) -> Result<Config, LogError> {
    let loggers = Builder::new(LevelFilter::Info).parse_env(DEFAULT_LOGGER_ENV).parse_expression(filters).build();

    let mut specs = vec![AppenderSpec::console(CONSOLE_APPENDER, None)];
    if let Some(log_dir) = log_dir {
        specs.push(AppenderSpec::roller(LOG_FILE_APPENDER, None, log_dir, LOG_FILE_NAME)?);
        specs.push(AppenderSpec::roller(ERR_LOG_FILE_APPENDER, Some(LevelFilter::Warn), log_dir, ERR_LOG_FILE_NAME)?);
    }
    let names = specs.iter().map(|spec| spec.name).collect::<Vec<_>>();

    Config::builder()
        .appenders(specs.iter_mut().filter_map(|spec| spec.appender()))
        .loggers(loggers.items())
        .build(Root::builder().appenders(names).build(loggers.root_level()))
        .map_err(|err| LogError::ConfigError(err.to_string()))
}
