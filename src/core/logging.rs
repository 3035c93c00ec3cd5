//! Logging initialisation
//!
//! Installs `flexi_logger` behind the `log` facade. Consumer callbacks log
//! from broker dispatcher threads, so every line format names the thread.

use crate::core::config::LoggingSettings;
use colored::Colorize;
use flexi_logger::{DeferredNow, FileSpec, Logger, LoggerHandle};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use strum_macros::{Display, EnumString};

static LOGGER_HANDLE: OnceLock<Mutex<LoggerHandle>> = OnceLock::new();

const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";
const CRATE_PREFIX: &str = "mqverify::";

/// Line format of log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    /// `timestamp level [thread] message`
    #[default]
    Text,
    /// Text plus the source location
    Ext,
    /// One JSON object per line
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log specification '{spec}': {message}")]
    Spec { spec: String, message: String },

    #[error("Cannot log to file {path}: {message}")]
    File { path: String, message: String },

    #[error("Cannot start logger: {message}")]
    Start { message: String },

    #[error("Logger not initialised; call init_logging first")]
    NotInitialised,

    #[error("Logger handle lock poisoned")]
    Poisoned,
}

/// Install the global logger
///
/// `level` is a flexi_logger spec such as `info` or `mqverify::queue=trace`.
/// Can succeed only once per process.
pub fn init_logging(
    level: &str,
    format: LogFormat,
    file: Option<&Path>,
    color: bool,
) -> Result<(), LoggingError> {
    let mut logger = Logger::try_with_str(level).map_err(|e| LoggingError::Spec {
        spec: level.to_string(),
        message: e.to_string(),
    })?;

    logger = match (format, color) {
        (LogFormat::Json, _) => logger.format(json_format),
        (LogFormat::Ext, true) => logger.format(ext_color_format),
        (LogFormat::Ext, false) => logger.format(ext_format),
        (LogFormat::Text, true) => logger.format(text_color_format),
        (LogFormat::Text, false) => logger.format(text_format),
    };

    if let Some(path) = file {
        let file_spec = FileSpec::try_from(path).map_err(|e| LoggingError::File {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        logger = logger.log_to_file(file_spec);
    }

    let handle = logger.start().map_err(|e| LoggingError::Start {
        message: e.to_string(),
    })?;
    let _ = LOGGER_HANDLE.set(Mutex::new(handle));
    log::debug!("logging initialised at {} in {} format", level, format);
    Ok(())
}

/// Install the global logger from configuration
pub fn init_logging_from(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let format = settings.log_format().map_err(|e| LoggingError::Spec {
        spec: settings.format.clone(),
        message: e.to_string(),
    })?;
    init_logging(
        &settings.level,
        format,
        settings.file.as_deref(),
        settings.color,
    )
}

/// Change the log level at runtime
///
/// Format, file and colour are fixed when the logger starts.
pub fn reconfigure_logging(level: &str) -> Result<(), LoggingError> {
    let handle = LOGGER_HANDLE.get().ok_or(LoggingError::NotInitialised)?;
    let mut handle = handle.lock().map_err(|_| LoggingError::Poisoned)?;
    handle
        .parse_and_push_temp_spec(level)
        .map_err(|e| LoggingError::Spec {
            spec: level.to_string(),
            message: e.to_string(),
        })
}

fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERR",
        log::Level::Warn => "WRN",
        log::Level::Info => "INF",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRC",
    }
}

fn thread_name() -> String {
    let current = std::thread::current();
    current.name().unwrap_or("unnamed").to_string()
}

fn text_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} {} [{}] {}",
        now.format(TIMESTAMP),
        level_tag(record.level()),
        thread_name(),
        record.args()
    )
}

fn colored_level(level: log::Level) -> colored::ColoredString {
    let tag = level_tag(level);
    match level {
        log::Level::Error => tag.red().bold(),
        log::Level::Warn => tag.yellow(),
        log::Level::Info => tag.green(),
        log::Level::Debug => tag.blue(),
        log::Level::Trace => tag.magenta(),
    }
}

fn text_color_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} {} [{}] {}",
        now.format(TIMESTAMP).to_string().dimmed(),
        colored_level(record.level()),
        thread_name().cyan(),
        record.args()
    )
}

fn ext_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    text_format(w, now, record)?;
    write!(w, " ({})", format_target_as_path(record.target(), record.line()))
}

fn ext_color_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    text_color_format(w, now, record)?;
    let location = format_target_as_path(record.target(), record.line());
    write!(w, " ({})", location.dimmed())
}

fn json_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    let line = serde_json::json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level_tag(record.level()),
        "thread": thread_name(),
        "message": record.args().to_string(),
        "target": format_target_as_path(record.target(), record.line()),
    });

    match serde_json::to_string(&line) {
        Ok(json) => w.write_all(json.as_bytes()),
        Err(_) => w.write_all(b"{\"error\":\"Failed to serialize log message\"}"),
    }
}

/// `mqverify::queue::consumer` at line 42 becomes `queue/consumer.rs:42`
fn format_target_as_path(target: &str, line: Option<u32>) -> String {
    let path_like = match target.strip_prefix(CRATE_PREFIX) {
        Some(module) => module.replace("::", "/") + ".rs",
        None => target.replace("::", "/"),
    };

    match line {
        Some(line) => format!("{}:{}", path_like, line),
        None => path_like,
    }
}
