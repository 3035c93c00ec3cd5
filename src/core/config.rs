//! TOML configuration file parsing and loading
//!
//! Settings for queue handlers, polling and logging. Every field has a
//! default, so an empty or missing file is a valid configuration.
//!
//! ```toml
//! [queue]
//! name = "orders"
//! prefetch = 16
//! publish_parallelism = 4
//! dead_letter_after = 5
//!
//! [retry]
//! max_duration_ms = 10000
//! delay_ms = 250
//! backoff = "fixed"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use crate::core::error_handling::ContextualError;
use crate::core::logging::LogFormat;
use crate::core::retry::{Backoff, RetryPolicy};
use crate::queue::{DecodeFailurePolicy, DEFAULT_PREFETCH, DEFAULT_PUBLISH_PARALLELISM};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use strum_macros::{Display, EnumString};

const CONFIG_DIR: &str = "mqverify";
const CONFIG_FILE: &str = "mqverify.toml";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {message}")]
    NotFound { message: String },

    #[error("Cannot read configuration file: {message}")]
    Io { message: String },

    #[error("Invalid TOML: {message}")]
    Parse { message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        !matches!(self, ConfigError::Io { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConfigError::NotFound { message }
            | ConfigError::Parse { message }
            | ConfigError::Invalid { message } => Some(message),
            ConfigError::Io { .. } => None,
        }
    }
}

/// Delay strategy names accepted in `[retry] backoff`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Queue to publish to and consume from
    pub name: Option<String>,
    pub prefetch: u16,
    pub publish_parallelism: usize,
    /// Discard undecodable payloads after this many deliveries
    pub dead_letter_after: Option<u32>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: None,
            prefetch: DEFAULT_PREFETCH,
            publish_parallelism: DEFAULT_PUBLISH_PARALLELISM,
            dead_letter_after: None,
        }
    }
}

impl QueueSettings {
    pub fn decode_failure_policy(&self) -> DecodeFailurePolicy {
        match self.dead_letter_after {
            Some(limit) => DecodeFailurePolicy::DeadLetterAfter(limit),
            None => DecodeFailurePolicy::Requeue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_duration_ms: u64,
    /// Fixed delay, or the first delay of an exponential backoff
    pub delay_ms: u64,
    pub backoff: String,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_duration_ms: 10_000,
            delay_ms: 250,
            backoff: BackoffKind::Fixed.to_string(),
            multiplier: 2.0,
            max_delay_ms: 2_000,
        }
    }
}

impl RetrySettings {
    pub fn backoff_kind(&self) -> Result<BackoffKind, ConfigError> {
        BackoffKind::from_str(&self.backoff).map_err(|_| {
            ConfigError::invalid(format!(
                "unknown backoff '{}' (expected fixed or exponential)",
                self.backoff
            ))
        })
    }

    /// Retry policy described by these settings
    ///
    /// Unvalidated settings with an unknown backoff fall back to a fixed delay.
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let backoff = match self.backoff_kind() {
            Ok(BackoffKind::Exponential) => Backoff::Exponential {
                initial: delay,
                multiplier: self.multiplier,
                max: Duration::from_millis(self.max_delay_ms),
            },
            Ok(BackoffKind::Fixed) | Err(_) => Backoff::Fixed(delay),
        };
        RetryPolicy::default()
            .with_max_duration(Duration::from_millis(self.max_duration_ms))
            .with_backoff(backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: String,
    /// `text`, `ext` or `json`
    pub format: String,
    pub file: Option<PathBuf>,
    pub color: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text.to_string(),
            file: None,
            color: true,
        }
    }
}

impl LoggingSettings {
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        LogFormat::from_str(&self.format).map_err(|_| {
            ConfigError::invalid(format!(
                "unknown log format '{}' (expected text, ext or json)",
                self.format
            ))
        })
    }
}

/// Complete configuration
///
/// # Example
///
/// ```rust
/// use mqverify::core::config::Settings;
///
/// let settings = Settings::from_toml_str("[queue]\nprefetch = 4\n").unwrap();
/// assert_eq!(settings.queue.prefetch, 4);
/// assert_eq!(settings.retry.delay_ms, 250);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub queue: QueueSettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Default configuration file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load settings
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when a file exists there; otherwise defaults are returned.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let config_path = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound {
                        message: path.display().to_string(),
                    });
                }
                Some(path.to_path_buf())
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => Some(path),
                _ => None,
            },
        };

        match config_path {
            Some(path) => {
                log::debug!("loading configuration from {}", path.display());
                let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                    message: format!("{}: {}", path.display(), e),
                })?;
                Self::from_toml_str(&contents)
            }
            None => {
                log::debug!("no configuration file found, using defaults");
                Ok(Settings::default())
            }
        }
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Settings, ConfigError> {
        let settings: Settings = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.queue.name {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("queue.name must not be empty"));
            }
        }
        if self.queue.prefetch == 0 {
            return Err(ConfigError::invalid("queue.prefetch must be greater than 0"));
        }
        if self.queue.publish_parallelism == 0 {
            return Err(ConfigError::invalid(
                "queue.publish_parallelism must be greater than 0",
            ));
        }
        if self.queue.dead_letter_after == Some(0) {
            return Err(ConfigError::invalid(
                "queue.dead_letter_after must be greater than 0",
            ));
        }
        if self.retry.delay_ms == 0 {
            return Err(ConfigError::invalid("retry.delay_ms must be greater than 0"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        self.retry.backoff_kind()?;
        self.logging.log_format()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.queue.prefetch, 16);
        assert_eq!(settings.queue.publish_parallelism, 4);
        assert_eq!(settings.queue.decode_failure_policy(), DecodeFailurePolicy::Requeue);
        assert_eq!(settings.retry.to_policy().max_duration(), Duration::from_secs(10));
        assert_eq!(settings.logging.log_format().unwrap(), LogFormat::Text);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_full_document() {
        let settings = Settings::from_toml_str(
            r#"
            [queue]
            name = "orders"
            prefetch = 8
            publish_parallelism = 2
            dead_letter_after = 5

            [retry]
            max_duration_ms = 20000
            delay_ms = 100
            backoff = "exponential"
            multiplier = 3.0
            max_delay_ms = 900

            [logging]
            level = "debug"
            format = "json"
            file = "mqverify.log"
            color = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.queue.name.as_deref(), Some("orders"));
        assert_eq!(
            settings.queue.decode_failure_policy(),
            DecodeFailurePolicy::DeadLetterAfter(5)
        );
        let policy = settings.retry.to_policy();
        assert_eq!(policy.max_duration(), Duration::from_secs(20));
        assert_eq!(policy.backoff().delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff().delay(2), Duration::from_millis(300));
        assert_eq!(policy.backoff().delay(3), Duration::from_millis(900));
        assert_eq!(settings.logging.log_format().unwrap(), LogFormat::Json);
        assert_eq!(settings.logging.file, Some(PathBuf::from("mqverify.log")));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (document, fragment) in [
            ("[queue]\nprefetch = 0", "prefetch"),
            ("[queue]\npublish_parallelism = 0", "publish_parallelism"),
            ("[queue]\nname = \" \"", "queue.name"),
            ("[queue]\ndead_letter_after = 0", "dead_letter_after"),
            ("[retry]\ndelay_ms = 0", "delay_ms"),
            ("[retry]\nmultiplier = 0.5", "multiplier"),
            ("[retry]\nbackoff = \"random\"", "random"),
            ("[logging]\nformat = \"xml\"", "xml"),
        ] {
            match Settings::from_toml_str(document) {
                Err(ConfigError::Invalid { message }) => {
                    assert!(message.contains(fragment), "{} -> {}", document, message)
                }
                other => panic!("{} should be invalid, got {:?}", document, other),
            }
        }
    }

    #[test]
    fn test_malformed_toml_and_unknown_keys() {
        assert!(matches!(
            Settings::from_toml_str("[queue\nprefetch = 1"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("[queue]\nprefech = 1"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\ndelay_ms = 10").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.retry.delay_ms, 10);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");

        let error = Settings::load(Some(&missing)).unwrap_err();
        assert!(matches!(error, ConfigError::NotFound { .. }));
        assert!(error.is_user_actionable());
        assert!(error.user_message().unwrap().contains("absent.toml"));
    }

    #[test]
    fn test_backoff_kind_is_case_insensitive() {
        let settings = RetrySettings {
            backoff: "Exponential".to_string(),
            ..RetrySettings::default()
        };
        assert_eq!(settings.backoff_kind().unwrap(), BackoffKind::Exponential);
    }
}
