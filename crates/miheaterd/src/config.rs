//! Configuration file parsing and structures.
//!
//! miheaterd reads a single TOML file. Native integrations are statically typed sections
//! under `[integrations]`; each one is validated here before any integration code runs.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use crate::integrations::miheater::MiHeaterConfig;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"miheaterd::integrations" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    /// Xiaomi Wi-Fi heater
    #[serde(default)]
    pub miheater: Option<MiHeaterConfig>,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field contents that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(heater) = &self.integrations.miheater {
            heater.validate("integrations.miheater")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field_path}: {message}")]
    Validation { field_path: String, message: String },
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    const HEATER: &str = r#"
        [integrations.miheater]
        host = "192.168.1.20"
        name = "Bedroom heater"
        token = "0123456789abcdef0123456789abcdef"
    "#;

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.logging.overrides.is_empty());
        assert!(config.integrations.miheater.is_none());
    }

    #[test]
    fn test_parse_heater_with_defaults() {
        let config = Config::parse(HEATER).unwrap();

        let heater = config.integrations.miheater.as_ref().unwrap();
        assert_eq!(heater.host, "192.168.1.20");
        assert_eq!(heater.name, "Bedroom heater");
        assert_eq!(heater.token, "0123456789abcdef0123456789abcdef");
        assert_eq!(heater.scan_interval(), Duration::from_secs(30));
        assert_eq!(heater.python_path, PathBuf::from("python3"));
    }

    #[test]
    fn test_parse_logging_overrides() {
        let toml = r#"
            [logging]
            level = "warn"

            [logging.overrides]
            "miheaterd::integrations" = "debug"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(
            config.logging.overrides.get("miheaterd::integrations"),
            Some(&LogLevel::Debug)
        );
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let toml = r#"
            [integrations.miheater]
            host = "192.168.1.20"
            name = "Bedroom heater"
        "#;

        let err = Config::parse(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn test_unknown_heater_key_is_rejected() {
        let toml = format!("{}\nmodel = \"zhimi.heater.za1\"\n", HEATER);

        let err = Config::parse(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let toml = r#"
            [integrations.miheater]
            host = ""
            name = "Bedroom heater"
            token = "0123456789abcdef0123456789abcdef"
        "#;

        let err = Config::parse(toml).unwrap_err();
        insta::assert_snapshot!(err, @"Invalid value for integrations.miheater.host: must not be empty");
    }

    #[test]
    fn test_zero_scan_interval_is_rejected() {
        let toml = format!("{}\nscan_interval_secs = 0\n", HEATER);

        let err = Config::parse(&toml).unwrap_err();
        match err {
            ConfigError::Validation { field_path, .. } => {
                assert_eq!(field_path, "integrations.miheater.scan_interval_secs");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", HEATER).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.integrations.miheater.is_some());
    }

    #[test]
    fn test_missing_file_error() {
        let err = Config::from_file("/nonexistent/miheaterd.toml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Failed to read"));
        assert!(msg.contains("/nonexistent/miheaterd.toml"));
    }
}
