use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ConfigError;

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_python_path() -> PathBuf {
    PathBuf::from("python3")
}

/// Configuration for the Xiaomi heater integration
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Device IP address or hostname
    pub host: String,

    /// Display name of the climate entity
    pub name: String,

    /// 32 character miIO token
    pub token: String,

    /// Seconds between state refreshes
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Python interpreter with python-miio installed
    #[serde(default = "default_python_path")]
    pub python_path: PathBuf,
}

impl Config {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// First characters of the token, enough to tell tokens apart in logs
    pub fn token_hint(&self) -> String {
        self.token.chars().take(5).collect()
    }

    pub(crate) fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        let required = [
            ("host", &self.host),
            ("name", &self.name),
            ("token", &self.token),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation {
                    field_path: format!("{}.{}", prefix, field),
                    message: "must not be empty".to_string(),
                });
            }
        }

        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field_path: format!("{}.scan_interval_secs", prefix),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("token", &format_args!("{}...", self.token_hint()))
            .field("scan_interval_secs", &self.scan_interval_secs)
            .field("python_path", &self.python_path)
            .finish()
    }
}
