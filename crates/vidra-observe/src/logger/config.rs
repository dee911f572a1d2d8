use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::logger::{error::LoggerError, format::LoggerFormat, level::LoggerLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: LoggerLevel,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: LoggerLevel::default(),
            with_targets: true,
            use_color: cfg!(test) || std::io::stdout().is_terminal(),
        }
    }
}

impl LoggerConfig {
    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LoggerLevel) -> Self {
        self.level = level;
        self
    }

    /// Read `<PREFIX>_LOG` (level) and `<PREFIX>_LOG_FORMAT` from the environment.
    pub fn from_env(prefix: &str) -> Result<Self, LoggerError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like [`LoggerConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, LoggerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(level) = lookup(&format!("{prefix}_LOG")) {
            cfg.level = level.parse()?;
        }
        if let Some(format) = lookup(&format!("{prefix}_LOG_FORMAT")) {
            cfg.format = format.parse()?;
        }
        Ok(cfg)
    }
}
