//! Process-level configuration

use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,
    /// Environment (dev, prod, etc.)
    pub environment: String,
    /// Tracing output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "agent-consensus".to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from `APP_NAME`, `APP_ENV` and `LOG_FORMAT`, keeping defaults for unset keys
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => defaults.log_format,
        };

        Ok(Self {
            app_name: lookup("APP_NAME").unwrap_or(defaults.app_name),
            environment: lookup("APP_ENV").unwrap_or(defaults.environment),
            log_format,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
            || self.environment.eq_ignore_ascii_case("prod")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [("APP_ENV", "prod"), ("LOG_FORMAT", "json")]
            .into_iter()
            .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.app_name, "agent-consensus");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.is_production());
    }

    #[test]
    fn test_bad_log_format() {
        let result = Config::from_lookup(|k| (k == "LOG_FORMAT").then(|| "yaml".to_string()));
        assert!(result.is_err());
    }
}
