//! Configuration file
//!
//! ```json
//! {
//!   "state_file": "./state/routing.json",
//!   "account_pool_limit": 1000,
//!   "log_level": "INFO",
//!   "retry": { "max_attempts": 3, "base_delay_ms": 50, "max_delay_ms": 1000 }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::observability::Severity;
use crate::routing::RetryPolicy;

use super::errors::{CliError, CliResult};

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Routing state file (required)
    pub state_file: String,

    /// Account-wide concurrency pool (optional, default 1000)
    #[serde(default = "default_account_pool_limit")]
    pub account_pool_limit: u32,

    /// Minimum log severity (optional, default "INFO")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Backoff used when an `invoke` request is throttled
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_account_pool_limit() -> u32 {
    1000
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse and validate configuration JSON
    pub fn parse(content: &str) -> CliResult<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.state_file.trim().is_empty() {
            return Err(CliError::config_error("state_file must not be empty"));
        }

        if self.account_pool_limit == 0 {
            return Err(CliError::config_error("account_pool_limit must be > 0"));
        }

        self.severity()?;

        self.retry
            .validate()
            .map_err(|e| CliError::config_error(e.to_string()))?;

        Ok(())
    }

    /// Parsed `log_level`
    pub fn severity(&self) -> CliResult<Severity> {
        self.log_level.parse().map_err(CliError::config_error)
    }

    pub fn state_path(&self) -> &Path {
        Path::new(&self.state_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse(r#"{"state_file": "routing.json"}"#).unwrap();
        assert_eq!(config.account_pool_limit, 1000);
        assert_eq!(config.severity().unwrap(), Severity::Info);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_missing_state_file() {
        assert!(Config::parse(r#"{"account_pool_limit": 10}"#).is_err());
    }

    #[test]
    fn test_zero_pool_rejected() {
        assert!(Config::parse(r#"{"state_file": "s.json", "account_pool_limit": 0}"#).is_err());
    }

    #[test]
    fn test_bad_log_level() {
        assert!(Config::parse(r#"{"state_file": "s.json", "log_level": "LOUD"}"#).is_err());
    }

    #[test]
    fn test_bad_retry() {
        let err = Config::parse(r#"{"state_file": "s.json", "retry": {"max_attempts": 0}}"#)
            .unwrap_err();
        assert!(err.message().contains("max_attempts"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("canary.json");
        fs::write(&path, r#"{"state_file": "x.json", "log_level": "warn"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.severity().unwrap(), Severity::Warn);
        assert_eq!(config.state_path(), Path::new("x.json"));
    }
}
