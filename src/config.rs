//! Reader configuration
//!
//! Loaded from TOML, then adjusted by environment overrides:
//! - `MARGINALIA_API_BASE`: backend base URL
//! - `MARGINALIA_LOG`: default log filter directive
//!
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MarginaliaError, Result};

pub const ENV_API_BASE: &str = "MARGINALIA_API_BASE";
pub const ENV_LOG: &str = "MARGINALIA_LOG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub notifications: NotificationConfig,
    pub overlay: OverlayConfig,
    pub logging: LoggingConfig,
}

/// REST backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Timeout for non-streaming requests (seconds)
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Generation streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Line prefix marking an event line
    pub marker: String,
    pub connect_timeout_secs: u64,
    pub generate_path: String,
    pub follow_up_path: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            marker: crate::stream::DEFAULT_MARKER.to_string(),
            connect_timeout_secs: 10,
            generate_path: "/api/v1/insights/generate".to_string(),
            follow_up_path: "/api/v1/insights/follow-up".to_string(),
        }
    }
}

/// Bounded reconnect policy for long-lived channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 8,
        }
    }
}

/// Analysis notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub path: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            path: "/api/v1/sse/analysis-notifications".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Show one indicator per sentence instead of wrapping spark text
    pub aggregate_sparks: bool,
    /// Pause between successive annotations when pacing (milliseconds)
    pub stagger_ms: u64,
    /// Paragraph size when re-rendering a backend sentence list
    pub backend_sentences_per_paragraph: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            aggregate_sparks: false,
            stagger_ms: 0,
            backend_sentences_per_paragraph: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl ReaderConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ReaderConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MARGINALIA_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = base.trim().to_string();
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.logging.filter = filter.trim().to_string();
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            return Err(MarginaliaError::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.api.base_url
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(MarginaliaError::Config(
                "api.timeout_secs must be positive".to_string(),
            ));
        }
        if self.stream.marker.is_empty() {
            return Err(MarginaliaError::Config(
                "stream.marker must not be empty".to_string(),
            ));
        }

        let reconnect = &self.notifications.reconnect;
        if reconnect.max_attempts == 0 {
            return Err(MarginaliaError::Config(
                "notifications.reconnect.max_attempts must be at least 1".to_string(),
            ));
        }
        if reconnect.initial_delay_ms == 0 || reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(MarginaliaError::Config(
                "notifications.reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms"
                    .to_string(),
            ));
        }

        if self.overlay.backend_sentences_per_paragraph == 0 {
            return Err(MarginaliaError::Config(
                "overlay.backend_sentences_per_paragraph must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ReaderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ReaderConfig::from_toml("").unwrap();
        assert_eq!(config, ReaderConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = ReaderConfig::from_toml(
            r#"
            [overlay]
            aggregate_sparks = true

            [notifications.reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert!(config.overlay.aggregate_sparks);
        assert_eq!(config.overlay.backend_sentences_per_paragraph, 10);
        assert_eq!(config.notifications.reconnect.max_attempts, 3);
        assert_eq!(config.notifications.reconnect.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            ReaderConfig::from_toml("[api]\nbase_url = \"localhost\""),
            Err(MarginaliaError::Config(_))
        ));
        assert!(matches!(
            ReaderConfig::from_toml("[notifications.reconnect]\nmax_attempts = 0"),
            Err(MarginaliaError::Config(_))
        ));
        assert!(matches!(
            ReaderConfig::from_toml("[overlay]\naggregate_sparks = \"yes\""),
            Err(MarginaliaError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nbase_url = \"https://reader.example\"").unwrap();
        let config = ReaderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api.base_url, "https://reader.example");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE, " https://api.example "),
            (ENV_LOG, "marginalia_core=debug"),
        ]);
        let mut config = ReaderConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api.base_url, "https://api.example");
        assert_eq!(config.logging.filter, "marginalia_core=debug");
    }
}
