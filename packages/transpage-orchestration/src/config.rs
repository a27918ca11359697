//! Orchestrator configuration
//!
//! Loaded from a versioned YAML file, then overridden from `TRANSPAGE_*`
//! environment variables, then validated.
//!
//! ```yaml
//! version: 1
//! default_source_language: en
//! system_editor: FuzzyBot
//! replication_timeout_ms: 10000
//! max_job_attempts: 3
//! workflow_states: [progress, proofreading, ready]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use transpage_storage::LanguageCode;

use crate::error::{OrchestratorError, Result};

pub const SUPPORTED_VERSION: u32 = 1;

/// YAML schema v1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,

    /// Source language of pages that do not declare one
    #[serde(default = "defaults::source_language")]
    pub default_source_language: String,

    /// Account name used for automatic edits
    #[serde(default = "defaults::system_editor")]
    pub system_editor: String,

    #[serde(default = "defaults::replication_timeout_ms")]
    pub replication_timeout_ms: u64,

    /// Edit summary of translation page renders
    #[serde(default = "defaults::render_summary")]
    pub render_summary: String,

    /// Including the first attempt
    #[serde(default = "defaults::max_job_attempts")]
    pub max_job_attempts: u32,

    #[serde(default = "defaults::worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// SQLite file shared by every store and the job queue; in-memory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// Workflow state names of the workflow states group
    #[serde(default)]
    pub workflow_states: Vec<String>,
}

mod defaults {
    pub fn source_language() -> String {
        "en".to_string()
    }

    pub fn system_editor() -> String {
        "FuzzyBot".to_string()
    }

    pub fn replication_timeout_ms() -> u64 {
        10_000
    }

    pub fn render_summary() -> String {
        "Updating to match new version of source page".to_string()
    }

    pub fn max_job_attempts() -> u32 {
        3
    }

    pub fn worker_poll_interval_ms() -> u64 {
        250
    }

    pub fn workers() -> usize {
        (num_cpus::get() / 2).max(1)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            default_source_language: defaults::source_language(),
            system_editor: defaults::system_editor(),
            replication_timeout_ms: defaults::replication_timeout_ms(),
            render_summary: defaults::render_summary(),
            max_job_attempts: defaults::max_job_attempts(),
            worker_poll_interval_ms: defaults::worker_poll_interval_ms(),
            workers: defaults::workers(),
            db_path: None,
            workflow_states: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_yaml(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;

        if config.version != SUPPORTED_VERSION {
            return Err(OrchestratorError::config(format!(
                "Unsupported config version {} (supported: {})",
                config.version, SUPPORTED_VERSION
            )));
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `TRANSPAGE_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRANSPAGE_DEFAULT_SOURCE_LANGUAGE") {
            self.default_source_language = v;
        }
        if let Some(v) = lookup("TRANSPAGE_SYSTEM_EDITOR") {
            self.system_editor = v;
        }
        if let Some(v) = lookup("TRANSPAGE_REPLICATION_TIMEOUT_MS") {
            self.replication_timeout_ms = parse_env("TRANSPAGE_REPLICATION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TRANSPAGE_MAX_JOB_ATTEMPTS") {
            self.max_job_attempts = parse_env("TRANSPAGE_MAX_JOB_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("TRANSPAGE_WORKER_POLL_INTERVAL_MS") {
            self.worker_poll_interval_ms = parse_env("TRANSPAGE_WORKER_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("TRANSPAGE_WORKERS") {
            self.workers = parse_env("TRANSPAGE_WORKERS", &v)?;
        }
        if let Some(v) = lookup("TRANSPAGE_DB") {
            self.db_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        LanguageCode::new(self.default_source_language.as_str()).map_err(|e| {
            OrchestratorError::config(format!("default_source_language: {}", e.message))
        })?;

        if self.system_editor.trim().is_empty() {
            return Err(OrchestratorError::config("system_editor must not be empty"));
        }
        if self.max_job_attempts == 0 || self.max_job_attempts > 10 {
            return Err(OrchestratorError::config(format!(
                "max_job_attempts must be in 1..=10, got {}",
                self.max_job_attempts
            )));
        }
        if self.workers == 0 {
            return Err(OrchestratorError::config("workers must be at least 1"));
        }
        if self.worker_poll_interval_ms == 0 {
            return Err(OrchestratorError::config(
                "worker_poll_interval_ms must be positive",
            ));
        }
        if let Some(state) = self
            .workflow_states
            .iter()
            .find(|s| s.is_empty() || s.contains('/'))
        {
            return Err(OrchestratorError::config(format!(
                "Invalid workflow state name: {:?}",
                state
            )));
        }
        Ok(())
    }

    pub fn source_language(&self) -> Result<LanguageCode> {
        Ok(LanguageCode::new(self.default_source_language.as_str())?)
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| OrchestratorError::config(format!("{}={:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_yaml_roundtrip() {
        let config = OrchestratorConfig {
            workflow_states: vec!["progress".to_string(), "ready".to_string()],
            ..Default::default()
        };

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert_eq!(OrchestratorConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_yaml_loading_fills_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"version: 1\nsystem_editor: TranslateBot\n")
            .unwrap();

        let config = OrchestratorConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.system_editor, "TranslateBot");
        assert_eq!(config.default_source_language, "en");
        assert_eq!(config.replication_timeout_ms, 10_000);
        assert_eq!(config.max_job_attempts, 3);
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = OrchestratorConfig::from_yaml_str("version: 2\n");
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_yaml_missing_version() {
        assert!(OrchestratorConfig::from_yaml_str("workers: 2\n").is_err());
    }

    #[test]
    fn test_yaml_unknown_field() {
        assert!(OrchestratorConfig::from_yaml_str("version: 1\nbogus: true\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TRANSPAGE_MAX_JOB_ATTEMPTS", "5"),
            ("TRANSPAGE_DEFAULT_SOURCE_LANGUAGE", "fi"),
            ("TRANSPAGE_DB", "/var/lib/transpage/transpage.db"),
        ]
        .into_iter()
        .collect();

        let mut config = OrchestratorConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_job_attempts, 5);
        assert_eq!(config.default_source_language, "fi");
        assert_eq!(
            config.db_path,
            Some(PathBuf::from("/var/lib/transpage/transpage.db"))
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = OrchestratorConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "TRANSPAGE_WORKERS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_language = OrchestratorConfig {
            default_source_language: "English".to_string(),
            ..Default::default()
        };
        assert!(bad_language.validate().is_err());

        let zero_attempts = OrchestratorConfig {
            max_job_attempts: 0,
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        let bad_state = OrchestratorConfig {
            workflow_states: vec!["a/b".to_string()],
            ..Default::default()
        };
        assert!(bad_state.validate().is_err());

        assert!(OrchestratorConfig::default().validate().is_ok());
    }
}
