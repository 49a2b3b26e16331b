//! Orchestrator configuration
//!
//! Reads and writes `.ve/orchestrator.yaml`. A missing file means defaults.

use crate::oracle::OracleConfig;
use crate::utils::config_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write config file {path:?}: {message}")]
    Write { path: PathBuf, message: String },
}

/// What to do when the oracle cannot decide whether two chunks conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskOperatorPolicy {
    /// Park the candidate in NEEDS_ATTENTION with the oracle's reason
    Attention,
    /// Dispatch anyway
    Proceed,
}

/// External agent executable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_agents: usize,
    pub dispatch_interval_secs: u64,
    /// Branch chunks are cut from and merged into. Defaults to the current branch.
    pub base_branch: Option<String>,
    pub conflict_checks: bool,
    pub ask_operator_policy: AskOperatorPolicy,
    pub delete_branch_after_merge: bool,
    pub stop_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    /// Dashboard TCP port. Ephemeral when unset.
    pub port: Option<u16>,
    pub agent: AgentConfig,
    pub oracle: OracleConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: 2,
            dispatch_interval_secs: 2,
            base_branch: None,
            conflict_checks: true,
            ask_operator_policy: AskOperatorPolicy::Attention,
            delete_branch_after_merge: true,
            stop_timeout_secs: 10,
            startup_timeout_secs: 10,
            port: None,
            agent: AgentConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

/// Configuration file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(project_path: &Path) -> Self {
        Self {
            config_path: config_path(project_path),
        }
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read config from file, returning defaults if not found
    pub fn read(&self) -> Result<OrchestratorConfig, ConfigError> {
        if !self.config_path.exists() {
            return Ok(OrchestratorConfig::default());
        }

        let content =
            std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
                path: self.config_path.clone(),
                source,
            })?;

        // An empty file deserializes to null, not to an empty mapping
        if content.trim().is_empty() {
            return Ok(OrchestratorConfig::default());
        }

        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.config_path.clone(),
            source,
        })
    }

    pub fn write(&self, config: &OrchestratorConfig) -> Result<(), ConfigError> {
        let write_err = |message: String| ConfigError::Write {
            path: self.config_path.clone(),
            message,
        };

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }

        let content = serde_yaml::to_string(config).map_err(|e| write_err(e.to_string()))?;
        std::fs::write(&self.config_path, content).map_err(|e| write_err(e.to_string()))
    }

    /// Write defaults if no config exists yet
    pub fn initialize(&self) -> Result<OrchestratorConfig, ConfigError> {
        if self.exists() {
            return self.read();
        }

        let config = OrchestratorConfig::default();
        self.write(&config)?;
        Ok(config)
    }

    pub fn update<F>(&self, updater: F) -> Result<OrchestratorConfig, ConfigError>
    where
        F: FnOnce(&mut OrchestratorConfig),
    {
        let mut config = self.read()?;
        updater(&mut config);
        self.write(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        assert!(!manager.exists());

        let config = manager.read().unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.max_agents, 2);
        assert_eq!(config.ask_operator_policy, AskOperatorPolicy::Attention);
        assert!(config.port.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(
            manager.path(),
            "max_agents: 5\nask_operator_policy: proceed\nagent:\n  command: my-agent\noracle:\n  serialize_file_threshold: 4\n",
        )
        .unwrap();

        let config = manager.read().unwrap();
        assert_eq!(config.max_agents, 5);
        assert_eq!(config.ask_operator_policy, AskOperatorPolicy::Proceed);
        assert_eq!(config.agent.command, "my-agent");
        assert!(config.agent.args.is_empty());
        assert_eq!(config.oracle.serialize_file_threshold, 4);
        assert_eq!(config.oracle.min_token_chars, 4);
        assert_eq!(config.dispatch_interval_secs, 2);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(manager.path(), "\n").unwrap();
        assert_eq!(manager.read().unwrap(), OrchestratorConfig::default());
    }

    #[test]
    fn test_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(manager.path(), "max_agents: lots\n").unwrap();
        assert!(matches!(manager.read(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_initialize_and_update() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        manager.initialize().unwrap();
        assert!(manager.exists());

        let updated = manager
            .update(|c| {
                c.base_branch = Some("develop".to_string());
                c.port = Some(8123);
            })
            .unwrap();
        assert_eq!(updated.base_branch.as_deref(), Some("develop"));

        let reread = manager.read().unwrap();
        assert_eq!(reread, updated);
        // initialize keeps an existing file
        assert_eq!(manager.initialize().unwrap(), updated);
    }
}
