use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Top-level runtime configuration, passed explicitly into the runner,
/// loader and context manager constructors. There is no process-wide
/// mutable configuration singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Maximum number of tasks allowed in the running state at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Sessions untouched for longer than this are treated as expired.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Maximum messages retained per session; oldest are evicted first.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Directories scanned for manifest-declared skills, in order.
    #[serde(default)]
    pub skill_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Workspace directory used as the default working dir for commands.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Backend selector: "file" or "memory".
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    /// Base directory for the file backend.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_session_timeout_secs() -> u64 {
    3600
}

fn default_max_messages() -> usize {
    100
}

fn default_shell_timeout_secs() -> u64 {
    60
}

fn default_max_output_chars() -> usize {
    10_000
}

fn default_memory_backend() -> String {
    "file".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            session_timeout_secs: default_session_timeout_secs(),
            max_messages: default_max_messages(),
            skill_dirs: Vec::new(),
            shell: ShellConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shell_timeout_secs(),
            max_output_chars: default_max_output_chars(),
            workspace: None,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            base_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file. Missing fields fall back to
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(crate::Error::Config(
                "concurrencyLimit must be at least 1".to_string(),
            ));
        }
        if self.max_messages == 0 {
            return Err(crate::Error::Config(
                "maxMessages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.session_timeout_secs, 3600);
        assert_eq!(config.max_messages, 100);
        assert_eq!(config.memory.backend, "file");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = RuntimeConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"concurrencyLimit": 2}"#).unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.max_messages, 100);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let mut config = RuntimeConfig::default();
        config.session_timeout_secs = 60;
        config.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.session_timeout_secs, 60);
    }
}
