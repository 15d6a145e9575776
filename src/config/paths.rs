use crate::config::ConfigError;
use std::path::{Path, PathBuf};

pub const GLOBAL_STATE_DIR: &str = ".flowsmith";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "config.yaml";
pub const CONFIG_PATH_ENV: &str = "FLOWSMITH_CONFIG";

pub fn default_state_root() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(GLOBAL_STATE_DIR))
}

pub fn default_global_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(default_state_root()?.join(GLOBAL_SETTINGS_FILE_NAME))
}

/// Layout of everything flowsmith writes under its state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.plans_dir(),
            self.conversations_dir(),
            self.root.join("logs"),
        ]
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("plans")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.root.join("conversations")
    }

    pub fn session_log_path(&self) -> PathBuf {
        crate::shared::logging::session_log_path(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), ConfigError> {
    for path in paths.required_directories() {
        std::fs::create_dir_all(&path).map_err(|source| ConfigError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
