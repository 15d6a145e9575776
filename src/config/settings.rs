use super::{default_state_root, ConfigError, StatePaths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_BASE_ENV: &str = "FLOWSMITH_API_BASE";
pub const API_TOKEN_ENV: &str = "FLOWSMITH_API_TOKEN";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub api_base: String,
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_duplicate_window_ms")]
    pub duplicate_window_ms: u64,
    #[serde(default = "default_planner_history_limit")]
    pub planner_history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duplicate_window_ms: default_duplicate_window_ms(),
            planner_history_limit: default_planner_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub initiation_url: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_oauth_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub treat_close_as_completion: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            initiation_url: None,
            allowed_origins: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_oauth_timeout_secs(),
            treat_close_as_completion: false,
        }
    }
}

impl OAuthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_duplicate_window_ms() -> u64 {
    3000
}

fn default_planner_history_limit() -> usize {
    40
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_oauth_timeout_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    60
}

impl Settings {
    pub fn for_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            state_root: None,
            session: SessionConfig::default(),
            oauth: OAuthConfig::default(),
            http: HttpConfig::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies environment overrides. Only `api_base` may come from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base) = std::env::var(API_BASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            self.api_base = base;
        }
        self
    }

    pub fn state_paths(&self) -> Result<StatePaths, ConfigError> {
        match self.state_root.as_ref() {
            Some(root) => Ok(StatePaths::new(root.clone())),
            None => Ok(StatePaths::new(default_state_root()?)),
        }
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.session.duplicate_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("api_base", &self.api_base)?;
        if let Some(url) = self.oauth.initiation_url.as_deref() {
            validate_http_url("oauth.initiation_url", url)?;
            if self.oauth.allowed_origins.is_empty() {
                return Err(ConfigError::Settings(
                    "oauth.allowed_origins must list at least one origin when oauth.initiation_url is set"
                        .to_string(),
                ));
            }
        }
        for origin in &self.oauth.allowed_origins {
            validate_http_url("oauth.allowed_origins entry", origin)?;
        }
        if self.oauth.poll_interval_ms == 0 {
            return Err(ConfigError::Settings(
                "oauth.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.session.planner_history_limit == 0 {
            return Err(ConfigError::Settings(
                "session.planner_history_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn api_token_from_env() -> Option<String> {
    std::env::var(API_TOKEN_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Settings(format!("{field} must be non-empty")));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Settings(format!(
            "{field} `{trimmed}` must be an http(s) url"
        )));
    }
    Ok(())
}
