pub mod error;
pub mod load;
pub mod paths;
pub mod save;
pub mod settings;

pub use error::ConfigError;
pub use load::load_global_settings;
pub use paths::{
    bootstrap_state_root, default_global_config_path, default_state_root, StatePaths,
    CONFIG_PATH_ENV, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR,
};
pub use save::{save_settings, save_settings_to};
pub use settings::{
    api_token_from_env, HttpConfig, OAuthConfig, SessionConfig, Settings, API_BASE_ENV,
    API_TOKEN_ENV,
};
