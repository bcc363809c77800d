use std::net::SocketAddr;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "nfinite";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Address the websocket and status server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Seconds to wait for a holder to answer a shard fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Fetch attempts per shard before a retrieval fails
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: usize,
    /// Reject registrations whose password digest differs from the stored one
    #[serde(default)]
    pub verify_passwords: bool,
    /// Also write daily rotated logs under the state directory
    #[serde(default)]
    pub file_logging: bool,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_fetch_timeout_secs() -> u64 {
    common::retrieval::DEFAULT_FETCH_TIMEOUT.as_secs()
}

fn default_fetch_attempts() -> usize {
    common::retrieval::DEFAULT_FETCH_ATTEMPTS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_attempts: default_fetch_attempts(),
            verify_passwords: false,
            file_logging: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.nfinite)
    pub state_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Where rotated log files go when file logging is on
    pub log_dir: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.nfinite)
    pub fn state_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn exists(custom_path: Option<PathBuf>) -> Result<bool, StateError> {
        Ok(Self::state_dir(custom_path)?.exists())
    }

    /// Initialize a new state directory with a config file and an empty database
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;
        if state_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&state_dir)?;

        let config = config.unwrap_or_default();
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        // migrations run when the daemon first opens it
        let db_path = state_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        let log_dir = state_dir.join(LOG_DIR_NAME);
        fs::create_dir_all(&log_dir)?;

        Ok(Self {
            state_dir,
            db_path,
            config_path,
            log_dir,
            config,
        })
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;
        if !state_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = state_dir.join(DB_FILE_NAME);
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        Ok(Self {
            log_dir: state_dir.join(LOG_DIR_NAME),
            state_dir,
            db_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("nfinite directory not initialized. Run 'nfinite init' first")]
    NotInitialized,

    #[error("nfinite directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),
}
