use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use common::peer::PeerServiceConfig;
use common::retrieval::RetrievalConfig;

use crate::state::AppConfig;

#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// address the websocket endpoint and status routes listen on
    pub listen_addr: SocketAddr,

    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,

    // retrieval
    /// how long a single shard fetch may take
    pub fetch_timeout: Duration,
    /// fetches per shard before a retrieval fails
    pub fetch_attempts: usize,

    // registration
    pub verify_passwords: bool,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Settings the peer service runs with
    pub fn peer_service_config(&self) -> PeerServiceConfig {
        PeerServiceConfig {
            retrieval: RetrievalConfig {
                fetch_timeout: self.fetch_timeout,
                fetch_attempts: self.fetch_attempts.max(1),
            },
            verify_passwords: self.verify_passwords,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for Config {
    fn from(app: &AppConfig) -> Self {
        Self {
            listen_addr: app.listen_addr,
            sqlite_path: None,
            fetch_timeout: Duration::from_secs(app.fetch_timeout_secs),
            fetch_attempts: app.fetch_attempts,
            verify_passwords: app.verify_passwords,
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }
}
