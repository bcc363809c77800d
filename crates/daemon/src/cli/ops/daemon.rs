use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use nfinite_daemon::state::{AppState, StateError};
use nfinite_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Address to listen on (default from config, else 0.0.0.0:8080)
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// SQLite database to use instead of the one in the config directory
    #[arg(long)]
    pub sqlite_path: Option<PathBuf>,

    /// Seconds to wait on a holder for a shard
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    /// Fetch attempts per shard before a retrieval fails
    #[arg(long)]
    pub fetch_attempts: Option<usize>,

    /// Refuse registrations whose password differs from the first one seen
    #[arg(long)]
    pub verify_passwords: bool,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Default level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
}

impl Daemon {
    /// Config directory values, then flags on top. Without an initialized
    ///  directory the daemon runs on defaults and an in-memory database.
    fn service_config(&self, state: Option<&AppState>) -> ServiceConfig {
        let mut config = match state {
            Some(state) => {
                let mut config = ServiceConfig::from(&state.config);
                config.sqlite_path = Some(state.db_path.clone());
                if state.config.file_logging {
                    config.log_dir = Some(state.log_dir.clone());
                }
                config
            }
            None => ServiceConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.listen_addr = addr;
        }
        if let Some(path) = &self.sqlite_path {
            config.sqlite_path = Some(path.clone());
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.fetch_attempts {
            config.fetch_attempts = attempts;
        }
        if self.verify_passwords {
            config.verify_passwords = true;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        config.log_level = self.log_level;
        config
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = if AppState::exists(ctx.config_path.clone())? {
            Some(AppState::load(ctx.config_path.clone())?)
        } else {
            None
        };

        let config = self.service_config(state.as_ref());
        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfinite_daemon::state::AppConfig;

    fn flags() -> Daemon {
        Daemon {
            addr: None,
            sqlite_path: None,
            fetch_timeout_secs: None,
            fetch_attempts: None,
            verify_passwords: false,
            log_dir: None,
            log_level: tracing::Level::INFO,
        }
    }

    #[test]
    fn test_no_state_runs_in_memory() {
        let config = flags().service_config(None);
        assert!(config.sqlite_path.is_none());
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let state = AppState::init(
            Some(tmp.path().join("nf")),
            Some(AppConfig {
                fetch_attempts: 4,
                file_logging: true,
                ..Default::default()
            }),
        )
        .unwrap();

        let mut daemon = flags();
        daemon.addr = Some("127.0.0.1:9999".parse().unwrap());
        daemon.fetch_timeout_secs = Some(3);

        let config = daemon.service_config(Some(&state));
        assert_eq!(config.listen_addr.port(), 9999);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.fetch_attempts, 4);
        assert_eq!(config.sqlite_path, Some(state.db_path.clone()));
        assert_eq!(config.log_dir, Some(state.log_dir.clone()));
    }
}
