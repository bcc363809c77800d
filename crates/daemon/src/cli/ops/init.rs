use std::net::SocketAddr;

use clap::Args;

use nfinite_daemon::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Address peers connect to (default: 0.0.0.0:8080)
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Seconds to wait on a holder for a shard
    #[arg(long, default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Fetch attempts per shard before a retrieval fails
    #[arg(long, default_value_t = 1)]
    pub fetch_attempts: usize,

    /// Refuse registrations whose password differs from the first one seen
    #[arg(long)]
    pub verify_passwords: bool,

    /// Write daily rotated logs into the config directory
    #[arg(long)]
    pub file_logging: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            listen_addr: self.addr,
            fetch_timeout_secs: self.fetch_timeout_secs,
            fetch_attempts: self.fetch_attempts,
            verify_passwords: self.verify_passwords,
            file_logging: self.file_logging,
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized nfinite directory at: {}\n\
             - Database: {}\n\
             - Config: {}\n\
             - Listen address: {}\n\
             - Fetch timeout: {}s, attempts: {}\n\
             - Password verification: {}",
            state.state_dir.display(),
            state.db_path.display(),
            state.config_path.display(),
            state.config.listen_addr,
            state.config.fetch_timeout_secs,
            state.config.fetch_attempts,
            if state.config.verify_passwords { "on" } else { "off" },
        );

        Ok(output)
    }
}
