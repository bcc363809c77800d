use url::Url;

use common::peer::PeerService;

use crate::database::{Database, DatabaseSetupError};
use crate::service_config::Config;

/// Everything request handlers and websocket sessions share
#[derive(Clone, Debug)]
pub struct State {
    database: Database,
    peer: PeerService<Database>,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        let sqlite_database_url = match config.sqlite_path {
            Some(ref path) => {
                let path = std::path::absolute(path)
                    .map_err(|_| StateSetupError::InvalidDatabaseUrl)?;
                // the file itself is created on first connect
                let parent_exists = path.parent().map(|p| p.exists()).unwrap_or(false);
                if !parent_exists {
                    return Err(StateSetupError::DatabasePathDoesNotExist);
                }
                Url::parse(&format!("sqlite://{}", path.display()))
                    .map_err(|_| StateSetupError::InvalidDatabaseUrl)
            }
            // otherwise just set up an in-memory database
            None => Url::parse("sqlite::memory:").map_err(|_| StateSetupError::InvalidDatabaseUrl),
        }?;
        tracing::info!("Database URL: {}", sqlite_database_url);
        let database = Database::connect(&sqlite_database_url).await?;

        Ok(Self::from_database(database, config))
    }

    pub fn from_database(database: Database, config: &Config) -> Self {
        let peer_config = config.peer_service_config();
        tracing::debug!(?peer_config, "peer service configured");
        let peer = PeerService::new(database.clone(), peer_config);
        Self { database, peer }
    }

    pub fn peer(&self) -> &PeerService<Database> {
        &self.peer
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

impl AsRef<Database> for State {
    fn as_ref(&self) -> &Database {
        self.database()
    }
}

impl axum::extract::FromRef<State> for Database {
    fn from_ref(state: &State) -> Self {
        state.database.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Database directory does not exist")]
    DatabasePathDoesNotExist,
    #[error("Database setup error: {0}")]
    DatabaseSetupError(#[from] DatabaseSetupError),
    #[error("Invalid database URL")]
    InvalidDatabaseUrl,
}
