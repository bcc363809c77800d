mod content_store;
mod sqlite;

use std::ops::Deref;

use sqlx::SqlitePool;

/// Shared pool behind the daemon's `ContentStore`
#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    pub async fn connect(database_url: &url::Url) -> Result<Self, DatabaseSetupError> {
        if database_url.scheme() != "sqlite" {
            return Err(DatabaseSetupError::UnknownDbType(
                database_url.scheme().to_string(),
            ));
        }

        let db = if sqlite::is_memory_url(database_url) {
            sqlite::connect_memory().await?
        } else {
            sqlite::connect_sqlite(database_url).await?
        };
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    /// A private, migrated database that lives as long as the pool
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let db = sqlite::connect_memory().await?;
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(sqlx::Error),

    #[error("requested database type was not recognized: {0}")]
    UnknownDbType(String),
}
