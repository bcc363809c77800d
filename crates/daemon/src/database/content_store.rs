use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};
use time::OffsetDateTime;

use common::file::{ContentAddress, FileMeta, FileRef, ShardLocation, ShardMeta};
use common::identity::Identity;
use common::store::{ContentStore, ContentStoreError};

use crate::database::Database;

type StoreResult<T> = Result<T, ContentStoreError<sqlx::Error>>;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

impl Database {
    async fn file_id(&self, owner: &str, name: &str) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM files WHERE owner = ? AND name = ?
            "#,
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;

        Ok(row.map(|r| r.get("id")))
    }
}

/// Insert a file row and return its id
async fn insert_file_row(
    conn: &mut SqliteConnection,
    owner: &Identity,
    meta: &FileMeta,
) -> StoreResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO files (owner, name, last_modified)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(owner.username())
    .bind(&meta.name)
    .bind(meta.unix_seconds())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(ContentStoreError::DuplicateFile(FileRef::new(
            owner,
            meta.name.clone(),
        ))),
        Err(e) if is_foreign_key_violation(&e) => Err(ContentStoreError::UnknownIdentity(
            owner.username().to_string(),
        )),
        Err(e) => Err(ContentStoreError::Provider(e)),
    }
}

/// Insert a shard row and its holder row under an existing file
async fn insert_shard_row(
    conn: &mut SqliteConnection,
    file_id: i64,
    shard: &ShardMeta,
    holder: &Identity,
) -> StoreResult<()> {
    let holder_known = sqlx::query(
        r#"
        SELECT 1 FROM identities WHERE username = ?
        "#,
    )
    .bind(holder.username())
    .fetch_optional(&mut *conn)
    .await
    .map_err(ContentStoreError::Provider)?
    .is_some();
    if !holder_known {
        return Err(ContentStoreError::UnknownIdentity(
            holder.username().to_string(),
        ));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO shards (file_id, sequence_index, content_address)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(file_id)
    .bind(i64::from(shard.sequence_index))
    .bind(shard.content_address.as_str())
    .execute(&mut *conn)
    .await;
    let shard_id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) if is_unique_violation(&e) => {
            return Err(ContentStoreError::DuplicateShard(
                shard.parent.clone(),
                shard.sequence_index,
            ))
        }
        Err(e) => return Err(ContentStoreError::Provider(e)),
    };

    sqlx::query(
        r#"
        INSERT INTO shard_holders (shard_id, holder)
        VALUES (?, ?)
        "#,
    )
    .bind(shard_id)
    .bind(holder.username())
    .execute(&mut *conn)
    .await
    .map_err(ContentStoreError::Provider)?;
    Ok(())
}

fn sequence_index(row: &sqlx::sqlite::SqliteRow) -> StoreResult<u32> {
    let raw: i64 = row.get("sequence_index");
    u32::try_from(raw).map_err(|e| {
        ContentStoreError::Provider(sqlx::Error::ColumnDecode {
            index: "sequence_index".to_string(),
            source: Box::new(e),
        })
    })
}

#[async_trait]
impl ContentStore for Database {
    type Error = sqlx::Error;

    async fn upsert_identity(&self, identity: &Identity) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO identities (username, password_digest, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(identity.username())
        .bind(identity.password_digest())
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;
        Ok(())
    }

    async fn identity(&self, username: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query(
            r#"
            SELECT username, password_digest FROM identities WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;

        Ok(row.map(|r| {
            Identity::from_parts(
                r.get::<String, _>("username"),
                r.get::<String, _>("password_digest"),
            )
        }))
    }

    async fn file_exists(&self, owner: &Identity, name: &str) -> StoreResult<bool> {
        Ok(self.file_id(owner.username(), name).await?.is_some())
    }

    async fn insert_file_metadata(&self, owner: &Identity, meta: &FileMeta) -> StoreResult<()> {
        let mut conn = self.acquire().await.map_err(ContentStoreError::Provider)?;
        insert_file_row(&mut conn, owner, meta).await?;
        Ok(())
    }

    async fn file_metadata(&self, owner: &Identity, name: &str) -> StoreResult<Option<FileMeta>> {
        let row = sqlx::query(
            r#"
            SELECT name, last_modified FROM files WHERE owner = ? AND name = ?
            "#,
        )
        .bind(owner.username())
        .bind(name)
        .fetch_optional(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;

        Ok(row.map(|r| {
            FileMeta::from_unix_seconds(r.get::<String, _>("name"), r.get("last_modified"))
        }))
    }

    async fn files_for_owner(&self, owner: &Identity) -> StoreResult<Vec<FileMeta>> {
        let rows = sqlx::query(
            r#"
            SELECT name, last_modified FROM files
            WHERE owner = ?
            ORDER BY id ASC
            "#,
        )
        .bind(owner.username())
        .fetch_all(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;

        Ok(rows
            .iter()
            .map(|r| FileMeta::from_unix_seconds(r.get::<String, _>("name"), r.get("last_modified")))
            .collect())
    }

    async fn insert_shard_and_holder(&self, shard: &ShardMeta, holder: &Identity) -> StoreResult<()> {
        let mut tx = self.begin().await.map_err(ContentStoreError::Provider)?;

        let file_id: Option<i64> = sqlx::query(
            r#"
            SELECT id FROM files WHERE owner = ? AND name = ?
            "#,
        )
        .bind(&shard.parent.owner)
        .bind(&shard.parent.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ContentStoreError::Provider)?
        .map(|r| r.get("id"));
        let Some(file_id) = file_id else {
            return Err(ContentStoreError::UnknownFile(shard.parent.clone()));
        };

        insert_shard_row(&mut tx, file_id, shard, holder).await?;
        tx.commit().await.map_err(ContentStoreError::Provider)?;
        Ok(())
    }

    async fn delete_file(&self, owner: &Identity, name: &str) -> StoreResult<()> {
        // shards and holder rows go with it through ON DELETE CASCADE
        sqlx::query(
            r#"
            DELETE FROM files WHERE owner = ? AND name = ?
            "#,
        )
        .bind(owner.username())
        .bind(name)
        .execute(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;
        Ok(())
    }

    async fn insert_file_with_shards(
        &self,
        owner: &Identity,
        meta: &FileMeta,
        shards: &[(ShardMeta, Identity)],
    ) -> StoreResult<()> {
        // dropping the transaction on any error rolls everything back
        let mut tx = self.begin().await.map_err(ContentStoreError::Provider)?;
        let file_id = insert_file_row(&mut tx, owner, meta).await?;

        let parent = FileRef::new(owner, meta.name.clone());
        for (shard, holder) in shards {
            if shard.parent != parent {
                return Err(ContentStoreError::UnknownFile(shard.parent.clone()));
            }
            insert_shard_row(&mut tx, file_id, shard, holder).await?;
        }

        tx.commit().await.map_err(ContentStoreError::Provider)?;
        Ok(())
    }

    async fn holders_and_shards_for_file(
        &self,
        owner: &Identity,
        name: &str,
    ) -> StoreResult<Vec<ShardLocation>> {
        let rows = sqlx::query(
            r#"
            SELECT s.sequence_index, s.content_address, i.username, i.password_digest
            FROM shards s
            JOIN files f ON f.id = s.file_id
            JOIN shard_holders h ON h.shard_id = s.id
            JOIN identities i ON i.username = h.holder
            WHERE f.owner = ? AND f.name = ?
            ORDER BY s.sequence_index ASC, i.username ASC
            "#,
        )
        .bind(owner.username())
        .bind(name)
        .fetch_all(&**self)
        .await
        .map_err(ContentStoreError::Provider)?;

        let parent = FileRef::new(owner, name);
        let mut locations: Vec<ShardLocation> = Vec::new();
        for row in rows {
            let index = sequence_index(&row)?;
            let holder = Identity::from_parts(
                row.get::<String, _>("username"),
                row.get::<String, _>("password_digest"),
            );

            // rows arrive grouped by shard
            match locations.last_mut() {
                Some(last) if last.shard.sequence_index == index => last.holders.push(holder),
                _ => locations.push(ShardLocation {
                    shard: ShardMeta {
                        parent: parent.clone(),
                        sequence_index: index,
                        content_address: ContentAddress::from(
                            row.get::<String, _>("content_address"),
                        ),
                    },
                    holders: vec![holder],
                }),
            }
        }
        Ok(locations)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&**self)
            .await
            .map_err(ContentStoreError::Provider)?;
        Ok(())
    }
}
