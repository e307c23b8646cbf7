use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, migrate::Migrator};

use crate::storage::{KeyValueStore, Scan, StoreError};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed store.
/// Keeps every pair in a single `kv` table keyed by a BLOB, so range scans
/// follow plain byte order.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens or creates a database at the given path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, StoreError> {
        // every connection to `:memory:` is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn scan(&self, scan: Scan<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut query_builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT key, value FROM kv WHERE key >= ");
        query_builder.push_bind(scan.start);

        if let Some(end) = scan.end {
            query_builder.push(" AND key < ");
            query_builder.push_bind(end);
        }

        query_builder.push(if scan.reverse {
            " ORDER BY key DESC"
        } else {
            " ORDER BY key ASC"
        });

        if let Some(limit) = scan.limit {
            query_builder.push(" LIMIT ");
            query_builder.push_bind(limit as i64);
        }

        let rows = query_builder
            .build_query_as::<(Vec<u8>, Vec<u8>)>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn backup(&self, destination: &Path) -> Result<(), StoreError> {
        // VACUUM INTO reads one consistent snapshot; writers on other
        // connections keep going against the WAL.
        sqlx::query("VACUUM INTO ?")
            .bind(destination.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn backup_extension(&self) -> &'static str {
        "db"
    }
}
