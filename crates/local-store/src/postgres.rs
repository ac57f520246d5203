use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{LocalStore, Result, Revision, SaveOptions, StoreError, StoredRecord};

/// PostgreSQL-backed local store.
#[derive(Clone)]
pub struct PostgresLocalStore {
    pool: PgPool,
}

impl PostgresLocalStore {
    /// Creates a new PostgreSQL local store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` with a small pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("local store migrations applied");
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<StoredRecord> {
        Ok(StoredRecord {
            namespace: row.try_get("namespace")?,
            key: row.try_get("key")?,
            owner: row.try_get("owner")?,
            revision: Revision::new(row.try_get("revision")?),
            updated_at: row.try_get("updated_at")?,
            payload: row.try_get("payload")?,
        })
    }

    fn conflict(namespace: &str, key: &str, expected: Revision, actual: Revision) -> StoreError {
        StoreError::conflict("postgres", namespace, key, expected, actual)
    }
}

#[async_trait]
impl LocalStore for PostgresLocalStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        owner: Option<&str>,
        payload: serde_json::Value,
        options: SaveOptions,
    ) -> Result<Revision> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT revision FROM local_records WHERE namespace = $1 AND key = $2 FOR UPDATE",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
        let current = Revision::new(current.unwrap_or(0));

        if let Some(expected) = options.expected_revision
            && current != expected
        {
            return Err(Self::conflict(namespace, key, expected, current));
        }

        let revision = current.next();
        if current == Revision::initial() {
            // A concurrent first write shows up as a primary key violation.
            sqlx::query(
                r#"
                INSERT INTO local_records (namespace, key, owner, revision, payload, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(namespace)
            .bind(key)
            .bind(owner)
            .bind(revision.as_i64())
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("local_records_pkey")
                {
                    return Self::conflict(
                        namespace,
                        key,
                        options.expected_revision.unwrap_or(current),
                        revision,
                    );
                }
                StoreError::Database(e)
            })?;
        } else {
            sqlx::query(
                r#"
                UPDATE local_records
                SET owner = $3, revision = $4, payload = $5, updated_at = NOW()
                WHERE namespace = $1 AND key = $2
                "#,
            )
            .bind(namespace)
            .bind(key)
            .bind(owner)
            .bind(revision.as_i64())
            .bind(&payload)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(revision)
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT namespace, key, owner, revision, payload, updated_at
            FROM local_records
            WHERE namespace = $1 AND key = $2
            "#,
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list_by_owner(&self, namespace: &str, owner: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT namespace, key, owner, revision, payload, updated_at
            FROM local_records
            WHERE namespace = $1 AND owner = $2
            ORDER BY updated_at ASC, key ASC
            "#,
        )
        .bind(namespace)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM local_records WHERE namespace = $1 AND key = $2")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owner(&self, namespace: &str, owner: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM local_records WHERE namespace = $1 AND owner = $2")
            .bind(namespace)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
