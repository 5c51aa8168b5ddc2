//! Durable ingest mapper backed by PostgreSQL.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};

use fedcat_core::{
    CatalogRecordRef, Error, IngestMapper, LocalId, Result, TransactionId,
};

/// PostgreSQL implementation of [`IngestMapper`].
///
/// Every ref is one row of `ingest_mapping`. Writes are idempotent upserts,
/// so concurrent `record` calls for the same transaction never conflict.
#[derive(Clone)]
pub struct PgIngestMapper {
    pool: Pool<Postgres>,
}

impl PgIngestMapper {
    /// Create a new PgIngestMapper with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Number of distinct transactions mapped.
    pub async fn transaction_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(DISTINCT transaction_id) AS n FROM ingest_mapping")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("n"))
    }
}

#[async_trait]
impl IngestMapper for PgIngestMapper {
    async fn record(&self, tx: &TransactionId, catalog_id: &str, local_id: &LocalId) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingest_mapping (transaction_id, catalog_id, local_id) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(tx.as_str())
        .bind(catalog_id)
        .bind(local_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        trace!(
            subsystem = "mapper",
            component = "pg",
            op = "record",
            transaction_id = %tx,
            catalog_id,
            local_id = %local_id,
            "Recorded mapping"
        );
        Ok(())
    }

    async fn lookup(&self, tx: &TransactionId) -> Result<Vec<CatalogRecordRef>> {
        let rows = sqlx::query(
            r#"
            SELECT catalog_id, local_id
            FROM ingest_mapping
            WHERE transaction_id = $1
            ORDER BY seq
            "#,
        )
        .bind(tx.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                CatalogRecordRef::new(
                    row.get::<String, _>("catalog_id"),
                    LocalId::new(row.get::<String, _>("local_id")),
                )
            })
            .collect())
    }

    async fn remove(&self, tx: &TransactionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM ingest_mapping WHERE transaction_id = $1")
            .bind(tx.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "mapper",
            component = "pg",
            op = "remove",
            transaction_id = %tx,
            ref_count = result.rows_affected(),
            "Removed mapping"
        );
        Ok(())
    }

    async fn transaction_for(
        &self,
        catalog_id: &str,
        local_id: &LocalId,
    ) -> Result<Option<TransactionId>> {
        let row = sqlx::query(
            "SELECT transaction_id FROM ingest_mapping \
             WHERE catalog_id = $1 AND local_id = $2 ORDER BY seq LIMIT 1",
        )
        .bind(catalog_id)
        .bind(local_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| TransactionId::new(r.get::<String, _>("transaction_id"))))
    }

    async fn contains(&self, tx: &TransactionId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM ingest_mapping WHERE transaction_id = $1) AS found",
        )
        .bind(tx.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("found"))
    }

    async fn remove_ref(&self, tx: &TransactionId, r: &CatalogRecordRef) -> Result<()> {
        sqlx::query(
            "DELETE FROM ingest_mapping \
             WHERE transaction_id = $1 AND catalog_id = $2 AND local_id = $3",
        )
        .bind(tx.as_str())
        .bind(&r.catalog_id)
        .bind(r.local_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn remove_catalog(&self, catalog_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ingest_mapping WHERE catalog_id = $1")
            .bind(catalog_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "mapper",
            component = "pg",
            op = "remove_catalog",
            catalog_id,
            ref_count = result.rows_affected(),
            "Removed catalog mappings"
        );
        Ok(result.rows_affected())
    }
}
