//! # fedcat-db
//!
//! PostgreSQL persistence for fedcat.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgIngestMapper`], the durable transaction-id mapping store
//! - Embedded migrations for the mapping table
//!
//! ## Example
//!
//! ```rust,ignore
//! use fedcat_db::Database;
//!
//! let db = Database::connect("postgres://localhost/fedcat").await?;
//! db.migrate().await?;
//! let mapper = db.ingest_mapper.clone();
//! ```

pub mod ingest_mapper;
pub mod pool;

// Test fixtures for integration tests
// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

pub use fedcat_core::*;

pub use ingest_mapper::PgIngestMapper;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Database context: the pool plus the repositories built on it.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Transaction-id mapping store.
    pub ingest_mapper: PgIngestMapper,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            ingest_mapper: PgIngestMapper::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        tracing::info!(subsystem = "db", component = "migrate", "Migrations applied");
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
