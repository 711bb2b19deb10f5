//! Job record store: the `jobs` / `job_logs` schema, the [`JobStore`]
//! contract and its PostgreSQL and in-memory implementations.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;
pub use store::{JobStore, StoreError, StoreResult};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
