//! Job persistence.
//!
//! [`JobStore`] is the only shared mutable state in the system. Two
//! implementations: [`PgJobStore`] over PostgreSQL and [`MemoryJobStore`]
//! for development and tests.

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryJobStore;
pub use repositories::job_repo::PgJobStore;
pub use store::JobStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
