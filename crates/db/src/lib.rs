//! Persistence for accounts, bound benefits, and benefit statuses.
//!
//! - [`models`]: `FromRow` entities and input DTOs.
//! - [`repositories`]: zero-sized structs with async query methods.
//! - [`store`]: the [`BenefitStore`] / [`AccountTransaction`] seam the
//!   worker depends on, implemented by [`PgStore`] and [`MemoryStore`].

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod pg_store;
pub mod repositories;
pub mod store;

pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use store::{AccountTransaction, BenefitStore, StoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
///
/// `max_connections` is the shared ceiling that batch sizes in the worker are
/// tuned against.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded SQL migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
