//! Postgres persistence for patch history.
//!
//! An alternative [`ResultStore`](patchflow_core::clients::ResultStore) to
//! the DynamoDB history table, selected with `HISTORY_BACKEND=postgres`.

pub mod models;
pub mod repositories;
pub mod store;

pub use store::PgHistoryStore;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
