// crates/cropwatch-core/src/db.rs

use std::time::Duration;

use sqlx::migrate::MigrateError;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::config::DatabaseSettings;

pub type DbPool = Pool<Postgres>;

/// Builds the shared Postgres pool without opening a connection. The first
/// query establishes the first connection; callers queue once all
/// `max_connections` are checked out.
pub fn connect_lazy(settings: &DatabaseSettings) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(0)
        .idle_timeout(Duration::from_secs(300))
        .connect_lazy(&settings.url)?;
    info!(max_connections = settings.max_connections, "database pool configured");
    Ok(pool)
}

/// Run database migrations embedded at compile-time.
pub async fn run_migrations(pool: &DbPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Closes every pooled connection. Called once the HTTP server has drained.
pub async fn shutdown(pool: DbPool) {
    pool.close().await;
    info!("database pool closed");
}
