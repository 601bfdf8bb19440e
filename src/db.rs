//! Database pool construction and migration application.
//!
//! Mirrors the shape of this codebase's SQLite state-database helper
//! (open pool, apply migrations inline) but against Postgres, since the
//! booking overlap exclusion and the outbox lease query both depend on
//! Postgres-specific features (range exclusion constraints,
//! `FOR UPDATE SKIP LOCKED`).

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open a connection pool to `database_url` and apply any pending
/// migrations embedded at compile time from `migrations/`.
///
/// # Errors
///
/// Returns an error if the pool cannot be established or a migration
/// fails to apply.
pub async fn connect_and_migrate(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
    .max_connections(10)
    .connect(database_url)
    .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Open a connection pool without running migrations (used by
/// `nevermiss-ctl migrate status`, which reports pending migrations
/// rather than applying them).
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?)
}
