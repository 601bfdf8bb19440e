//! `nevermiss-ctl migrate run` / `migrate status` (:
//! "A migrations tool (forward and status)").

use super::CtlError;

/// Connect and apply every pending migration, embedded at compile time
/// from the workspace `migrations/` directory .
pub async fn run(database_url: &str) -> anyhow::Result<()> {
    let pool = nevermiss::db::connect_and_migrate(database_url)
    .await
    .map_err(|e| CtlError::Unreachable(e.to_string()))?;
    pool.close().await;
    println!("migrations applied");
    Ok(())
}

/// Report which migrations (by version) are applied vs. pending,
/// without applying anything.
pub async fn status(database_url: &str) -> anyhow::Result<()> {
    let pool = nevermiss::db::connect(database_url)
    .await
    .map_err(|e| CtlError::Unreachable(e.to_string()))?;

    let migrator = sqlx::migrate!("../migrations");

    let applied: Vec<i64> = match sqlx::query_scalar::<_, i64>("select version from _sqlx_migrations where success order by version")
    .fetch_all(&pool)
    .await
    {
        Ok(rows) => rows,
        // The migration bookkeeping table doesn't exist yet: nothing's
        // been applied.
        Err(_) => Vec::new(),
    };

    pool.close().await;

    let mut pending = 0;
    for migration in migrator.iter() {
        let version = migration.version;
        let applied_mark = if applied.contains(&version) {
            "applied"
        } else {
            pending += 1;
            "pending"
        };
        println!("{version:>14} {applied_mark:<7} {}", migration.description);
    }

    if pending > 0 {
        println!("{pending} migration(s) pending");
    } else {
        println!("up to date");
    }

    Ok(())
}
