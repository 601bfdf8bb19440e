//! `nevermiss-ctl outbox reprocess` / `outbox dead-letter list|replay`
//!.

use uuid::Uuid;

use super::CtlError;

async fn connect(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    nevermiss::db::connect(database_url)
    .await
    .map_err(|e| CtlError::Unreachable(e.to_string()).into())
}

/// Re-enqueue every outbox event in `[from, to]` for redelivery.
pub async fn reprocess(database_url: &str, from: Uuid, to: Uuid) -> anyhow::Result<()> {
    if from > to {
        return Err(CtlError::InvalidUsage(format!("--from {from} is greater than --to {to}"))
            .into());
    }

    let pool = connect(database_url).await?;
    let n = nevermiss::outbox::reprocess_range(&pool, from, to).await?;
    pool.close().await;

    println!("reprocessed {n} event(s)");
    Ok(())
}

/// List every event in the dead-letter view (7,
/// GLOSSARY): events that exhausted the retry budget, retained with
/// their full envelope.
pub async fn dead_letter_list(database_url: &str) -> anyhow::Result<()> {
    let pool = connect(database_url).await?;
    let rows = nevermiss::outbox::dead_letters(&pool).await?;
    pool.close().await;

    if rows.is_empty() {
        println!("dead-letter view is empty");
        return Ok(());
    }

    for row in &rows {
        println!(
            "{} {} tenant={} attempts={} last_error={}",
            row.event_id,
            row.event_name,
            row.tenant_id,
            row.attempts,
            row.last_error.as_deref().unwrap_or("-"));
    }
    println!("{} dead-lettered event(s)", rows.len());
    Ok(())
}

/// Re-enqueue one dead-lettered event with `attempts` reset to 0.
pub async fn dead_letter_replay(database_url: &str, event_id: Uuid) -> anyhow::Result<()> {
    let pool = connect(database_url).await?;
    let replayed = nevermiss::outbox::replay(&pool, event_id).await?;
    pool.close().await;

    if replayed {
        println!("event {event_id} re-enqueued");
        Ok(())
    } else {
        Err(CtlError::InvalidUsage(format!("event {event_id} not found or already dispatched"))
            .into())
    }
}
