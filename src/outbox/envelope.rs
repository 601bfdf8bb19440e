//! The outbox envelope: the row shape producers append and the
//! dispatcher/consumers read back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

/// A row in `outbox_events`, as read back by the dispatcher and by
/// consumers.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub tenant_id: Uuid,
    /// Namespaced `<domain>.<Name>`, e.g. `telephony.CallDetected`.
    pub event_name: String,
    /// Semantic version; additive fields bump minor.
    pub schema_version: String,
    pub payload: Value,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Fields a producer supplies when appending a new event; everything
/// else (`event_id`, `created_at`, `attempts`,...) is assigned by the
/// store.
pub struct NewEvent<'a> {
    pub tenant_id: Uuid,
    pub event_name: &'a str,
    pub schema_version: &'a str,
    pub payload: Value,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
}

/// Insert a new outbox row using `executor`, which must be the same
/// transaction as the business-state change it accompanies: producers
/// insert outbox rows in the same transaction as the state change they
/// describe, so a rollback discards both together.
///
/// Returns the generated `event_id`.
pub async fn append<'a, E>(executor: E, event: NewEvent<'a>) -> Result<Uuid, sqlx::Error>
where
E: Executor<'a, Database = Postgres>,
{
    sqlx::query_scalar::<_, Uuid>(
        r#"
        insert into outbox_events
        (tenant_id, event_name, schema_version, payload, correlation_id, causation_id)
        values ($1, $2, $3, $4, $5, $6)
        returning event_id
        "#)
    .bind(event.tenant_id)
    .bind(event.event_name)
    .bind(event.schema_version)
    .bind(event.payload)
    .bind(event.correlation_id)
    .bind(event.causation_id)
    .fetch_one(executor)
    .await
}
