//! Reacts to `scheduling.ExternalCalendarChanged` (emitted by webhook
//! intake) by marking the resource dirty so the
//! poller's next tick refreshes it immediately.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;

use crate::outbox::{ConsumerOutcome, OutboxEvent};

use super::external_sync;

pub struct ExternalCalendarChangedConsumer {
    pool: PgPool,
}

impl ExternalCalendarChangedConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Deserialize)]
struct CalendarChangedPayload {
    calendar_ref: String,
}

#[async_trait]
impl crate::outbox::Consumer for ExternalCalendarChangedConsumer {
    fn event_name_prefix(&self) -> &str {
        "scheduling."
    }

    fn name(&self) -> &str {
        "scheduling::external_calendar_changed"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "scheduling.ExternalCalendarChanged" {
            return ConsumerOutcome::Ok;
        }

        let payload: CalendarChangedPayload = match serde_json::from_value(event.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed ExternalCalendarChanged payload: {e}"),
                }
            }
        };

        let resource_id: Option<uuid::Uuid> = match sqlx::query_scalar("select id from resources where external_calendar_ref = $1")
        .bind(&payload.calendar_ref)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(id) => id,
            Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
        };

        let Some(resource_id) = resource_id else {
            // Reference no longer maps to a resource (deleted/reassigned);
            // nothing to mark dirty.
            return ConsumerOutcome::Ok;
        };

        match external_sync::mark_dirty(&self.pool, resource_id).await {
            Ok(()) => ConsumerOutcome::Ok,
            Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
        }
    }
}
