//! Outbox consumers feeding the read-model projections. Split per
//! source event domain since a [`Consumer`] is routed by a single
//! `event_name_prefix`.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;

use crate::outbox::{Consumer, ConsumerOutcome, OutboxEvent};

use super::{revenue, rollup, tracker};

#[derive(Deserialize)]
struct Occurred {
    occurred_at: chrono::DateTime<chrono::Utc>,
}

/// First-response inbound half, fed by `telephony.CallDetected`:
/// upserts the tracker row's inbound timestamp if none exists yet.
pub struct CallDetectedTrackerConsumer {
    pool: PgPool,
}

impl CallDetectedTrackerConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Consumer for CallDetectedTrackerConsumer {
    fn event_name_prefix(&self) -> &str {
        "telephony."
    }

    fn name(&self) -> &str {
        "projector::call_detected_tracker"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "telephony.CallDetected" {
            return ConsumerOutcome::Ok;
        }
        record_inbound(&self.pool, event).await
    }
}

/// First-response inbound half, fed by `sms.InboundSmsReceived`.
pub struct InboundSmsTrackerConsumer {
    pool: PgPool,
}

impl InboundSmsTrackerConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Consumer for InboundSmsTrackerConsumer {
    fn event_name_prefix(&self) -> &str {
        "sms."
    }

    fn name(&self) -> &str {
        "projector::inbound_sms_tracker"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "sms.InboundSmsReceived" {
            return ConsumerOutcome::Ok;
        }
        record_inbound(&self.pool, event).await
    }
}

async fn record_inbound(pool: &PgPool, event: &OutboxEvent) -> ConsumerOutcome {
    let occurred: Occurred = match serde_json::from_value(event.payload.clone()) {
        Ok(o) => o,
        Err(e) => {
            return ConsumerOutcome::DeadLetter {
                reason: format!("missing occurred_at: {e}"),
            }
        }
    };

    match tracker::record_inbound(pool, event.tenant_id, event.correlation_id, occurred.occurred_at)
    .await
    {
        Ok(()) => ConsumerOutcome::Ok,
        Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
    }
}

/// First-response outbound half and `conversations_started` counter,
/// fed by `conversation.OutboundQueued` / `conversation.ConversationStarted`.
pub struct ConversationProjectionConsumer {
    pool: PgPool,
}

impl ConversationProjectionConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Consumer for ConversationProjectionConsumer {
    fn event_name_prefix(&self) -> &str {
        "conversation."
    }

    fn name(&self) -> &str {
        "projector::conversation_projection"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        match event.event_name.as_str() {
            "conversation.OutboundQueued" => {
                let occurred: Occurred = match serde_json::from_value(event.payload.clone()) {
                    Ok(o) => o,
                    Err(e) => {
                        return ConsumerOutcome::DeadLetter {
                            reason: format!("missing occurred_at: {e}"),
                        }
                    }
                };
                if let Err(e) = tracker::record_outbound(&self.pool, event.tenant_id, event.correlation_id, occurred.occurred_at)
                .await
                {
                    return ConsumerOutcome::Retry { reason: e.to_string() };
                }
                let day = occurred.occurred_at.date_naive();
                if let Err(e) = rollup::recompute_latency_percentiles(&self.pool, event.tenant_id, day).await
                {
                    return ConsumerOutcome::Retry { reason: e.to_string() };
                }
                ConsumerOutcome::Ok
            }
            "conversation.ConversationStarted" => {
                let occurred: Occurred = match serde_json::from_value(event.payload.clone()) {
                    Ok(o) => o,
                    Err(e) => {
                        return ConsumerOutcome::DeadLetter {
                            reason: format!("missing occurred_at: {e}"),
                        }
                    }
                };
                if let Err(e) = rollup::increment_once(&self.pool, self.name(), event.event_id, event.tenant_id, occurred.occurred_at.date_naive(), rollup::Counter::ConversationsStarted)
                .await
                {
                    return ConsumerOutcome::Retry { reason: e.to_string() };
                }
                ConsumerOutcome::Ok
            }
            _ => ConsumerOutcome::Ok,
        }
    }
}

/// `calls_detected` counter, fed by `telephony.CallDetected`. Separate
/// from [`CallDetectedTrackerConsumer`] so either can fail/retry
/// independently without re-running the other's idempotent write.
pub struct CallDetectedRollupConsumer {
    pool: PgPool,
}

impl CallDetectedRollupConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Consumer for CallDetectedRollupConsumer {
    fn event_name_prefix(&self) -> &str {
        "telephony."
    }

    fn name(&self) -> &str {
        "projector::call_detected_rollup"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "telephony.CallDetected" {
            return ConsumerOutcome::Ok;
        }
        let occurred: Occurred = match serde_json::from_value(event.payload.clone()) {
            Ok(o) => o,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("missing occurred_at: {e}"),
                }
            }
        };
        match rollup::increment_once(&self.pool, self.name(), event.event_id, event.tenant_id, occurred.occurred_at.date_naive(), rollup::Counter::CallsDetected)
        .await
        {
            Ok(()) => ConsumerOutcome::Ok,
            Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
        }
    }
}

#[derive(Deserialize)]
struct AppointmentBookedPayload {
    appointment_id: uuid::Uuid,
    price_cents: i64,
    currency: String,
    booked_at: chrono::DateTime<chrono::Utc>,
}

/// `appointments_booked` counter and [`RevenueAttribution`] row, fed by
/// `scheduling.AppointmentBooked`. Cancellation
/// (`scheduling.AppointmentCancelled`) is intentionally a no-op here:
/// the MVP leaves revenue attributed as booked.
pub struct AppointmentBookedConsumer {
    pool: PgPool,
}

impl AppointmentBookedConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Consumer for AppointmentBookedConsumer {
    fn event_name_prefix(&self) -> &str {
        "scheduling."
    }

    fn name(&self) -> &str {
        "projector::appointment_booked"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "scheduling.AppointmentBooked" {
            return ConsumerOutcome::Ok;
        }

        let payload: AppointmentBookedPayload = match serde_json::from_value(event.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed AppointmentBooked payload: {e}"),
                }
            }
        };

        let inserted = match revenue::record(&self.pool, payload.appointment_id, event.tenant_id, payload.price_cents, &payload.currency)
        .await
        {
            Ok(inserted) => inserted,
            Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
        };

        // Only bump counters the first time this appointment is
        // attributed; a redelivered event must not double-count.
        if inserted {
            let day = payload.booked_at.date_naive();
            if let Err(e) = rollup::increment(&self.pool, event.tenant_id, day, rollup::Counter::AppointmentsBooked)
            .await
            {
                return ConsumerOutcome::Retry { reason: e.to_string() };
            }
            if let Err(e) = rollup::add_revenue(&self.pool, event.tenant_id, day, payload.price_cents).await
            {
                return ConsumerOutcome::Retry { reason: e.to_string() };
            }
        }

        ConsumerOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurred_deserializes_iso8601() {
        let v = serde_json::json!({ "occurred_at": "2026-01-01T00:00:00Z" });
        let o: Occurred = serde_json::from_value(v).unwrap();
        assert_eq!(o.occurred_at.date_naive().to_string(), "2026-01-01");
    }
}
