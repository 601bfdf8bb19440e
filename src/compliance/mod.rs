//! Compliance gate.
//!
//! A small synchronous predicate, `can_send`, backed by one table. The
//! conversation engine consults it before ever queuing an outbound
//! message; campaign status changes are themselves outbox events so the
//! read-model projector (or an orchestration consumer) can react to a
//! tenant becoming approved by unblocking conversations.

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::outbox::{self, NewEvent};

/// A tenant's SMS campaign approval state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Pending,
    Approved,
    Rejected,
}

impl CampaignStatus {
    fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Approved => "approved",
            CampaignStatus::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "approved" => CampaignStatus::Approved,
            "rejected" => CampaignStatus::Rejected,
            _ => CampaignStatus::Pending,
        }
    }
}

/// `true` only when the tenant's campaign status is `approved` — the
/// one critical predicate of this component.
pub async fn can_send(pool: &PgPool, tenant_id: Uuid) -> Result<bool, sqlx::Error> {
    let status: Option<String> =
    sqlx::query_scalar("select status from compliance_campaigns where tenant_id = $1")
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    Ok(matches!(status.as_deref(), Some("approved")))
}

/// `true` if `phone` has opted out for this tenant. Outbound sends to
/// that caller are denied regardless of campaign status.
pub async fn is_opted_out(pool: &PgPool, tenant_id: Uuid, phone: &str) -> Result<bool, sqlx::Error> {
    let row: Option<Uuid> =
    sqlx::query_scalar("select tenant_id from opt_outs where tenant_id = $1 and phone = $2")
    .bind(tenant_id)
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// The combined gate the conversation engine actually enforces before
/// every send: campaign approved *and* the specific caller has not
/// opted out.
pub async fn can_send_to(pool: &PgPool, tenant_id: Uuid, phone: &str) -> Result<bool, sqlx::Error> {
    Ok(can_send(pool, tenant_id).await? && !is_opted_out(pool, tenant_id, phone).await?)
}

/// Insert an `OptOut` record for `(tenant_id, phone)` (idempotent:
/// re-inserting an existing opt-out is a no-op). Called when an inbound
/// STOP is received (`OptOut`).
pub async fn record_opt_out(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid, phone: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "insert into opt_outs (tenant_id, phone) values ($1, $2)
        on conflict (tenant_id, phone) do nothing")
    .bind(tenant_id)
    .bind(phone)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Update a tenant's campaign status, emitting `ComplianceStatusChanged`
/// in the same transaction.
///
/// Returns the previous status, if the tenant had one, so callers can
/// detect the not-approved-to-approved transition that should unblock
/// conversations.
pub async fn set_campaign_status(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid, status: CampaignStatus) -> Result<Option<CampaignStatus>, sqlx::Error> {
    let previous: Option<String> = sqlx::query_scalar("select status from compliance_campaigns where tenant_id = $1")
    .bind(tenant_id)
    .fetch_optional(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        insert into compliance_campaigns (tenant_id, status, updated_at)
        values ($1, $2, now())
        on conflict (tenant_id) do update set status = excluded.status, updated_at = now()
        "#)
    .bind(tenant_id)
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;

    let correlation_id = Uuid::new_v4();
    outbox::append(
        &mut **tx,
        NewEvent {
            tenant_id,
            event_name: "compliance.ComplianceStatusChanged",
            schema_version: "1.0.0",
            payload: json!({
                    "tenant_id": tenant_id,
                    "previous_status": previous,
                    "new_status": status.as_str(),
                    "occurred_at": Utc::now(),
                }),
            correlation_id,
            causation_id: None,
        })
    .await?;

    Ok(previous.map(|p| CampaignStatus::parse(&p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_round_trips_through_str() {
        for s in [
            CampaignStatus::Pending,
            CampaignStatus::Approved,
            CampaignStatus::Rejected,
        ] {
            assert_eq!(CampaignStatus::parse(s.as_str()), s);
        }
    }

    #[test]
    fn unknown_status_string_parses_as_pending() {
        assert_eq!(CampaignStatus::parse("garbage"), CampaignStatus::Pending);
    }
}
