//! Tenant identity and inbound phone-number routing (`TenantPhoneNumber`; "Tenant resolution").
//!
//! Every record in this system carries a `tenant_id`; this module is the
//! one place that turns an externally-supplied identifier (a destination phone number, a provider customer id) into that `tenant_id`. No other
//! component queries `tenant_phone_numbers` directly.

use sqlx::PgPool;
use uuid::Uuid;

/// A tenant-owned phone number used to resolve inbound SMS/voice
/// webhooks to the owning tenant.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantPhoneNumber {
    pub tenant_id: Uuid,
    pub e164: String,
    pub receiving: bool,
    pub campaign_id: Option<Uuid>,
}

/// Resolve the tenant that owns `e164`, the destination number a
/// carrier webhook was sent to.
///
/// Returns `None` for unknown numbers; callers must treat that as a
/// 200 no-op rather than an error (open question: " mandates 200 no-op to prevent carrier retries").
pub async fn resolve_by_phone(pool: &PgPool, e164: &str) -> Result<Option<Uuid>, sqlx::Error> {
    let row = sqlx::query_scalar::<_, Uuid>("select tenant_id from tenant_phone_numbers where e164 = $1 and receiving")
    .bind(e164)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Resolve the tenant owning a calendar reference (step 3, "for calendar events, via stored calendar reference").
pub async fn resolve_by_calendar_ref(pool: &PgPool, calendar_ref: &str) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>("select tenant_id from resources where id::text = $1 or name = $1 limit 1")
    .bind(calendar_ref)
    .fetch_optional(pool)
    .await
}

/// Template-rendering metadata for a tenant (business name, support line). Everything else about a tenant (catalog, billing, identity)
/// is owned by external collaborators.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantProfile {
    pub business_name: String,
    pub support_phone: String,
}

/// Fetch `tenant_id`'s profile, falling back to generic copy if the
/// tenant row hasn't been provisioned yet (keeps the conversation engine from failing outright on a misconfigured tenant).
pub async fn profile(pool: &PgPool, tenant_id: Uuid) -> Result<TenantProfile, sqlx::Error> {
    let row: Option<TenantProfile> =
    sqlx::query_as("select business_name, support_phone from tenants where id = $1")
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.unwrap_or(TenantProfile { business_name: "our team".to_string(), support_phone: "our office".to_string(), }))
}
