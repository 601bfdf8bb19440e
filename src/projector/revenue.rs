//! Revenue attribution: one row per booked appointment, a price
//! snapshot taken at booking time.

use sqlx::PgPool;
use uuid::Uuid;

/// Insert a revenue attribution row for a newly booked appointment.
/// Idempotent: `appointment_id` is the primary key, so a redelivered
/// `AppointmentBooked` event is a no-op.
pub async fn record(pool: &PgPool, appointment_id: Uuid, tenant_id: Uuid, price_cents: i64, currency: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        insert into revenue_attributions (appointment_id, tenant_id, price_cents, currency)
        values ($1, $2, $3, $4)
        on conflict (appointment_id) do nothing
        "#)
    .bind(appointment_id)
    .bind(tenant_id)
    .bind(price_cents)
    .bind(currency)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
