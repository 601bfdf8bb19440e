//! Conversation engine invariants: single active conversation per
//! caller (property 3), compliance gate at first contact (S3), STOP
//! opt-out (S6).

use sqlx::PgPool;
use uuid::Uuid;

use nevermiss::conversation::engine::handle_first_contact;
use nevermiss::conversation::ConversationState;

async fn seed_tenant(pool: &PgPool) -> Uuid {
    sqlx::query_scalar(
        "insert into tenants (business_name, support_phone) values ($1, $2) returning id")
    .bind("Acme Dental")
    .bind("+13105550001")
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn approve_tenant(pool: &PgPool, tenant_id: Uuid) {
    sqlx::query("insert into compliance_campaigns (tenant_id, status) values ($1, 'approved')")
        .bind(tenant_id)
        .execute(pool)
        .await
        .unwrap();
}

async fn conversation_state(pool: &PgPool, tenant_id: Uuid, caller: &str) -> Option<String> {
    sqlx::query_scalar("select state from conversations where tenant_id = $1 and caller_phone = $2")
        .bind(tenant_id)
        .bind(caller)
        .fetch_optional(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn first_contact_for_approved_tenant_opens_conversation_and_queues_greeting(pool: PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    approve_tenant(&pool, tenant_id).await;

    handle_first_contact(&pool, None, std::time::Duration::from_millis(3500), tenant_id, "+13105551212", Uuid::new_v4(), "Acme Dental", None)
        .await
        .unwrap();

    assert_eq!(conversation_state(&pool, tenant_id, "+13105551212").await.as_deref(), Some(ConversationState::Open.as_str()));

    let queued: i64 = sqlx::query_scalar(
        "select count(*) from messages where tenant_id = $1 and direction = 'out' and status = 'queued'")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(queued, 1);

    let started_events: i64 = sqlx::query_scalar(
        "select count(*) from outbox_events where event_name = 'conversation.ConversationStarted' and tenant_id = $1")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(started_events, 1);
}

#[sqlx::test]
async fn first_contact_for_unapproved_tenant_blocks_without_sending(pool: PgPool) {
    // S3: campaign status pending (no compliance_campaigns row, or
    // status != approved) -> conversation ends up blocked, zero
    // outbound messages, one ComplianceBlocked notification.
    let tenant_id = seed_tenant(&pool).await;

    handle_first_contact(&pool, None, std::time::Duration::from_millis(3500), tenant_id, "+13105551212", Uuid::new_v4(), "Acme Dental", None)
        .await
        .unwrap();

    assert_eq!(conversation_state(&pool, tenant_id, "+13105551212").await.as_deref(), Some(ConversationState::Blocked.as_str()));

    let queued: i64 = sqlx::query_scalar("select count(*) from messages where tenant_id = $1")
        .bind(tenant_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(queued, 0);

    let blocked_events: i64 = sqlx::query_scalar(
        "select count(*) from outbox_events where event_name = 'conversation.ComplianceBlocked' and tenant_id = $1")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(blocked_events, 1);
}

#[sqlx::test]
async fn concurrent_first_contact_from_the_same_caller_opens_only_one_conversation(pool: PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    approve_tenant(&pool, tenant_id).await;
    let caller = "+13105551212";
    let correlation_id = Uuid::new_v4();

    let (r1, r2) = tokio::join!(
        handle_first_contact(&pool, None, std::time::Duration::from_millis(3500), tenant_id, caller, correlation_id, "Acme Dental", None),
        handle_first_contact(&pool, None, std::time::Duration::from_millis(3500), tenant_id, caller, correlation_id, "Acme Dental", None),
    );
    r1.unwrap();
    r2.unwrap();

    let active_count: i64 = sqlx::query_scalar(
        "select count(*) from conversations where tenant_id = $1 and caller_phone = $2 and state in ('open', 'human')")
    .bind(tenant_id)
    .bind(caller)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active_count, 1, "partial unique index must keep exactly one active conversation");

    let queued: i64 = sqlx::query_scalar(
        "select count(*) from messages where tenant_id = $1 and direction = 'out'")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(queued, 1, "only the conversation-creating attempt should queue a greeting");
}

#[sqlx::test]
async fn outbound_messages_are_unique_per_client_dedup_key(pool: PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    let conversation_id: Uuid = sqlx::query_scalar(
        "insert into conversations (tenant_id, caller_phone, state) values ($1, $2, 'open') returning id")
    .bind(tenant_id)
    .bind("+13105551212")
    .fetch_one(&pool)
    .await
    .unwrap();

    let insert = |dedup_key: &'static str| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                r#"
                insert into messages (conversation_id, tenant_id, direction, body, status, client_dedup_key)
                values ($1, $2, 'out', 'hi', 'queued', $3)
                on conflict (tenant_id, client_dedup_key) where direction = 'out' and client_dedup_key is not null
                do nothing
                "#)
            .bind(conversation_id)
            .bind(tenant_id)
            .bind(dedup_key)
            .execute(&pool)
            .await
            .unwrap()
            .rows_affected()
        }
    };

    assert_eq!(insert("key-1").await, 1);
    assert_eq!(insert("key-1").await, 0, "second insert with the same dedup key must be a no-op");

    let count: i64 = sqlx::query_scalar(
        "select count(*) from messages where tenant_id = $1 and client_dedup_key = 'key-1'")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}
