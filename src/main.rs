//! `nevermiss-server`: the long-running process. Binds the inbound
//! webhook/admin HTTP surface, and spawns the outbox dispatcher pool
//! plus every scheduled worker from against the same
//! database pool. All of it shuts down together on SIGINT/SIGTERM,
//! each worker finishing its current unit of work first .

use std::sync::Arc;

use nevermiss::adapters::http::{HttpCalendarClient, HttpComposer, HttpSmsSender};
use nevermiss::adapters::{CalendarClient, Composer, SmsSender};
use nevermiss::config::Settings;
use nevermiss::conversation::consumer::{
    CallDetectedConsumer, ComplianceUnblockConsumer, DeliveryUpdateConsumer, InboundSmsConsumer,
    OutboundSendConsumer,
};
use nevermiss::outbox::{Consumer, Dispatcher, DispatcherSettings};
use nevermiss::projector::consumer::{
    AppointmentBookedConsumer, CallDetectedRollupConsumer, CallDetectedTrackerConsumer,
    ConversationProjectionConsumer, InboundSmsTrackerConsumer,
};
use nevermiss::rng::RngJitter;
use nevermiss::scheduling::consumer::ExternalCalendarChangedConsumer;
use nevermiss::workers::retention_sweeper::RetentionWindows;
use nevermiss::workers::{calendar_poller, dispatcher_loop, hold_gc, inactivity, retention_sweeper, shutdown_channel};
use nevermiss::{db, http, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_server();

    let settings = Arc::new(Settings::load()?);
    let pool = db::connect_and_migrate(&settings.database_url).await?;

    let jitter: Arc<dyn nevermiss::rng::Jitter> = Arc::new(RngJitter::from_entropy());

    let composer: Option<Arc<dyn Composer>> = match (&settings.composer_api_base_url, &settings.composer_api_token) {
        (Some(base), Some(token)) => {
            Some(Arc::new(HttpComposer::new(base.clone(), token.clone())) as Arc<dyn Composer>)
        }
        _ => {
            tracing::warn!("no composer configured, first replies use template fallback only");
            None
        }
    };

    let sms_sender: Option<Arc<dyn SmsSender>> = match (&settings.carrier_api_base_url, &settings.carrier_api_token) {
        (Some(base), Some(token)) => {
            Some(Arc::new(HttpSmsSender::new(base.clone(), token.clone())) as Arc<dyn SmsSender>)
        }
        _ => {
            tracing::warn!("no carrier adapter configured, outbound sends will retry until one is wired up");
            None
        }
    };

    let calendar_client: Arc<dyn CalendarClient> = match (&settings.calendar_api_base_url, &settings.calendar_api_token) {
        (Some(base), Some(token)) => Arc::new(HttpCalendarClient::new(base.clone(), token.clone())),
        _ => Arc::new(NullCalendarClient),
    };

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let consumers: Vec<Arc<dyn Consumer>> = vec![
        Arc::new(CallDetectedConsumer::new(pool.clone(), composer.clone(), settings.ai_compose_deadline)),
        Arc::new(InboundSmsConsumer::new(pool.clone(), composer.clone(), settings.ai_compose_deadline)),
        Arc::new(DeliveryUpdateConsumer::new(pool.clone())),
        Arc::new(ComplianceUnblockConsumer::new(pool.clone())),
        Arc::new(OutboundSendConsumer::new(pool.clone(), sms_sender.clone(), settings.public_base_url.clone(), settings.pause_outbound_sms)),
        Arc::new(ExternalCalendarChangedConsumer::new(pool.clone())),
        Arc::new(CallDetectedTrackerConsumer::new(pool.clone())),
        Arc::new(InboundSmsTrackerConsumer::new(pool.clone())),
        Arc::new(ConversationProjectionConsumer::new(pool.clone())),
        Arc::new(CallDetectedRollupConsumer::new(pool.clone())),
        Arc::new(AppointmentBookedConsumer::new(pool.clone())),
    ];

    let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            consumers,
            DispatcherSettings {
                batch_size: settings.outbox_batch_size,
                concurrency: settings.outbox_concurrency,
                retry_max_attempts: settings.retry_max_attempts,
                retry_backoff_cap: settings.retry_backoff_cap,
            },
            Arc::clone(&jitter)));

    let mut workers = tokio::task::JoinSet::new();

    for _ in 0..settings.outbox_concurrency.max(1) {
        let dispatcher = Arc::clone(&dispatcher);
        let rx = shutdown_rx.clone();
        workers.spawn(async move { dispatcher_loop::run(dispatcher, rx).await });
    }

    {
        let pool = pool.clone();
        let interval = settings.hold_gc_interval;
        let rx = shutdown_rx.clone();
        workers.spawn(async move { hold_gc::run(pool, interval, rx).await });
    }

    {
        let pool = pool.clone();
        let threshold = chrono::Duration::from_std(settings.conversation_inactivity_close)
        .unwrap_or(chrono::Duration::hours(72));
        let interval = settings.hold_gc_interval;
        let rx = shutdown_rx.clone();
        workers.spawn(async move { inactivity::run(pool, threshold, interval, rx).await });
    }

    {
        let pool = pool.clone();
        let windows = RetentionWindows {
            messages: chrono::Duration::from_std(settings.message_retention)
            .unwrap_or(chrono::Duration::days(180)),
            receipts: chrono::Duration::from_std(settings.receipt_retention)
            .unwrap_or(chrono::Duration::days(90)),
            outbox: chrono::Duration::from_std(settings.outbox_retention)
            .unwrap_or(chrono::Duration::days(30)),
            conversation_metadata: chrono::Duration::from_std(settings.conversation_metadata_retention)
            .unwrap_or(chrono::Duration::days(395)),
        };
        let interval = settings.retention_sweep_interval;
        let rx = shutdown_rx.clone();
        workers.spawn(async move { retention_sweeper::run(pool, windows, interval, rx).await });
    }

    {
        let pool = pool.clone();
        let calendar = Arc::clone(&calendar_client);
        let interval = settings.google_poll_interval;
        let window = chrono::Duration::from_std(settings.external_sync_window)
        .unwrap_or(chrono::Duration::hours(24));
        let rx = shutdown_rx.clone();
        workers.spawn(async move { calendar_poller::run(pool, calendar, "google", interval, window, rx).await });
    }

    {
        let pool = pool.clone();
        let calendar = Arc::clone(&calendar_client);
        let interval = settings.jobber_poll_interval;
        let window = chrono::Duration::from_std(settings.external_sync_window)
        .unwrap_or(chrono::Duration::hours(24));
        let rx = shutdown_rx.clone();
        workers.spawn(async move { calendar_poller::run(pool, calendar, "jobber", interval, window, rx).await });
    }

    let app_state = http::AppState {
        pool: pool.clone(),
        settings: Arc::clone(&settings),
        jitter,
    };
    let app = http::app(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!(addr = "0.0.0.0:8080", "nevermiss-server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));

    server.await?;

    shutdown_tx.send(true).ok();
    while workers.join_next().await.is_some() {}

    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sig = signal(SignalKind::terminate).expect("install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    shutdown_tx.send(true).ok();
    tracing::info!("shutdown signal received, draining workers");
}

struct NullCalendarClient;

#[async_trait::async_trait]
impl CalendarClient for NullCalendarClient {
    async fn list_busy(&self, _resource_ref: &str, _window_start: chrono::DateTime<chrono::Utc>, _window_end: chrono::DateTime<chrono::Utc>) -> Result<Vec<nevermiss::adapters::Timeslot>, nevermiss::adapters::AdapterError> {
        Ok(Vec::new())
    }

    async fn watch(&self, _resource_ref: &str) -> Result<(), nevermiss::adapters::AdapterError> {
        Ok(())
    }
}
