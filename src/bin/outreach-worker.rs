//! # Outreach Worker
//!
//! Runs the webhook event consumer against PostgreSQL and PGMQ.
//!
//! ## Usage
//!
//! ```bash
//! OUTREACH_CREDENTIAL_KEY=... DATABASE_URL=postgresql://... cargo run --bin outreach-worker
//!
//! # Production settings and JSON logs
//! OUTREACH_ENV=production cargo run --bin outreach-worker
//! ```

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info};

use outreach_core::capacity::{
    AdmissionControl, AesGcmCredentialCipher, CapacityResolver, InProcessAdmissionControl,
    UmbrellaResolver,
};
use outreach_core::config::ConfigManager;
use outreach_core::constants::UMBRELLA_CACHE_TTL;
use outreach_core::database::{CoreStores, DatabaseConnection, DatabaseMigrations};
use outreach_core::events::EventPublisher;
use outreach_core::logging::init_structured_logging;
use outreach_core::messaging::{ContentTranscoder, JobQueue, PgmqJobQueue};
use outreach_core::orchestration::{
    ChannelDispatcher, EnrollmentEventProcessor, HealingExecutor, KeywordIntentClassifier,
    StandardFailureDiagnosis, WebhookWorker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("loading configuration")?;
    init_structured_logging();
    let config = manager.config();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = manager.environment(),
        "Starting outreach worker"
    );

    let connection = DatabaseConnection::new(&config.database)
        .await
        .context("connecting to database")?;
    let pool = connection.pool().clone();
    DatabaseMigrations::run_all(&pool)
        .await
        .context("running migrations")?;

    let cipher = Arc::new(
        AesGcmCredentialCipher::from_env(&config.credentials.key_env_var)
            .context("loading credential key")?,
    );
    let stores = CoreStores::postgres(pool.clone());
    let resolver: Arc<dyn CapacityResolver> = Arc::new(UmbrellaResolver::with_cache_settings(
        stores.umbrellas.clone(),
        cipher,
        config.capacity.cache_max_capacity,
        UMBRELLA_CACHE_TTL,
    ));
    let admission: Arc<dyn AdmissionControl> =
        Arc::new(InProcessAdmissionControl::new(resolver.clone()));

    let pgmq = PgmqJobQueue::new(pool);
    for queue_name in [
        &config.queues.sms_send,
        &config.queues.email_send,
        &config.queues.voice_call,
        &config.queues.webhook_events,
    ] {
        pgmq.create_queue(queue_name)
            .await
            .with_context(|| format!("creating queue {queue_name}"))?;
    }
    let queue: Arc<dyn JobQueue> = Arc::new(pgmq);

    let publisher = EventPublisher::new(config.events.broadcast_capacity);
    spawn_event_log(&publisher);

    let dispatcher = Arc::new(ChannelDispatcher::new(
        queue.clone(),
        resolver.clone(),
        admission.clone(),
        Arc::new(ContentTranscoder::new()),
        config.queues.clone(),
    ));
    let executor = Arc::new(HealingExecutor::new(
        &stores,
        dispatcher,
        publisher.clone(),
        config.healing.max_step_rewinds,
    ));
    let processor = Arc::new(EnrollmentEventProcessor::new(
        stores,
        Arc::new(StandardFailureDiagnosis::new()),
        executor,
        resolver,
        admission,
        Arc::new(KeywordIntentClassifier::new()),
        publisher,
    ));
    let worker = WebhookWorker::new(
        queue,
        processor,
        config.queues.clone(),
        config.workers.webhook_concurrency,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = worker.run(shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        () = &mut run => {
            error!("Webhook worker exited unexpectedly");
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received; draining in-flight jobs");
            if shutdown_tx.send(true).is_err() {
                debug!("Webhook worker already stopped");
            }
            run.await;
        }
    }

    connection.close().await;
    info!("Outreach worker shutdown complete");
    Ok(())
}

/// Debug trail of every lifecycle event until the publisher closes
fn spawn_event_log(publisher: &EventPublisher) {
    let mut events = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(published) => debug!(
                    event = published.name,
                    enrollment_id = %published.event.enrollment_id(),
                    "Lifecycle event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "Lifecycle event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
