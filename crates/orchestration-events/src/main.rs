//! Orchestration Events Server
//!
//! Serves the event log and execution state API, and consumes change and
//! response events from NATS JetStream when configured.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestration_events::{
    cdc::{ChangeEventDispatcher, ExecutionCleanupHandler},
    config::{AppConfig, DatabaseConfig, StorageBackend},
    consumer::{ChangeStreamConsumer, ResponseEventConsumer},
    db::{create_pool, ensure_schema, DbPool},
    handlers,
    nats::{self, JetStreamSubscriber},
    services::{EventLogService, ExecutionStateUpdater},
    state::AppState,
    store::{
        EventLogStore, ExecutionStore, MemoryEventLogStore, MemoryExecutionStore, PgEventLogStore,
        PgExecutionStore,
    },
    AppResult,
};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestration_events=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Stores for the configured backend, plus the pool when it is PostgreSQL.
async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn EventLogStore>, Arc<dyn ExecutionStore>, Option<DbPool>)> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            let log_store: Arc<dyn EventLogStore> =
                Arc::new(MemoryEventLogStore::new().with_batch_limit(config.event_batch_limit));
            let execution_store: Arc<dyn ExecutionStore> = Arc::new(MemoryExecutionStore::new());
            Ok((log_store, execution_store, None))
        }
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let pool = create_pool(&db_config).await?;
            ensure_schema(&pool).await?;
            let log_store: Arc<dyn EventLogStore> =
                Arc::new(PgEventLogStore::new(pool.clone()).with_batch_limit(config.event_batch_limit));
            let execution_store: Arc<dyn ExecutionStore> = Arc::new(PgExecutionStore::new(pool.clone()));
            Ok((log_store, execution_store, Some(pool)))
        }
    }
}

/// Connect to NATS if configured.
async fn connect_nats(config: &AppConfig) -> Option<async_nats::Client> {
    let Some(ref nats_url) = config.nats_url else {
        tracing::info!("NATS not configured, running without stream consumers");
        return None;
    };

    match nats::connect(nats_url).await {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect to NATS, continuing without it");
            None
        }
    }
}

/// Bind the change and response consumers and run them in the background.
async fn spawn_consumers(
    client: async_nats::Client,
    config: &AppConfig,
    dispatcher: Arc<ChangeEventDispatcher>,
    updater: ExecutionStateUpdater,
) -> AppResult<Vec<JoinHandle<()>>> {
    let cdc_filter = config.cdc_subject_filter();
    let cdc_subscriber = JetStreamSubscriber::connect(
        client.clone(),
        &config.cdc_stream,
        vec![cdc_filter.clone()],
        &config.cdc_consumer,
        &cdc_filter,
    )
    .await?;

    let response_subscriber = JetStreamSubscriber::connect(
        client,
        &config.response_stream,
        vec![config.response_subject.clone()],
        &config.response_consumer,
        &config.response_subject,
    )
    .await?;

    let stop = dispatcher.subscribe();
    let change_consumer =
        ChangeStreamConsumer::new(cdc_subscriber, dispatcher, config.cdc_subject_prefix.clone());
    let response_consumer =
        ResponseEventConsumer::new(response_subscriber, updater, config.retry_policy());

    let change_handle = tokio::spawn(async move {
        if let Err(e) = change_consumer.run().await {
            tracing::error!(error = %e, "Change stream consumer failed");
        }
    });
    let response_handle = tokio::spawn(async move {
        if let Err(e) = response_consumer.run(stop).await {
            tracing::error!(error = %e, "Response event consumer failed");
        }
    });

    Ok(vec![change_handle, response_handle])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting orchestration events server"
    );

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        storage = ?app_config.storage,
        batch_limit = app_config.event_batch_limit,
        "Configuration loaded"
    );

    let (log_store, execution_store, db_pool) = build_stores(&app_config).await?;
    let event_log = EventLogService::new(log_store);
    let updater = ExecutionStateUpdater::new(execution_store, event_log.clone());

    let mut dispatcher = ChangeEventDispatcher::new();
    dispatcher.register(ExecutionCleanupHandler::new(event_log));
    let dispatcher = Arc::new(dispatcher);

    let mut state = AppState::new(updater.clone(), dispatcher.clone(), app_config.clone());
    if let Some(pool) = db_pool {
        state = state.with_db(pool);
    }

    let mut consumers = Vec::new();
    if let Some(client) = connect_nats(&app_config).await {
        consumers = spawn_consumers(client.clone(), &app_config, dispatcher.clone(), updater).await?;
        state = state.with_nats(client);
    }

    let app = handlers::create_router(state);

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.stop();
    for handle in consumers {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Consumer task ended abnormally");
        }
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
