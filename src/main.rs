//! emgserver - EMG Wearable Fleet Backend
//!
//! Main entry point.

use emgserver::{
    classifier::HttpClassifier,
    connection_hub::ConnectionHub,
    device_status::DeviceStatusController,
    models::DeviceStatus,
    session_registry::SessionRegistry,
    state::{AppConfig, AppState},
    store::{PostgresStore, Store},
    streaming_dispatcher::StreamingDispatcher,
    viewer_commands::ViewerCommandHandler,
    web_api,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emgserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting emgserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        classifier_url = %config.classifier_url,
        session_idle_timeout_secs = %config.session_idle_timeout_secs,
        "Configuration loaded"
    );

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(pool.clone()));
    let classifier = Arc::new(HttpClassifier::new(config.classifier_url.clone())?);
    let sessions = Arc::new(SessionRegistry::new());
    let hub = Arc::new(ConnectionHub::new());
    let device_status = Arc::new(DeviceStatusController::new(store.clone()));

    let dispatcher = Arc::new(StreamingDispatcher::new(
        sessions.clone(),
        hub.clone(),
        store.clone(),
        classifier.clone(),
        device_status.clone(),
        config.classifier_error_events,
    ));
    let viewer_commands = Arc::new(ViewerCommandHandler::new(
        sessions.clone(),
        hub.clone(),
        store.clone(),
        device_status.clone(),
    ));
    tracing::info!("Components initialized");

    // Create application state
    let state = AppState {
        pool,
        config: config.clone(),
        store,
        classifier,
        sessions,
        hub,
        device_status,
        dispatcher,
        viewer_commands,
    };

    // Sweep training sessions whose device went silent mid-training
    let sweep_sessions = state.sessions.clone();
    let sweep_store = state.store.clone();
    let idle_timeout = chrono::Duration::seconds(config.session_idle_timeout_secs as i64);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let swept = sweep_sessions.sweep_idle(idle_timeout).await;
            for device_id in swept {
                tracing::warn!(device_id = %device_id, "Swept idle training session");
                if let Err(e) = sweep_store
                    .set_device_status(device_id, DeviceStatus::Idle)
                    .await
                {
                    tracing::error!(device_id = %device_id, error = %e, "Failed to idle swept device");
                }
            }
        }
    });

    // Create router
    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
