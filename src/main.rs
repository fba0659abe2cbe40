//! credit-engine server entry point.
//!
//! Starts the Axum HTTP server exposing the credit operations and
//! spawns the periodic expiry sweeper.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use credit_engine::api;
use credit_engine::app_state::AppState;
use credit_engine::config::EngineConfig;
use credit_engine::persistence::LedgerStore;
use credit_engine::persistence::postgres::PostgresLedgerStore;
use credit_engine::service::{CreditService, spawn_sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = EngineConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting credit-engine");

    // Connect to PostgreSQL and apply migrations
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Build service layer
    let store: Arc<dyn LedgerStore> = Arc::new(PostgresLedgerStore::new(pool));
    let credit_service = Arc::new(CreditService::new(store, config.sweep_batch_size));

    // Spawn the periodic expiry sweeper
    if config.sweep_enabled {
        let _sweeper = spawn_sweeper(
            Arc::clone(&credit_service),
            Duration::from_secs(config.sweep_interval_secs),
        );
        tracing::info!(
            interval_secs = config.sweep_interval_secs,
            "expiry sweeper running"
        );
    }

    // Build application state
    let app_state = AppState { credit_service };

    // Build router
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
