use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bus_ticketing::services::cleanup::CleanupService;
use bus_ticketing::{config::Config, controllers, AppState, StoreBackend};

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match &state.backend {
        StoreBackend::Redis(redis) => match redis.ping().await {
            Ok(()) => (StatusCode::OK, "OK"),
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "REDIS UNAVAILABLE")
            }
        },
        StoreBackend::Memory(_) => (StatusCode::OK, "OK"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bus ticketing service ({})", config.app.environment);

    // Connect to Redis and build the seat API client
    let port = config.app.port;
    let host = config.app.host.clone();
    let app_state = AppState::new(config)
        .await
        .context("failed to initialise application state")?;
    info!("Redis connected, seat API at {}", app_state.config.remote_api.base_url);

    // --- Background cleanup of idle tabs ---
    let cleanup_every = app_state.config.booking.cleanup_interval();
    CleanupService::new(app_state.clone()).spawn(cleanup_every);

    let app = Router::new()
        .route("/", get(|| async { "Bus Ticketing API v0.1" }))
        .route("/health", get(health))
        .merge(controllers::routes())
        .with_state(app_state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid HOST/PORT")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
