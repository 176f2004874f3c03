use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use classification_sync::{app_state::AppState, config::AppConfig, db, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing classification sync admin server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("classification_units_enqueued_total", "Units scheduled on the job queue");
    metrics::describe_counter!(
        "classification_units_skipped_total",
        "Units not scheduled because an identical job was pending"
    );
    metrics::describe_counter!("classification_responses_total", "Processed units by outcome");
    metrics::describe_counter!("classification_sync_batches_total", "Catalog batches walked by full syncs");
    metrics::describe_counter!("classification_jobs_total", "Jobs run by the worker, by result");

    let state = AppState::connect(&config, 10)
        .await
        .expect("Failed to initialize application state");

    tracing::info!("Running catalog migrations");
    db::run_migrations(&state.db)
        .await
        .expect("Failed to run database migrations");

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/sync/status", get(routes::sync::sync_status))
        .route("/api/v1/sync/toggle", post(routes::sync::toggle_syncing))
        .route("/api/v1/sync/resync", post(routes::sync::resync_errors))
        .route("/api/v1/sync/notices", delete(routes::sync::dismiss_notices))
        .route("/api/v1/catalog/items/{item_id}/saved", post(routes::sync::item_saved))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
