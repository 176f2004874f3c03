use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub syncing_enabled: Option<bool>,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub catalog_db: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_result<T, E>(result: Result<T, E>, started: Instant) -> Self {
        match result {
            Ok(_) => Self {
                status: "ok",
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error",
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: catalog database and Redis connectivity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let catalog_db = ComponentHealth::from_result(sqlx::query("SELECT 1").execute(&state.db).await, started);

    let started = Instant::now();
    let redis = ComponentHealth::from_result(state.queue.health_check().await, started);

    let healthy = catalog_db.is_ok() && redis.is_ok();
    let syncing_enabled = if redis.is_ok() {
        state.sync.is_syncing_active().await.ok()
    } else {
        None
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        syncing_enabled,
        checks: HealthChecks { catalog_db, redis },
    };

    (status_code, Json(response))
}
