use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::product::{ItemSnapshot, ProductChanges};
use crate::models::unit::EnqueuedClassificationUnit;
use crate::services::sync_handler::{SyncError, SyncStatus};

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub syncing_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub enqueued: usize,
    pub units: Vec<EnqueuedClassificationUnit>,
}

impl From<Vec<EnqueuedClassificationUnit>> for EnqueueResponse {
    fn from(units: Vec<EnqueuedClassificationUnit>) -> Self {
        Self {
            enqueued: units.len(),
            units,
        }
    }
}

/// Body of the catalog-edit hook. `stored` and `incoming` are only sent by
/// callers that can observe the write before it is applied.
#[derive(Debug, Default, Deserialize)]
pub struct ItemSavedRequest {
    #[serde(default)]
    pub changes: ProductChanges,
    pub stored: Option<ItemSnapshot>,
    pub incoming: Option<ItemSnapshot>,
}

fn internal_error(context: &'static str) -> impl FnOnce(SyncError) -> StatusCode {
    move |e| {
        tracing::error!(error = %e, "{context}");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// GET /api/v1/sync/status
pub async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncStatus>, StatusCode> {
    state
        .sync
        .sync_status()
        .await
        .map(Json)
        .map_err(internal_error("Failed to read sync status"))
}

/// POST /api/v1/sync/toggle: turn syncing on (starting a full sync) or off.
pub async fn toggle_syncing(State(state): State<AppState>) -> Result<Json<ToggleResponse>, StatusCode> {
    let syncing_enabled = state
        .sync
        .toggle_syncing()
        .await
        .map_err(internal_error("Failed to toggle syncing"))?;

    Ok(Json(ToggleResponse { syncing_enabled }))
}

/// POST /api/v1/sync/resync: re-enqueue units from the error and resolution buckets.
pub async fn resync_errors(State(state): State<AppState>) -> Result<Json<EnqueueResponse>, StatusCode> {
    state
        .sync
        .resync_products_with_errors()
        .await
        .map(|units| Json(units.into()))
        .map_err(internal_error("Failed to resync products with errors"))
}

/// DELETE /api/v1/sync/notices
pub async fn dismiss_notices(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    state
        .sync
        .dismiss_notices()
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(internal_error("Failed to dismiss notices"))
}

/// POST /api/v1/catalog/items/{item_id}/saved: catalog-edit hook.
pub async fn item_saved(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Json(request): Json<ItemSavedRequest>,
) -> Result<Json<EnqueueResponse>, StatusCode> {
    if item_id <= 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let (Some(stored), Some(incoming)) = (&request.stored, &request.incoming) {
        state.sync.flag_updated_item(item_id, stored, incoming);
    }

    let units = state
        .sync
        .maybe_enqueue_saved_product(item_id, &request.changes)
        .await
        .map_err(internal_error("Failed to enqueue saved item"))?;

    tracing::info!(product_id = item_id, enqueued = units.len(), "Catalog item saved");
    Ok(Json(units.into()))
}
