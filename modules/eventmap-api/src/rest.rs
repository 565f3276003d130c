use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use eventmap_common::EventsResponse;
use eventmap_store::{RawFilter, RepositoryError};

use crate::AppState;

// --- Helpers ---

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn repository_failure(err: &RepositoryError, context: &str) -> Response {
    warn!(error = %err, "{context}");
    if err.is_retryable() {
        error_json(StatusCode::SERVICE_UNAVAILABLE, "Event store unavailable")
    } else {
        error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load events")
    }
}

// --- Handlers ---

/// `GET /api/events`. Query parameters are decoded as raw pairs so that
/// malformed or repeated values degrade to defaults instead of a 400.
pub async fn api_events(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let raw = RawFilter::from_pairs(pairs);
    let spec = state.composer.compose(&raw, Utc::now());
    debug!(
        page = spec.page(),
        limit = spec.limit(),
        cells = spec.cells().len(),
        categories = spec.categories().len(),
        "Event query"
    );

    match state.repo.query(&spec).await {
        Ok(page) => Json(EventsResponse::from_page(page, spec.page(), spec.limit())).into_response(),
        Err(e) => repository_failure(&e, "Failed to load events"),
    }
}

pub async fn api_event_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: i64 = match id.trim().parse() {
        Ok(id) => id,
        Err(_) => return error_json(StatusCode::BAD_REQUEST, "Invalid event id"),
    };

    match state.repo.get_by_id(id).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => error_json(StatusCode::NOT_FOUND, "Event not found"),
        Err(e) => repository_failure(&e, "Failed to load event"),
    }
}
