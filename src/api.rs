use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::PublicAppConfig;
use crate::errors::AppResult;
use crate::search::{SearchOutcome, SearchRequest};
use crate::AppState;

/// `max_result` keeps the field name clients already send.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub location: String,
    pub radius: Option<f64>,
    pub max_result: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub database_path: String,
    pub park_count: u64,
    pub telemetry_buffer_path: String,
    pub telemetry_queue_depth: usize,
    pub config: PublicAppConfig,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/parks/search", post(search_parks))
        .route("/health", get(health))
        .with_state(state)
}

async fn search_parks(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> AppResult<Json<SearchOutcome>> {
    let config = state.config();
    let request = SearchRequest::new(
        body.location,
        body.radius.unwrap_or(config.default_search_radius_meters),
        body.max_result.or(Some(config.default_max_results)),
    );
    let location = request.location.trim().to_string();
    let telemetry = state.telemetry();

    match state.search().search_parks(&request).await {
        Ok(outcome) => {
            if let Err(err) = telemetry.record_search(&location, &outcome) {
                warn!(?err, "failed to record park search event");
            }
            Ok(Json(outcome))
        }
        Err(err) => {
            if let Err(telemetry_err) = telemetry.record_search_failure(&location, &err) {
                warn!(?telemetry_err, "failed to record park search failure");
            }
            Err(err)
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> AppResult<Json<HealthReport>> {
    state.health().map(Json)
}
