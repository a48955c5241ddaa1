//! Agenda endpoints consumed by the dashboard display

use std::collections::HashSet;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hearth_core::config::ProfileId;
use hearth_core::{AgendaSnapshot, RefreshOutcome, VisibleAgenda, visible_view};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agenda", get(get_agenda))
        .route("/agenda/view", get(get_view))
        .route("/refresh", post(refresh))
        .route("/health", get(health))
}

/// The current aggregation result with its cache metadata.
pub type AgendaResponse = AgendaSnapshot;

/// GET /agenda - The full result, including per-source status
async fn get_agenda(State(state): State<AppState>) -> Json<AgendaResponse> {
    Json(state.aggregator().snapshot(Utc::now()).await)
}

#[derive(Deserialize)]
pub struct ViewQuery {
    /// Comma-separated profile ids to hide.
    #[serde(default)]
    pub hidden: Option<String>,
}

impl ViewQuery {
    fn hidden_profiles(&self) -> HashSet<ProfileId> {
        self.hidden
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ProfileId::from)
            .collect()
    }
}

/// Filtered agenda for displays that do not filter locally.
#[derive(Serialize)]
pub struct ViewResponse {
    pub version: u64,
    pub captured_at: Option<DateTime<Utc>>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub view: VisibleAgenda,
}

/// GET /agenda/view?hidden=a,b - The agenda with the presentation filter applied now
async fn get_view(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> Json<ViewResponse> {
    let now = Utc::now();
    let snapshot = state.aggregator().snapshot(now).await;
    let view = visible_view(&snapshot.result, &query.hidden_profiles(), now);

    Json(ViewResponse {
        version: snapshot.version,
        captured_at: snapshot.captured_at,
        stale: snapshot.stale,
        error: snapshot.result.error,
        view,
    })
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub outcome: RefreshOutcome,
    pub agenda: AgendaResponse,
}

/// POST /refresh - Run a cycle (or join the running one) and return the result
async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, AppError> {
    // Detached so a client hanging up does not abandon the cycle halfway.
    let aggregator = state.aggregator().clone();
    let outcome = tokio::spawn(async move { aggregator.refresh(Utc::now()).await }).await?;
    let agenda = state.aggregator().snapshot(Utc::now()).await;

    Ok(Json(RefreshResponse { outcome, agenda }))
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}
