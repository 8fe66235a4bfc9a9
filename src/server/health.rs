//! Liveness and mapping counts

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use calmirror_core::MappingCounts;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub mappings: MappingCounts,
    pub active_guards: usize,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        mappings: state.ctx.mapping_counts(),
        active_guards: state.ctx.guard().len(),
    })
}
