//! Inlet for scheduling service notifications relayed by a gateway client

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use tracing::debug;

use calmirror_core::Notification;

use super::{AppError, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", post(receive))
}

/// POST /notifications - queue a notification for the push handlers
async fn receive(
    State(state): State<AppState>,
    Json(notification): Json<Notification>,
) -> Result<StatusCode, AppError> {
    let kind = notification.kind();
    state
        .notifications
        .send(notification)
        .await
        .map_err(|_| AppError::unavailable("Push handlers are not accepting notifications"))?;

    debug!(kind, "Notification accepted");
    Ok(StatusCode::ACCEPTED)
}
