//! Local HTTP surface: a health probe and a notification inlet.

mod health;
mod notifications;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use calmirror_core::{Notification, SyncContext};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    ctx: Arc<SyncContext>,
    notifications: mpsc::Sender<Notification>,
    started_at: Instant,
}

impl AppState {
    pub fn new(ctx: Arc<SyncContext>, notifications: mpsc::Sender<Notification>) -> Self {
        AppState {
            ctx,
            notifications,
            started_at: Instant::now(),
        }
    }
}

/// Only the health probe is readable cross-origin; notifications come from
/// the local relay and must not be postable from a browser page.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .merge(health::router().layer(cors))
        .merge(notifications::router())
        .with_state(state)
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Converts anyhow errors to HTTP responses, 500 unless told otherwise.
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn unavailable(message: &str) -> Self {
        AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: anyhow::anyhow!("{message}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
        });
        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use calmirror_core::config::{QueuesConfig, SyncSettings};
    use calmirror_core::{
        CalendarEvent, Collaborators, DateRange, EntityDraft, EventDraft, MappingSnapshot,
        MappingStorage, RemoteCalendar, RetryPolicy, ScheduledEntity, SchedulingService,
        SyncError, SyncResult,
    };
    use tower::ServiceExt;

    /// Collaborator that refuses every call; the routes never reach it.
    struct Offline;

    fn offline() -> SyncError {
        SyncError::Transient("offline".into())
    }

    #[async_trait]
    impl RemoteCalendar for Offline {
        async fn list_events(&self, _range: &DateRange) -> SyncResult<Vec<CalendarEvent>> {
            Err(offline())
        }
        async fn insert_event(&self, _draft: &EventDraft) -> SyncResult<CalendarEvent> {
            Err(offline())
        }
        async fn update_event(&self, _id: &str, _draft: &EventDraft) -> SyncResult<CalendarEvent> {
            Err(offline())
        }
        async fn delete_event(&self, _id: &str) -> SyncResult<()> {
            Err(offline())
        }
    }

    #[async_trait]
    impl SchedulingService for Offline {
        async fn create_entity(&self, _draft: &EntityDraft) -> SyncResult<ScheduledEntity> {
            Err(offline())
        }
        async fn update_entity(
            &self,
            _id: &str,
            _draft: &EntityDraft,
        ) -> SyncResult<ScheduledEntity> {
            Err(offline())
        }
        async fn delete_entity(&self, _id: &str) -> SyncResult<()> {
            Err(offline())
        }
        async fn lookup_entity(&self, _id: &str) -> SyncResult<Option<ScheduledEntity>> {
            Err(offline())
        }
        fn self_id(&self) -> &str {
            "bot-1"
        }
    }

    #[async_trait]
    impl MappingStorage for Offline {
        async fn load(&self) -> SyncResult<Option<MappingSnapshot>> {
            Ok(None)
        }
        async fn save(&self, _snapshot: &MappingSnapshot) -> SyncResult<()> {
            Ok(())
        }
    }

    fn test_state(capacity: usize) -> (AppState, mpsc::Receiver<Notification>) {
        let ctx = SyncContext::new(
            Collaborators {
                remote: Arc::new(Offline),
                scheduling: Arc::new(Offline),
                storage: Arc::new(Offline),
            },
            SyncSettings::default(),
            &QueuesConfig::default(),
            RetryPolicy::default(),
        );
        let (tx, rx) = mpsc::channel(capacity);
        (AppState::new(Arc::new(ctx), tx), rx)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_mapping_counts() {
        let (state, _rx) = test_state(4);
        state.ctx.with_mappings(|m| {
            m.put("g1", "d1");
            m.put("g2", "d2");
        });

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mappings"]["remote_to_local"], 2);
        assert_eq!(body["mappings"]["local_to_remote"], 2);
        assert_eq!(body["active_guards"], 0);
    }

    #[tokio::test]
    async fn test_notification_is_forwarded_to_handlers() {
        let (state, mut rx) = test_state(4);

        let response = router(state)
            .oneshot(post_json("/notifications", r#"{"type":"ready"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(Notification::Ready)));
    }

    #[tokio::test]
    async fn test_malformed_notification_is_rejected() {
        let (state, mut rx) = test_state(4);

        let response = router(state)
            .oneshot(post_json("/notifications", r#"{"type":"exploded"}"#))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert!(rx.try_recv().is_err());
    }

    fn preflight(uri: &str, method: &str) -> Request<Body> {
        Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .header("origin", "https://example.com")
            .header("access-control-request-method", method)
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cross_origin_preflight_only_allowed_for_health() {
        let (state, _rx) = test_state(4);
        let app = router(state);

        let health = app.clone().oneshot(preflight("/health", "GET")).await.unwrap();
        assert!(health.headers().contains_key("access-control-allow-origin"));

        let inlet = app
            .oneshot(preflight("/notifications", "POST"))
            .await
            .unwrap();
        assert!(!inlet.status().is_success());
        assert!(!inlet.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_form_style_post_is_not_forwarded() {
        let (state, mut rx) = test_state(4);

        let request = Request::builder()
            .method("POST")
            .uri("/notifications")
            .header("origin", "https://example.com")
            .header("content-type", "text/plain")
            .body(Body::from(r#"{"type":"ready"}"#))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_after_shutdown_is_unavailable() {
        let (state, rx) = test_state(4);
        drop(rx);

        let response = router(state)
            .oneshot(post_json("/notifications", r#"{"type":"ready"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("not accepting"));
    }
}
