// crates/server/src/lib.rs
//! Docflow server library.
//!
//! Axum HTTP/WebSocket surface over the job event broker: document upload
//! starts an ingestion job, and clients follow its progress over a
//! WebSocket that survives reconnects.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use config::{Cli, ServerConfig};
pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - Health, job and progress WebSocket routes
/// - CORS (allows any origin; the upload UI is served elsewhere)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use tower::ServiceExt;

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_app(AppState::for_testing(Duration::ZERO));
        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
        assert!(body.contains("\"active_jobs\":0"));
    }

    #[tokio::test]
    async fn test_list_jobs_empty() {
        let app = create_app(AppState::for_testing(Duration::ZERO));
        let (status, body) = get(app, "/api/jobs").await;

        assert_eq!(status, StatusCode::OK);
        let json: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert!(json.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = create_app(AppState::for_testing(Duration::ZERO));
        let (status, _) = get(app, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
