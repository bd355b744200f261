//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;

use crate::api::error::ApiResult;
use crate::api::models::HealthResponse;
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint: active vs total streams and the current
/// instant.
async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_streams: state.registry.active_count(),
        total_streams: state.registry.total_count(),
        timestamp: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::routes::{create_router, tests::test_state};

    #[tokio::test]
    async fn health_reports_stream_counts() {
        let state = test_state();
        let registry = state.registry.clone();
        let app = create_router(state);

        let stream = registry.create_stream(None, None, None);
        stream.start().unwrap();
        registry.create_stream(None, None, None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_streams"], 1);
        assert_eq!(body["total_streams"], 2);

        stream.stop().await.unwrap();
    }
}
