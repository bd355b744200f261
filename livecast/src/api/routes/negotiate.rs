//! Media-session negotiation routes.
//!
//! Delegate to the stream's ingest session. After a successful
//! offer/answer exchange the registry schedules the pipeline start once
//! the track writers have created the input files.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::error::ApiResult;
use crate::api::models::{MessageResponse, SdpRequest, SdpResponse};
use crate::api::server::AppState;

/// `GET /{id}/offer` — server-initiated: produce an offer for the
/// broadcaster to answer.
pub async fn create_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SdpResponse>> {
    let sdp = state.registry.create_negotiation_offer(&id).await?;
    Ok(Json(SdpResponse::offer(sdp)))
}

/// `POST /{id}/offer` — client-initiated: accept the broadcaster's
/// offer and return the answer.
pub async fn handle_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SdpRequest>,
) -> ApiResult<Json<SdpResponse>> {
    if request.sdp.trim().is_empty() {
        return Err(crate::Error::invalid_argument("Offer SDP must not be empty").into());
    }
    let answer = state.registry.negotiate_offer(&id, request.sdp).await?;
    Ok(Json(SdpResponse::answer(answer)))
}

/// `POST /{id}/answer` — complete a server-initiated negotiation.
pub async fn handle_answer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SdpRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if request.sdp.trim().is_empty() {
        return Err(crate::Error::invalid_argument("Answer SDP must not be empty").into());
    }
    state.registry.negotiate_answer(&id, request.sdp).await?;
    Ok(Json(MessageResponse::new("Negotiation complete")))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::routes::{create_router, tests::test_state};

    #[tokio::test]
    async fn empty_sdp_is_rejected() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/streams")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = body["stream"]["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/streams/{}/offer", id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sdp":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn answer_without_session_conflicts() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/streams")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = body["stream"]["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/streams/{}/answer", id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sdp":"v=0"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
