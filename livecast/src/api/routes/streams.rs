//! Stream lifecycle routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};

use crate::api::error::ApiResult;
use crate::api::models::{
    BroadcastRequest, CreateStreamRequest, MessageResponse, StatsResponse, StreamListResponse,
    StreamResponse,
};
use crate::api::server::AppState;
use crate::stream::ControlFrame;

/// Create the streams router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_stream))
        .route("/", get(list_streams))
        .route("/{id}", get(get_stream))
        .route("/{id}", delete(delete_stream))
        .route("/{id}/start", post(start_stream))
        .route("/{id}/stop", post(stop_stream))
        .route("/{id}/stats", get(get_stats))
        .route("/{id}/broadcast", post(broadcast))
        .route(
            "/{id}/offer",
            get(super::negotiate::create_offer).post(super::negotiate::handle_offer),
        )
        .route("/{id}/answer", post(super::negotiate::handle_answer))
        .route("/{id}/subscribe", get(super::subscribe::subscribe))
}

pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateStreamRequest>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = match request.hls_playlist_url {
        Some(playlist_url) => state.registry.create_stream_with_hls(
            request.ingest_url,
            playlist_url,
            request.storage_path,
            request.video_duration_secs,
        ),
        None => state.registry.create_stream(
            request.ingest_url,
            request.storage_path,
            request.video_duration_secs,
        ),
    };
    Ok(Json(StreamResponse::new(stream.snapshot())))
}

pub async fn list_streams(State(state): State<AppState>) -> ApiResult<Json<StreamListResponse>> {
    let streams: Vec<_> = state
        .registry
        .list_streams()
        .iter()
        .map(|s| s.snapshot())
        .collect();
    Ok(Json(StreamListResponse {
        success: true,
        count: streams.len(),
        streams,
    }))
}

pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = state.registry.get_stream(&id)?;
    Ok(Json(StreamResponse::new(stream.snapshot())))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.registry.delete_stream(&id).await?;
    Ok(Json(MessageResponse::new("Stream deleted")))
}

pub async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    state.registry.start_stream(&id).await?;
    let stream = state.registry.get_stream(&id)?;
    Ok(Json(StreamResponse::new(stream.snapshot())))
}

pub async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    state.registry.stop_stream(&id).await?;
    let stream = state.registry.get_stream(&id)?;
    Ok(Json(StreamResponse::new(stream.snapshot())))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatsResponse>> {
    let stream = state.registry.get_stream(&id)?;
    let snapshot = stream.snapshot();
    Ok(Json(StatsResponse {
        success: true,
        stream_id: snapshot.id,
        status: snapshot.status,
        viewer_count: snapshot.viewer_count,
        position_secs: snapshot.position_secs,
        pipeline: stream.pipeline().map(|p| p.stats()),
    }))
}

pub async fn broadcast(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BroadcastRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let stream = state.registry.get_stream(&id)?;
    stream.broadcast(ControlFrame::broadcast(request.message))?;
    Ok(Json(MessageResponse::new("Broadcast enqueued")))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::routes::{create_router, tests::test_state};

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_then_delete() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/streams", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        let id = body["stream"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["stream"]["status"], "idle");
        assert_eq!(body["stream"]["viewer_count"], 0);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/streams/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/streams/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/streams/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/streams/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn list_reflects_created_streams() {
        let app = create_router(test_state());

        for _ in 0..2 {
            app.clone()
                .oneshot(json_request("POST", "/api/streams", "{}"))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/streams")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["streams"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stats_for_idle_stream() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/streams",
                r#"{"video_duration_secs": 300.0}"#,
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["stream"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/streams/{}/stats", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "idle");
        assert_eq!(body["position_secs"], 0);
        assert!(body.get("pipeline").is_none());
    }

    #[tokio::test]
    async fn broadcast_to_idle_stream_conflicts() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/streams", "{}"))
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["stream"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/api/streams/{}/broadcast", id),
                r#"{"message": "m1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn negotiation_on_unknown_stream_is_not_found() {
        let app = create_router(test_state());
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/streams/nope/offer",
                r#"{"type":"offer","sdp":"v=0"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
