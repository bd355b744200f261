//! API route modules.

pub mod health;
pub mod negotiate;
pub mod streams;
pub mod subscribe;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/streams", streams::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use media_store::MediaStore;
    use opendal::Operator;

    use crate::api::server::AppState;
    use crate::config::{AppConfig, EncoderConfig, ScratchConfig, ServerConfig, StorageSettings};
    use crate::stream::StreamRegistry;

    /// State over a memory store and a throwaway scratch root.
    pub(crate) fn test_state() -> AppState {
        let dir = std::env::temp_dir().join(format!("livecast-api-test-{}", uuid::Uuid::new_v4()));
        let config = Arc::new(AppConfig {
            server: ServerConfig::default(),
            storage: StorageSettings {
                bucket: "test-bucket".to_string(),
                credentials_path: None,
                media_prefix: "upload/videos".to_string(),
                cdn_base_url: "https://cdn.example.com".to_string(),
                public_base: "https://storage.example.com".to_string(),
            },
            scratch: ScratchConfig {
                ingest_dir: dir.join("ingest"),
                hls_dir: dir.join("hls"),
            },
            encoder: EncoderConfig {
                ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
                ..Default::default()
            },
        });
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let store = Arc::new(MediaStore::with_operator(
            op,
            "test-bucket",
            "https://storage.example.com",
            false,
        ));
        let registry = StreamRegistry::new(Arc::clone(&config), Arc::clone(&store));
        AppState::new(config, registry, store)
    }
}
