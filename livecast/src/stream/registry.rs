//! Process-wide stream registry.

use std::sync::Arc;

use dashmap::DashMap;
use media_store::MediaStore;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::entity::{Stream, StreamStatus};
use crate::Result;
use crate::config::AppConfig;
use crate::ingest::{IngestConfig, IngestSession};

/// Grace period between a successful negotiation and pipeline start,
/// giving the track writers time to create the input files.
const PIPELINE_START_DELAY: Duration = Duration::from_secs(2);

/// Map from stream id to stream record, plus the shared collaborators
/// every stream needs (configuration, object store).
pub struct StreamRegistry {
    streams: DashMap<String, Arc<Stream>>,
    config: Arc<AppConfig>,
    store: Arc<MediaStore>,
    ingest_config: IngestConfig,
}

impl StreamRegistry {
    pub fn new(config: Arc<AppConfig>, store: Arc<MediaStore>) -> Arc<Self> {
        let ingest_config = IngestConfig {
            frame_rate: config.encoder.frame_rate,
            ..IngestConfig::default()
        };
        Arc::new(Self {
            streams: DashMap::new(),
            config,
            store,
            ingest_config,
        })
    }

    /// Allocate a stream with a derived delivery URL.
    pub fn create_stream(
        &self,
        ingest_url: Option<String>,
        storage_path: Option<String>,
        video_duration_secs: Option<f64>,
    ) -> Arc<Stream> {
        self.insert(ingest_url, None, storage_path, video_duration_secs)
    }

    /// Allocate a stream that plays out an already-published HLS URL
    /// instead of the derived one.
    pub fn create_stream_with_hls(
        &self,
        ingest_url: Option<String>,
        hls_playlist_url: String,
        storage_path: Option<String>,
        video_duration_secs: Option<f64>,
    ) -> Arc<Stream> {
        self.insert(
            ingest_url,
            Some(hls_playlist_url),
            storage_path,
            video_duration_secs,
        )
    }

    fn insert(
        &self,
        ingest_url: Option<String>,
        playlist_url: Option<String>,
        storage_path: Option<String>,
        video_duration_secs: Option<f64>,
    ) -> Arc<Stream> {
        let id = uuid::Uuid::new_v4().to_string();
        let playlist_url = playlist_url.unwrap_or_else(|| self.config.storage.playlist_url(&id));
        let storage_path = storage_path.unwrap_or_else(|| self.config.storage.storage_path(&id));

        let stream = Stream::new(
            id.clone(),
            ingest_url,
            playlist_url,
            storage_path,
            video_duration_secs,
        );
        self.streams.insert(id.clone(), Arc::clone(&stream));
        info!(stream_id = %id, "Stream created");
        stream
    }

    pub fn get_stream(&self, id: &str) -> Result<Arc<Stream>> {
        self.streams
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| crate::Error::not_found("Stream", id))
    }

    /// Snapshot of all registered streams.
    pub fn list_streams(&self) -> Vec<Arc<Stream>> {
        self.streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Stop a stream if it is live, then remove it. The stream record
    /// and everything it owns are released with the registry entry.
    pub async fn delete_stream(&self, id: &str) -> Result<()> {
        let stream = self.get_stream(id)?;
        if stream.status() == StreamStatus::Streaming {
            stream.stop().await?;
        }
        self.streams.remove(id);
        info!(stream_id = %id, "Stream deleted");
        Ok(())
    }

    /// Start a stream. When the stream was created with a source URL
    /// (non-live input), the pipeline starts immediately against it;
    /// WebRTC streams get their pipeline after negotiation instead.
    pub async fn start_stream(&self, id: &str) -> Result<()> {
        let stream = self.get_stream(id)?;
        stream.start()?;

        if let Some(ingest_url) = stream.ingest_url.clone() {
            let pipeline = stream.ensure_pipeline(&self.config, Arc::clone(&self.store));
            if let Err(e) = pipeline.start(&ingest_url).await {
                // Started but with no live pipeline; roll the lifecycle
                // forward to Stopped rather than leave a half-open state.
                warn!(stream_id = %id, error = %e, "Pipeline start failed, stopping stream");
                stream.stop().await?;
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn stop_stream(&self, id: &str) -> Result<()> {
        self.get_stream(id)?.stop().await
    }

    /// Client-initiated negotiation: accept the broadcaster's offer and
    /// return the server's answer. Schedules the pipeline start.
    pub async fn negotiate_offer(&self, id: &str, offer_sdp: String) -> Result<String> {
        let stream = self.get_stream(id)?;
        let session = self.ensure_session(&stream).await?;
        let answer = session.handle_offer(offer_sdp).await?;
        self.spawn_pipeline_start(stream);
        Ok(answer)
    }

    /// Server-initiated negotiation: produce an offer for the
    /// broadcaster to answer.
    pub async fn create_negotiation_offer(&self, id: &str) -> Result<String> {
        let stream = self.get_stream(id)?;
        let session = self.ensure_session(&stream).await?;
        session.create_offer().await
    }

    /// Complete a server-initiated negotiation with the broadcaster's
    /// answer. Schedules the pipeline start.
    pub async fn negotiate_answer(&self, id: &str, answer_sdp: String) -> Result<()> {
        let stream = self.get_stream(id)?;
        let session = stream.session().ok_or_else(|| {
            crate::Error::illegal_state("no media session", "complete negotiation")
        })?;
        session.handle_answer(answer_sdp).await?;
        self.spawn_pipeline_start(stream);
        Ok(())
    }

    /// Number of streams currently live.
    pub fn active_count(&self) -> usize {
        self.streams
            .iter()
            .filter(|entry| entry.value().status() == StreamStatus::Streaming)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.streams.len()
    }

    /// Stop every live stream. Used on process shutdown.
    pub async fn stop_all(&self) {
        for stream in self.list_streams() {
            if stream.status() != StreamStatus::Streaming {
                continue;
            }
            if let Err(e) = stream.stop().await {
                warn!(stream_id = %stream.id, error = %e, "Error stopping stream during shutdown");
            }
        }
    }

    async fn ensure_session(&self, stream: &Arc<Stream>) -> Result<Arc<IngestSession>> {
        if let Some(session) = stream.session() {
            return Ok(session);
        }
        let session = IngestSession::new(
            &stream.id,
            self.config.scratch.ingest_path(&stream.id),
            &self.ingest_config,
        )
        .await?;
        stream.set_session(Arc::clone(&session));
        Ok(session)
    }

    /// After a successful negotiation, start the pipeline once the track
    /// writers have had a moment to create the input files.
    fn spawn_pipeline_start(&self, stream: Arc<Stream>) {
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            tokio::time::sleep(PIPELINE_START_DELAY).await;
            match begin_streaming(&config, store, &stream).await {
                Ok(()) => {}
                Err(crate::Error::AlreadyRunning) => {
                    debug!(stream_id = %stream.id, "Pipeline already running");
                }
                Err(e) => {
                    warn!(stream_id = %stream.id, error = %e, "Failed to start pipeline after negotiation");
                }
            }
        });
    }
}

/// Move a negotiated stream into the Streaming state and start its
/// pipeline against the ingest files.
async fn begin_streaming(
    config: &Arc<AppConfig>,
    store: Arc<MediaStore>,
    stream: &Arc<Stream>,
) -> Result<()> {
    let session = stream
        .session()
        .ok_or_else(|| crate::Error::illegal_state("no media session", "start pipeline"))?;

    match stream.start() {
        Ok(()) | Err(crate::Error::AlreadyRunning) => {}
        Err(e) => return Err(e),
    }

    let pipeline = stream.ensure_pipeline(config, Arc::clone(&store));
    let input = session.input_spec(config.encoder.use_ingest_audio);
    pipeline.start(&input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, ScratchConfig, ServerConfig, StorageSettings};
    use opendal::Operator;

    fn test_registry() -> Arc<StreamRegistry> {
        let dir = std::env::temp_dir().join(format!("livecast-test-{}", uuid::Uuid::new_v4()));
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
        StreamRegistry::new(config, store)
    }

    #[tokio::test]
    async fn create_get_list_delete_roundtrip() {
        let registry = test_registry();
        let stream = registry.create_stream(None, None, None);
        let id = stream.id.clone();

        assert_eq!(registry.total_count(), 1);
        assert_eq!(registry.get_stream(&id).unwrap().id, id);
        assert_eq!(registry.list_streams().len(), 1);

        registry.delete_stream(&id).await.unwrap();
        assert_eq!(registry.total_count(), 0);
        assert!(matches!(
            registry.get_stream(&id).unwrap_err(),
            crate::Error::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn stream_ids_are_unique() {
        let registry = test_registry();
        let a = registry.create_stream(None, None, None);
        let b = registry.create_stream(None, None, None);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn derived_urls_follow_configuration() {
        let registry = test_registry();
        let stream = registry.create_stream(None, None, None);
        assert_eq!(
            stream.playlist_url,
            format!("https://cdn.example.com/{}/playlist.m3u8", stream.id)
        );
        assert_eq!(stream.storage_path, format!("upload/videos/{}", stream.id));
    }

    #[tokio::test]
    async fn hls_url_override_is_respected() {
        let registry = test_registry();
        let stream = registry.create_stream_with_hls(
            None,
            "https://elsewhere.example.com/x/playlist.m3u8".to_string(),
            None,
            Some(120.0),
        );
        assert_eq!(
            stream.playlist_url,
            "https://elsewhere.example.com/x/playlist.m3u8"
        );
        assert_eq!(stream.video_duration_secs, Some(120.0));
    }

    #[tokio::test]
    async fn delete_stops_a_live_stream() {
        let registry = test_registry();
        let stream = registry.create_stream(None, None, None);
        let id = stream.id.clone();

        stream.start().unwrap();
        assert_eq!(registry.active_count(), 1);

        registry.delete_stream(&id).await.unwrap();
        assert_eq!(stream.status(), StreamStatus::Stopped);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.get_stream(&id).is_err());
    }

    #[tokio::test]
    async fn negotiate_on_unknown_stream_is_not_found() {
        let registry = test_registry();
        let err = registry
            .negotiate_offer("nope", "v=0".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn start_requires_known_stream() {
        let registry = test_registry();
        assert!(matches!(
            registry.start_stream("nope").await.unwrap_err(),
            crate::Error::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn stop_all_stops_live_streams() {
        let registry = test_registry();
        let a = registry.create_stream(None, None, None);
        let b = registry.create_stream(None, None, None);
        a.start().unwrap();
        b.start().unwrap();

        registry.stop_all().await;
        assert_eq!(registry.active_count(), 0);
        assert_eq!(a.status(), StreamStatus::Stopped);
        assert_eq!(b.status(), StreamStatus::Stopped);
    }
}
