//! Per-stream pipeline orchestration.
//!
//! Composes the encoder supervisor and the HLS uploader for one stream:
//! waits for the ingest file(s) to materialize, starts the encoder,
//! starts the uploader, and tears both down in the reverse order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use media_store::MediaStore;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::encoder::{EncoderInput, FfmpegSupervisor};
use crate::uploader::HlsUploader;

/// How long the orchestrator waits for ingest files before starting the
/// encoder anyway.
const INPUT_READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Poll interval while waiting for ingest files.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Minimum bytes an ingest file must reach before it counts as ready.
const MIN_INPUT_BYTES: u64 = 1024;

/// Pipeline status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub output_path: String,
    pub playlist_url: String,
}

struct OrchestratorState {
    uploader: Option<HlsUploader>,
}

/// Orchestrator for one stream's encode-and-publish pipeline.
///
/// Owns the encoder child and the uploader; both hang off a single
/// cancellation scope so stopping the orchestrator stops everything
/// beneath it.
pub struct PipelineOrchestrator {
    stream_id: String,
    output_root: PathBuf,
    key_prefix: String,
    playlist_url: String,
    store: Arc<MediaStore>,
    encoder: FfmpegSupervisor,
    token: CancellationToken,
    state: tokio::sync::Mutex<OrchestratorState>,
    running: AtomicBool,
}

impl PipelineOrchestrator {
    pub fn new(stream_id: impl Into<String>, config: &AppConfig, store: Arc<MediaStore>) -> Self {
        let stream_id = stream_id.into();
        Self {
            output_root: config.scratch.hls_path(&stream_id),
            key_prefix: config.storage.storage_path(&stream_id),
            playlist_url: config.storage.playlist_url(&stream_id),
            store,
            encoder: FfmpegSupervisor::new(config.encoder.clone()),
            token: CancellationToken::new(),
            state: tokio::sync::Mutex::new(OrchestratorState { uploader: None }),
            running: AtomicBool::new(false),
            stream_id,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the pipeline for the given input spec (a path, a
    /// pipe-delimited `video|audio` pair, or a source URL).
    pub async fn start(&self, input_spec: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(crate::Error::AlreadyRunning);
        }
        // The orchestrator's scope dies with its first stop; a stopped
        // stream gets a fresh orchestrator, never a restart.
        if self.token.is_cancelled() {
            return Err(crate::Error::illegal_state("stopped", "start pipeline"));
        }

        let input = EncoderInput::parse(input_spec);

        // A missing or short input downgrades to a warning: the encoder
        // blocks briefly on empty inputs itself and its own logs beat a
        // refusal to start.
        if !await_input_ready(
            &input.paths(),
            MIN_INPUT_BYTES,
            INPUT_READY_TIMEOUT,
            INPUT_POLL_INTERVAL,
        )
        .await
        {
            warn!(
                stream_id = %self.stream_id,
                input = %input,
                "Input not ready after {:?}; starting encoder anyway",
                INPUT_READY_TIMEOUT
            );
        }

        tokio::fs::create_dir_all(&self.output_root).await?;

        self.encoder
            .start(&self.token, &input, &self.stream_id, &self.output_root)?;

        let uploader = HlsUploader::new(
            self.stream_id.as_str(),
            self.output_root.as_path(),
            self.key_prefix.as_str(),
            Arc::clone(&self.store),
            &self.token,
        );
        if let Err(e) = uploader.start() {
            self.encoder.stop();
            return Err(e);
        }

        state.uploader = Some(uploader);
        self.running.store(true, Ordering::SeqCst);
        info!(stream_id = %self.stream_id, input = %input, "Pipeline started");
        Ok(())
    }

    /// Stop the pipeline: uploader first, then the encoder, then the
    /// shared cancellation scope. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(uploader) = state.uploader.take() {
            uploader.stop();
        }
        self.encoder.stop();
        self.token.cancel();
        if self.running.swap(false, Ordering::SeqCst) {
            info!(stream_id = %self.stream_id, "Pipeline stopped");
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            running: self.is_running() && self.encoder.is_running(),
            output_path: self.output_root.display().to_string(),
            playlist_url: self.playlist_url.clone(),
        }
    }
}

/// Poll `paths` until each exists with at least `min_bytes`, or the
/// timeout elapses. Non-filesystem inputs (URLs) are skipped. Returns
/// whether every path became ready.
async fn await_input_ready(
    paths: &[&str],
    min_bytes: u64,
    timeout: Duration,
    poll: Duration,
) -> bool {
    let file_paths: Vec<&str> = paths.iter().copied().filter(|p| !p.contains("://")).collect();
    if file_paths.is_empty() {
        return true;
    }

    let deadline = Instant::now() + timeout;
    loop {
        let ready = file_paths.iter().all(|p| {
            std::fs::metadata(Path::new(p))
                .map(|m| m.len() >= min_bytes)
                .unwrap_or(false)
        });
        if ready {
            debug!(?file_paths, "Pipeline inputs ready");
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
