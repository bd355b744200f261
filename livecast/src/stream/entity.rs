//! Stream entity and its fan-out loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use media_store::MediaStore;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::ControlFrame;
use super::subscriber::{SubscriberHandle, SubscriberSlot, new_subscriber};
use crate::Result;
use crate::config::AppConfig;
use crate::ingest::IngestSession;
use crate::pipeline::PipelineOrchestrator;

/// Depth of the broadcast bus. Producers drop rather than block when
/// fan-out falls behind.
const BUS_CAPACITY: usize = 64;

/// Lifecycle status of a stream. Transitions are monotone; `Stopped` is
/// terminal and a restart requires a new stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Idle,
    Streaming,
    Stopped,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Serializable view of a stream for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub id: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_url: Option<String>,
    pub playlist_url: String,
    pub storage_path: String,
    pub viewer_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_duration_secs: Option<f64>,
    pub position_secs: u64,
}

struct StreamState {
    status: StreamStatus,
    started_at: Option<DateTime<Utc>>,
    subscribers: HashMap<String, SubscriberSlot>,
    bus_tx: Option<mpsc::Sender<ControlFrame>>,
    session: Option<Arc<IngestSession>>,
    pipeline: Option<Arc<PipelineOrchestrator>>,
}

/// One logical stream: lifecycle, ingest session, pipeline, and the
/// subscriber set.
pub struct Stream {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub ingest_url: Option<String>,
    pub playlist_url: String,
    pub storage_path: String,
    pub video_duration_secs: Option<f64>,
    shutdown: CancellationToken,
    state: Arc<Mutex<StreamState>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("playlist_url", &self.playlist_url)
            .field("storage_path", &self.storage_path)
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub(super) fn new(
        id: String,
        ingest_url: Option<String>,
        playlist_url: String,
        storage_path: String,
        video_duration_secs: Option<f64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            created_at: Utc::now(),
            ingest_url,
            playlist_url,
            storage_path,
            video_duration_secs,
            shutdown: CancellationToken::new(),
            state: Arc::new(Mutex::new(StreamState {
                status: StreamStatus::Idle,
                started_at: None,
                subscribers: HashMap::new(),
                bus_tx: None,
                session: None,
                pipeline: None,
            })),
        })
    }

    pub fn status(&self) -> StreamStatus {
        self.state.lock().status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    /// Number of live subscribers. Always equals the subscriber-set
    /// cardinality because both live behind the same lock.
    pub fn viewer_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.state.lock();
        StreamSnapshot {
            id: self.id.clone(),
            status: state.status,
            created_at: self.created_at,
            started_at: state.started_at,
            ingest_url: self.ingest_url.clone(),
            playlist_url: self.playlist_url.clone(),
            storage_path: self.storage_path.clone(),
            viewer_count: state.subscribers.len(),
            video_duration_secs: self.video_duration_secs,
            position_secs: position_secs(state.started_at, Utc::now(), self.video_duration_secs),
        }
    }

    /// Transition Idle → Streaming and spawn the fan-out loop.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            StreamStatus::Idle => {}
            StreamStatus::Streaming => return Err(crate::Error::AlreadyRunning),
            StreamStatus::Stopped => {
                return Err(crate::Error::illegal_state("stopped", "start"));
            }
        }

        let (bus_tx, bus_rx) = mpsc::channel(BUS_CAPACITY);
        state.status = StreamStatus::Streaming;
        state.started_at = Some(Utc::now());
        state.bus_tx = Some(bus_tx);
        drop(state);

        tokio::spawn(fan_out(
            self.id.clone(),
            Arc::clone(&self.state),
            bus_rx,
            self.shutdown.clone(),
        ));

        info!(stream_id = %self.id, "Stream started");
        Ok(())
    }

    /// Transition Streaming → Stopped: stop the pipeline, close the
    /// ingest session, cancel the shutdown signal, and close every
    /// subscriber queue exactly once. Calling stop on an already-stopped
    /// stream is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (pipeline, session, subscribers) = {
            let mut state = self.state.lock();
            match state.status {
                StreamStatus::Streaming => {}
                StreamStatus::Stopped => return Ok(()),
                StreamStatus::Idle => {
                    return Err(crate::Error::illegal_state("idle", "stop"));
                }
            }
            state.status = StreamStatus::Stopped;
            state.bus_tx = None;
            (
                state.pipeline.take(),
                state.session.take(),
                std::mem::take(&mut state.subscribers),
            )
        };

        if let Some(pipeline) = pipeline {
            pipeline.stop().await;
        }
        if let Some(session) = session {
            session.close().await;
        }

        self.shutdown.cancel();
        // Dropping the slots closes each subscriber queue; the set was
        // drained exactly once above.
        let closed = subscribers.len();
        drop(subscribers);

        info!(stream_id = %self.id, closed_subscribers = closed, "Stream stopped");
        Ok(())
    }

    /// Attach a viewer. Fails once the stream has stopped.
    pub fn add_subscriber(&self) -> Result<SubscriberHandle> {
        let mut state = self.state.lock();
        if state.status == StreamStatus::Stopped {
            return Err(crate::Error::illegal_state("stopped", "subscribe"));
        }
        let (slot, handle) = new_subscriber();
        state.subscribers.insert(handle.id.clone(), slot);
        debug!(
            stream_id = %self.id,
            subscriber_id = %handle.id,
            viewers = state.subscribers.len(),
            "Subscriber attached"
        );
        Ok(handle)
    }

    /// Detach a viewer, closing its queue. Unknown ids are ignored so
    /// disconnect races with stop are harmless.
    pub fn remove_subscriber(&self, subscriber_id: &str) {
        let mut state = self.state.lock();
        if state.subscribers.remove(subscriber_id).is_some() {
            debug!(
                stream_id = %self.id,
                subscriber_id,
                viewers = state.subscribers.len(),
                "Subscriber detached"
            );
        }
    }

    /// Enqueue a frame on the bus. A full bus drops the frame silently;
    /// viewers must tolerate gaps.
    pub fn broadcast(&self, frame: ControlFrame) -> Result<()> {
        let bus_tx = {
            let state = self.state.lock();
            state
                .bus_tx
                .clone()
                .ok_or_else(|| crate::Error::illegal_state(state.status.to_string(), "broadcast"))?
        };

        if let Err(mpsc::error::TrySendError::Full(_)) = bus_tx.try_send(frame) {
            debug!(stream_id = %self.id, "Bus full, dropping frame");
        }
        Ok(())
    }

    /// Synchronized "now playing" pointer for finite looped inputs:
    /// uptime modulo the input duration, 0 when no duration is set.
    pub fn current_position(&self) -> u64 {
        position_secs(self.started_at(), Utc::now(), self.video_duration_secs)
    }

    pub fn session(&self) -> Option<Arc<IngestSession>> {
        self.state.lock().session.clone()
    }

    pub fn set_session(&self, session: Arc<IngestSession>) {
        self.state.lock().session = Some(session);
    }

    pub fn pipeline(&self) -> Option<Arc<PipelineOrchestrator>> {
        self.state.lock().pipeline.clone()
    }

    /// Get or create the stream's pipeline orchestrator. A stream owns
    /// at most one.
    pub fn ensure_pipeline(
        &self,
        config: &AppConfig,
        store: Arc<MediaStore>,
    ) -> Arc<PipelineOrchestrator> {
        let mut state = self.state.lock();
        if let Some(pipeline) = &state.pipeline {
            return Arc::clone(pipeline);
        }
        let pipeline = Arc::new(PipelineOrchestrator::new(&self.id, config, store));
        state.pipeline = Some(Arc::clone(&pipeline));
        pipeline
    }
}

/// Single fan-out loop per streaming stream: drain the bus and enqueue
/// each frame onto every subscriber queue without blocking, dropping on
/// overflow.
async fn fan_out(
    stream_id: String,
    state: Arc<Mutex<StreamState>>,
    mut bus_rx: mpsc::Receiver<ControlFrame>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = bus_rx.recv() => {
                let Some(frame) = frame else { break };
                let guard = state.lock();
                for (id, slot) in &guard.subscribers {
                    if let Err(mpsc::error::TrySendError::Full(_)) =
                        slot.tx.try_send(frame.clone())
                    {
                        warn!(
                            stream_id = %stream_id,
                            subscriber_id = %id,
                            "Subscriber queue full, dropping frame"
                        );
                    }
                }
            }
        }
    }
    debug!(stream_id = %stream_id, "Fan-out loop terminated");
}

/// Uptime modulo duration, both floored to whole seconds.
fn position_secs(
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    duration_secs: Option<f64>,
) -> u64 {
    let (Some(started_at), Some(duration)) = (started_at, duration_secs) else {
        return 0;
    };
    if duration < 1.0 {
        return 0;
    }
    let uptime = (now - started_at).num_seconds().max(0) as u64;
    uptime % (duration.floor() as u64)
}
