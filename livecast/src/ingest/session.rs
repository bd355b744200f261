//! Per-stream WebRTC session.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use super::writer;
use crate::Result;

/// Keyframe request cadence while a video track is live.
const PLI_INTERVAL: Duration = Duration::from_secs(3);

/// Ingest session configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// STUN servers used for candidate gathering.
    pub stun_servers: Vec<String>,
    /// Frame rate stamped into the video container header.
    pub frame_rate: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            frame_rate: 30,
        }
    }
}

/// One broadcaster's media session.
///
/// Owns the peer connection and the on-disk track writers. Created
/// lazily on the first negotiation call for a stream; closed on stream
/// stop or deletion.
pub struct IngestSession {
    stream_id: String,
    output_dir: PathBuf,
    pc: Arc<RTCPeerConnection>,
    frame_rate: u32,
    closed: AtomicBool,
}

impl IngestSession {
    /// Create a session and install its track handlers.
    pub async fn new(
        stream_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        config: &IngestConfig,
    ) -> Result<Arc<Self>> {
        let stream_id = stream_id.into();
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir).await?;

        let pc = build_peer(config).await?;
        let session = Arc::new(Self {
            stream_id,
            output_dir,
            pc,
            frame_rate: config.frame_rate,
            closed: AtomicBool::new(false),
        });
        Self::install_handlers(&session);
        Ok(session)
    }

    /// Path of the persisted video container.
    pub fn video_path(&self) -> PathBuf {
        self.output_dir.join("video.ivf")
    }

    /// Path of the persisted audio file.
    pub fn audio_path(&self) -> PathBuf {
        self.output_dir.join("audio.ogg")
    }

    /// Encoder input spec for this session's files.
    pub fn input_spec(&self, with_audio: bool) -> String {
        if with_audio {
            format!(
                "{}|{}",
                self.video_path().display(),
                self.audio_path().display()
            )
        } else {
            self.video_path().display().to_string()
        }
    }

    /// Client-initiated negotiation: take the broadcaster's offer and
    /// return the server's answer.
    pub async fn handle_offer(&self, offer_sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| crate::Error::invalid_argument(format!("Malformed offer SDP: {}", e)))?;

        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        self.local_sdp().await
    }

    /// Server-initiated negotiation: produce an offer with receive-only
    /// media sections for the broadcaster to answer.
    pub async fn create_offer(&self) -> Result<String> {
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            self.pc
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await?;
        }

        let offer = self.pc.create_offer(None).await?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = gather_complete.recv().await;

        self.local_sdp().await
    }

    /// Complete a previously created offer with the broadcaster's
    /// answer.
    pub async fn handle_answer(&self, answer_sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| crate::Error::invalid_argument(format!("Malformed answer SDP: {}", e)))?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    /// Close the peer and release the on-disk writers. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!(stream_id = %self.stream_id, error = %e, "Error closing peer connection");
        }
        info!(stream_id = %self.stream_id, "Ingest session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn local_sdp(&self) -> Result<String> {
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| crate::Error::internal("Peer has no local description"))
    }

    fn install_handlers(session: &Arc<Self>) {
        let weak = Arc::downgrade(session);
        session.pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                debug!(stream_id = %session.stream_id, ?state, "Peer connection state changed");
                if state == RTCPeerConnectionState::Failed {
                    warn!(stream_id = %session.stream_id, "Peer connection failed, closing session");
                    session.close().await;
                }
            })
        }));

        let weak = Arc::downgrade(session);
        session.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };

                match track.kind() {
                    RTPCodecType::Video => {
                        Self::spawn_keyframe_requests(&session, track.ssrc());
                        let path = session.video_path();
                        let stream_id = session.stream_id.clone();
                        let frame_rate = session.frame_rate;
                        tokio::spawn(async move {
                            writer::persist_video(&stream_id, track, &path, frame_rate).await;
                        });
                    }
                    RTPCodecType::Audio => {
                        let path = session.audio_path();
                        let stream_id = session.stream_id.clone();
                        tokio::spawn(async move {
                            writer::persist_audio(&stream_id, track, &path).await;
                        });
                    }
                    _ => {
                        debug!(stream_id = %session.stream_id, "Ignoring track of unknown kind");
                    }
                }
            })
        }));
    }

    /// Periodically ask the broadcaster for a keyframe so the encoder
    /// never starts mid-GOP.
    fn spawn_keyframe_requests(session: &Arc<Self>, media_ssrc: u32) {
        let weak = Arc::downgrade(session);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PLI_INTERVAL).await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if session.is_closed() {
                    break;
                }
                let pli = PictureLossIndication {
                    sender_ssrc: 0,
                    media_ssrc,
                };
                if session.pc.write_rtcp(&[Box::new(pli)]).await.is_err() {
                    break;
                }
            }
        });
    }
}

async fn build_peer(config: &IngestConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    Ok(Arc::new(api.new_peer_connection(rtc_config).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> IngestConfig {
        IngestConfig {
            stun_servers: vec![],
            frame_rate: 30,
        }
    }

    async fn test_session(dir: &std::path::Path) -> Arc<IngestSession> {
        IngestSession::new("abc", dir.join("abc"), &offline_config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn input_spec_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path()).await;

        let video_only = session.input_spec(false);
        assert!(video_only.ends_with("abc/video.ivf"));
        assert!(!video_only.contains('|'));

        let both = session.input_spec(true);
        assert!(both.contains("video.ivf|"));
        assert!(both.ends_with("audio.ogg"));

        session.close().await;
    }

    #[tokio::test]
    async fn create_offer_has_receive_media_sections() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path()).await;

        let sdp = session.create_offer().await.unwrap();
        assert!(sdp.contains("m=video"));
        assert!(sdp.contains("m=audio"));

        session.close().await;
    }

    #[tokio::test]
    async fn malformed_offer_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path()).await;

        let err = session
            .handle_offer("this is not sdp".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidArgument(_)));

        session.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path()).await;

        session.close().await;
        assert!(session.is_closed());
        session.close().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let _session = test_session(dir.path()).await;
        assert!(dir.path().join("abc").is_dir());
    }
}
