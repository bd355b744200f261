//! API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineStats;
use crate::stream::{StreamSnapshot, StreamStatus};

/// Request to create a stream.
#[derive(Debug, Default, Deserialize)]
pub struct CreateStreamRequest {
    /// Optional source handle for non-live inputs (a file path or URL
    /// the encoder reads directly).
    pub ingest_url: Option<String>,
    /// Optional already-published HLS master URL; when set the stream
    /// plays out this URL instead of the derived one.
    pub hls_playlist_url: Option<String>,
    /// Optional storage-prefix override.
    pub storage_path: Option<String>,
    /// Duration of a finite input, for the looped position pointer.
    pub video_duration_secs: Option<f64>,
}

/// Envelope around a single stream.
#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub success: bool,
    pub stream: StreamSnapshot,
}

impl StreamResponse {
    pub fn new(stream: StreamSnapshot) -> Self {
        Self {
            success: true,
            stream,
        }
    }
}

/// Envelope around a stream listing.
#[derive(Debug, Serialize)]
pub struct StreamListResponse {
    pub success: bool,
    pub count: usize,
    pub streams: Vec<StreamSnapshot>,
}

/// Generic success envelope.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Per-stream statistics.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stream_id: String,
    pub status: StreamStatus,
    pub viewer_count: usize,
    pub position_secs: u64,
    /// Present once a pipeline has been created for the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineStats>,
}

/// A session description carried over the control API. Matches the
/// browser's `RTCSessionDescription` JSON shape.
#[derive(Debug, Deserialize)]
pub struct SdpRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub sdp: String,
}

/// Negotiation result.
#[derive(Debug, Serialize)]
pub struct SdpResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SdpResponse {
    pub fn offer(sdp: String) -> Self {
        Self {
            success: true,
            kind: "offer".to_string(),
            sdp,
        }
    }

    pub fn answer(sdp: String) -> Self {
        Self {
            success: true,
            kind: "answer".to_string(),
            sdp,
        }
    }
}

/// Request to broadcast a control frame to a stream's subscribers.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: serde_json::Value,
}

/// Health report.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_streams: usize,
    pub total_streams: usize,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdp_request_accepts_browser_shape() {
        let req: SdpRequest =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(req.kind.as_deref(), Some("offer"));
        assert_eq!(req.sdp, "v=0\r\n");

        // The type field is optional.
        let req: SdpRequest = serde_json::from_str(r#"{"sdp":"v=0"}"#).unwrap();
        assert!(req.kind.is_none());
    }

    #[test]
    fn sdp_response_serializes_type_field() {
        let json = serde_json::to_string(&SdpResponse::answer("v=0".into())).unwrap();
        assert!(json.contains("\"type\":\"answer\""));
        assert!(json.contains("\"success\":true"));
    }

    #[test]
    fn create_request_fields_are_optional() {
        let req: CreateStreamRequest = serde_json::from_str("{}").unwrap();
        assert!(req.ingest_url.is_none());
        assert!(req.hls_playlist_url.is_none());
        assert!(req.storage_path.is_none());
        assert!(req.video_duration_secs.is_none());
    }
}
