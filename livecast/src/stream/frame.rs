//! Control frames delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A JSON control event on a stream's viewer channel.
///
/// This is the control path only; media bytes never travel here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// First frame every subscriber receives.
    Connected {
        stream_id: String,
        subscriber_id: String,
        connected_at: DateTime<Utc>,
    },
    /// An application-level broadcast.
    Broadcast {
        message: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl ControlFrame {
    pub fn broadcast(message: serde_json::Value) -> Self {
        Self::Broadcast {
            message,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_tag_their_type() {
        let frame = ControlFrame::broadcast(serde_json::json!("m1"));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"broadcast\""));
        assert!(json.contains("\"m1\""));

        let connected = ControlFrame::Connected {
            stream_id: "s".into(),
            subscriber_id: "v".into(),
            connected_at: Utc::now(),
        };
        let json = serde_json::to_string(&connected).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
    }
}
