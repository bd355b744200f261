//! Connected viewers of a stream's control channel.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::frame::ControlFrame;

/// Outbound queue depth per subscriber. The fan-out loop drops frames
/// rather than block when a slow consumer falls this far behind.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 16;

/// Sender half kept in the stream's subscriber set. Dropping it closes
/// the subscriber's queue; removal from the set is therefore the single
/// close point.
#[derive(Debug)]
pub(super) struct SubscriberSlot {
    pub tx: mpsc::Sender<ControlFrame>,
    pub connected_at: DateTime<Utc>,
}

/// Receiver half handed to the delivery task (the SSE handler).
#[derive(Debug)]
pub struct SubscriberHandle {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub rx: mpsc::Receiver<ControlFrame>,
}

pub(super) fn new_subscriber() -> (SubscriberSlot, SubscriberHandle) {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
    let connected_at = Utc::now();
    let handle = SubscriberHandle {
        id: uuid::Uuid::new_v4().to_string(),
        connected_at,
        rx,
    };
    (SubscriberSlot { tx, connected_at }, handle)
}
