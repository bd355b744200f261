//! Subscriber event-stream route.
//!
//! Long-lived SSE connection: an initial `connected` frame, then
//! broadcast frames as they arrive, with heartbeat comments every 30
//! seconds. The subscriber detaches when the client disconnects or the
//! stream closes its queue.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream as FuturesStream;
use futures::StreamExt;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::stream::{ControlFrame, Stream};

/// Heartbeat cadence on idle subscriber connections.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Detaches the subscriber when the SSE stream is dropped, whichever
/// side ends the connection first.
struct SubscriberGuard {
    stream: Arc<Stream>,
    subscriber_id: String,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.stream.remove_subscriber(&self.subscriber_id);
    }
}

fn frame_event(frame: &ControlFrame) -> Event {
    Event::default()
        .json_data(frame)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

/// `GET /{id}/subscribe`
pub async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl FuturesStream<Item = Result<Event, Infallible>>>> {
    let stream = state.registry.get_stream(&id)?;
    let handle = stream.add_subscriber()?;

    let connected = ControlFrame::Connected {
        stream_id: id,
        subscriber_id: handle.id.clone(),
        connected_at: handle.connected_at,
    };
    let guard = SubscriberGuard {
        stream,
        subscriber_id: handle.id.clone(),
    };

    let first = futures::stream::once(async move { Ok::<_, Infallible>(frame_event(&connected)) });
    let rest = futures::stream::unfold((handle.rx, guard), |(mut rx, guard)| async move {
        match rx.recv().await {
            Some(frame) => Some((Ok::<_, Infallible>(frame_event(&frame)), (rx, guard))),
            // Queue closed by the stream; end the connection.
            None => None,
        }
    });

    Ok(Sse::new(first.chain(rest)).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    ))
}
