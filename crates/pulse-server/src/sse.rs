//! Push-transport (SSE) connection lifecycle.
//!
//! `GET /sse` assigns a fresh client id, queues the welcome event, and
//! registers the client, in that order — the welcome is already in the
//! queue before the broadcaster can see the entry, so it is always the
//! first frame on the wire. The stream opens with a `retry:` directive so
//! compliant clients auto-reconnect after 3 seconds.
//!
//! Disconnection is detected two ways, racing safely through the
//! idempotent registry: the response stream is dropped (drop guard
//! deregisters), or a fan-out send fails (broadcaster evicts).

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, Stream, StreamExt};
use metrics::counter;
use pin_project_lite::pin_project;
use pulse_core::{ClientId, Protocol, Welcome};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::metrics as metric_names;
use crate::registry::{ClientEntry, OutboundFrame, Registry};
use crate::server::AppState;

/// Deregisters the client when the response stream is dropped.
struct DisconnectGuard {
    registry: Arc<Registry>,
    id: ClientId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        // The broadcaster may have evicted the entry already.
        if self.registry.deregister(&self.id) {
            counter!(metric_names::SSE_DISCONNECTIONS_TOTAL).increment(1);
            info!(client_id = %self.id, "sse client disconnected");
        }
    }
}

pin_project! {
    /// The client's outbound queue as a stream, tied to its registration.
    struct ClientFrames {
        #[pin]
        inner: ReceiverStream<OutboundFrame>,
        guard: DisconnectGuard,
    }
}

impl Stream for ClientFrames {
    type Item = OutboundFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// `GET /sse` — open the push-transport stream.
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let id = ClientId::new();
    let (tx, rx) = mpsc::channel(state.config.send_queue_capacity);
    let entry = Arc::new(ClientEntry::new(id.clone(), tx));

    // Queue the welcome before registering: once the entry is visible to
    // the broadcaster, tick events could otherwise get in first. Like any
    // id-carrying event, the welcome's id (the client's own) becomes the
    // frame's `id:` line.
    let welcome = Welcome::new(id.clone(), Protocol::Sse);
    match serde_json::to_string(&welcome) {
        Ok(json) => {
            let frame = OutboundFrame::new(Some(id.to_string()), json);
            let _ = entry.send(frame);
        }
        Err(error) => warn!(client_id = %id, %error, "failed to serialize welcome"),
    }

    let registry = state.broadcaster.sse().clone();
    if let Err(error) = registry.register(entry) {
        error!(%error, "sse registration failed");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    counter!(metric_names::SSE_CONNECTIONS_TOTAL).increment(1);
    info!(client_id = %id, "sse client connected");

    let frames = ClientFrames {
        inner: ReceiverStream::new(rx),
        guard: DisconnectGuard { registry, id },
    };

    // The stream opens with the reconnect hint, then carries one event
    // per queued frame: an `id:` line when the event has one, plus the
    // JSON payload as `data:`. On shutdown the stream ends so the
    // listener can drain.
    let retry = Event::default().retry(state.config.sse_retry());
    let events = stream::once(std::future::ready(retry))
        .chain(frames.map(frame_to_event))
        .take_until(state.cancel.clone().cancelled_owned())
        .map(Ok::<_, Infallible>);

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(events),
    ))
}

fn frame_to_event(frame: OutboundFrame) -> Event {
    let mut event = Event::default();
    if let Some(id) = &frame.sse_id {
        event = event.id(id);
    }
    event.data(frame.payload.as_str())
}
