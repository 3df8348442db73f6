//! Socket-transport (WebSocket) connection lifecycle.
//!
//! Upgrades arrive on the root path — the dashboard connects to
//! `ws://host/` just as it fetches the page from `http://host/`. Each
//! connection gets a fresh client id, a welcome message, and two halves:
//! a writer task draining the client's outbound queue into the socket,
//! and a read loop echoing inbound JSON back in an `echo` envelope.
//!
//! Inbound parse failures are logged and ignored; only close or error
//! ends the connection. Every exit path funnels through the idempotent
//! registry deregistration.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use pulse_core::{ClientId, Echo, Protocol, Welcome};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics as metric_names;
use crate::registry::{ClientEntry, OutboundFrame};
use crate::server::AppState;

/// Drive one upgraded socket until the peer closes or errors.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = ClientId::new();
    let (tx, mut rx) = mpsc::channel(state.config.send_queue_capacity);
    let entry = Arc::new(ClientEntry::new(id.clone(), tx));

    // Welcome goes into the queue ahead of registration so no tick event
    // can precede it.
    queue_envelope(&entry, &Welcome::new(id.clone(), Protocol::Websocket));

    let registry = state.broadcaster.websocket().clone();
    if let Err(error) = registry.register(entry.clone()) {
        error!(%error, "websocket registration failed");
        return;
    }
    counter!(metric_names::WS_CONNECTIONS_TOTAL).increment(1);
    info!(client_id = %id, "websocket client connected");

    let (mut sink, mut inbound) = socket.split();

    // Writer half: outbound queue → socket. Ends when the queue closes
    // (client deregistered everywhere) or the socket rejects a write.
    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = frame.payload.as_str().to_owned();
            if let Err(error) = sink.send(Message::Text(text.into())).await {
                debug!(client_id = %writer_id, %error, "websocket write failed");
                break;
            }
        }
    });

    // Read half: parse inbound JSON, echo it back to this client only.
    // Server shutdown also ends the loop so the listener can drain.
    let cancel = state.cancel.clone();
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                debug!(client_id = %id, "server shutting down, closing socket");
                break;
            }
            message = inbound.next() => match message {
                Some(message) => message,
                None => break,
            },
        };
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                Ok(payload) => {
                    debug!(client_id = %id, "inbound websocket message");
                    queue_envelope(&entry, &Echo::new(payload));
                }
                Err(error) => {
                    // Malformed payloads do not close the connection.
                    warn!(client_id = %id, %error, "ignoring malformed websocket payload");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary/ping/pong: nothing to do
            Err(error) => {
                warn!(client_id = %id, %error, "websocket error");
                break;
            }
        }
    }

    if registry.deregister(&id) {
        counter!(metric_names::WS_DISCONNECTIONS_TOTAL).increment(1);
        info!(client_id = %id, "websocket client disconnected");
    }
    // The registry no longer holds a sender; dropping ours closes the
    // queue and lets the writer task drain out.
    drop(entry);
    let _ = writer.await;
}

/// Serialize an envelope into the client's queue, dropping it on failure.
fn queue_envelope<E: serde::Serialize>(entry: &ClientEntry, envelope: &E) {
    match serde_json::to_string(envelope) {
        Ok(json) => {
            if !entry.send(OutboundFrame::new(None, json)) {
                warn!(client_id = %entry.id, "outbound queue full, dropping message");
            }
        }
        Err(error) => warn!(client_id = %entry.id, %error, "failed to serialize envelope"),
    }
}
