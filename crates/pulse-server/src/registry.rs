//! Per-transport client registries.
//!
//! A [`Registry`] tracks the currently connected clients of one transport
//! kind. Each [`ClientEntry`] owns the send side of that client's outbound
//! queue; the transport task (SSE stream or WebSocket writer) owns the
//! receive side, so a closed queue means the connection is gone.
//!
//! Registration, deregistration, and broadcaster-driven eviction may race;
//! [`Registry::deregister`] is idempotent so every path can call it
//! unconditionally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use pulse_core::{ClientId, Protocol};
use thiserror::Error;
use tokio::sync::mpsc;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two live clients can never share an id; ids are assigned fresh at
    /// connect time, so a collision is an invariant violation.
    #[error("client {id} is already registered")]
    DuplicateClient {
        /// The colliding id.
        id: ClientId,
    },
}

/// One framed message queued for delivery to a single client.
///
/// The payload is serialized once per transport and shared across all that
/// transport's clients. `sse_id` mirrors the envelope's own `id` field and
/// becomes the `id:` line of the SSE framing; the WebSocket framing
/// ignores it.
#[derive(Clone, Debug)]
pub struct OutboundFrame {
    /// Id echoed in transport framing, when the envelope carries one.
    pub sse_id: Option<String>,
    /// Serialized JSON envelope.
    pub payload: Arc<String>,
}

impl OutboundFrame {
    /// Build a frame from a serialized envelope.
    pub fn new(sse_id: Option<String>, payload: String) -> Self {
        Self {
            sse_id,
            payload: Arc::new(payload),
        }
    }
}

/// One connected client.
pub struct ClientEntry {
    /// Unique client id, assigned at connect time.
    pub id: ClientId,
    /// Send side of the client's outbound queue.
    tx: mpsc::Sender<OutboundFrame>,
    /// When the client connected.
    pub connected_at: Instant,
    /// Messages successfully delivered to this client.
    message_count: AtomicU64,
}

impl ClientEntry {
    /// Create an entry around the send half of the client's queue.
    pub fn new(id: ClientId, tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            message_count: AtomicU64::new(0),
        }
    }

    /// Queue a frame for the client.
    ///
    /// Returns `false` when the queue is full or the connection is gone;
    /// the caller treats that as a failed send and evicts.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Whether the connection's receive side is still alive.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Record one successful delivery.
    pub fn record_delivery(&self) {
        let _ = self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages successfully delivered so far.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// How long the client has been connected.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// The set of currently connected clients for one transport kind, plus that
/// transport's lifetime counters.
pub struct Registry {
    protocol: Protocol,
    clients: RwLock<HashMap<ClientId, Arc<ClientEntry>>>,
    /// Sensor messages delivered over this transport, lifetime.
    messages_sent: AtomicU64,
    /// Clients ever registered, lifetime.
    total_clients: AtomicU64,
}

impl Registry {
    /// Create an empty registry for one transport kind.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            clients: RwLock::new(HashMap::new()),
            messages_sent: AtomicU64::new(0),
            total_clients: AtomicU64::new(0),
        }
    }

    /// The transport this registry tracks.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Add a client. Errors if the id is already present.
    pub fn register(&self, entry: Arc<ClientEntry>) -> Result<(), RegistryError> {
        let mut clients = self.clients.write();
        if clients.contains_key(&entry.id) {
            return Err(RegistryError::DuplicateClient {
                id: entry.id.clone(),
            });
        }
        let _ = clients.insert(entry.id.clone(), entry);
        let _ = self.total_clients.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a client if present. Idempotent; returns whether an entry
    /// was actually removed.
    pub fn deregister(&self, id: &ClientId) -> bool {
        self.clients.write().remove(id).is_some()
    }

    /// A stable snapshot of the current members.
    ///
    /// Iterating the snapshot is safe against concurrent registration and
    /// removal; entries removed afterwards simply fail their sends.
    pub fn snapshot(&self) -> Vec<Arc<ClientEntry>> {
        self.clients.read().values().cloned().collect()
    }

    /// Number of currently connected clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no clients are connected.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Record one delivered sensor message.
    pub fn record_sent(&self) {
        let _ = self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Lifetime sensor messages delivered over this transport.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Lifetime count of clients ever registered.
    pub fn total_clients(&self) -> u64 {
        self.total_clients.load(Ordering::Relaxed)
    }
}
