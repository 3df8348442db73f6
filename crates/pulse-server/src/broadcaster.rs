//! Event fan-out to both transport registries.
//!
//! The broadcaster drives two independent delivery paths:
//!
//! - [`Broadcaster::tick`] — the periodic sensor path. Counts every
//!   successful delivery, per client and per transport.
//! - [`Broadcaster::broadcast`] — the operator path. Same
//!   failure-tolerant delivery, deliberately uncounted.
//!
//! A failed send is local to one client: it is logged, the client is
//! evicted before the fan-out returns, and delivery to the remaining
//! members continues. Nothing here returns an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use pulse_core::{BroadcastNotice, BroadcastTarget, Protocol, ReadingGenerator, SensorReading};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics as metric_names;
use crate::registry::{OutboundFrame, Registry};

/// Fan-out driver owning both transport registries.
pub struct Broadcaster {
    sse: Arc<Registry>,
    websocket: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster with empty registries.
    pub fn new() -> Self {
        Self {
            sse: Arc::new(Registry::new(Protocol::Sse)),
            websocket: Arc::new(Registry::new(Protocol::Websocket)),
        }
    }

    /// The push-transport registry.
    pub fn sse(&self) -> &Arc<Registry> {
        &self.sse
    }

    /// The socket-transport registry.
    pub fn websocket(&self) -> &Arc<Registry> {
        &self.websocket
    }

    /// Combined sensor messages delivered across both transports.
    ///
    /// This live counter is what seeds each reading's `sequence`, so the
    /// value can repeat across readings when no deliveries happen in
    /// between. That mirrors the dashboard's expectations; it is not a
    /// strict ordering guarantee.
    pub fn combined_sent(&self) -> u64 {
        self.sse.messages_sent() + self.websocket.messages_sent()
    }

    /// Deliver one sensor reading to every member of both registries.
    ///
    /// The registries are processed independently; a failure in one has no
    /// effect on the other. WebSocket members whose handle is no longer
    /// open are evicted without a send attempt.
    pub fn tick(&self, reading: &SensorReading) {
        self.deliver(
            &self.sse,
            Some(reading.id.to_string()),
            &reading.clone().with_protocol(Protocol::Sse),
            DeliveryKind::Sensor,
        );
        self.deliver(
            &self.websocket,
            Some(reading.id.to_string()),
            &reading.clone().with_protocol(Protocol::Websocket),
            DeliveryKind::Sensor,
        );
    }

    /// Deliver an operator notice to every member of the targeted
    /// registry or registries. Does not touch the sensor counters.
    pub fn broadcast(&self, message: &str, target: BroadcastTarget) {
        let notice = BroadcastNotice::new(message);
        info!(notice_id = %notice.id, ?target, "operator broadcast");
        if target.includes(Protocol::Sse) {
            self.deliver(
                &self.sse,
                Some(notice.id.to_string()),
                &notice.clone().with_protocol(Protocol::Sse),
                DeliveryKind::Notice,
            );
        }
        if target.includes(Protocol::Websocket) {
            self.deliver(
                &self.websocket,
                Some(notice.id.to_string()),
                &notice.clone().with_protocol(Protocol::Websocket),
                DeliveryKind::Notice,
            );
        }
    }

    /// Serialize once, fan out to a snapshot of the registry, evict every
    /// member whose handle is closed or whose send fails.
    fn deliver<E: Serialize>(
        &self,
        registry: &Registry,
        sse_id: Option<String>,
        envelope: &E,
        kind: DeliveryKind,
    ) {
        let json = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(error) => {
                warn!(%error, "failed to serialize event, skipping fan-out");
                return;
            }
        };
        let frame = OutboundFrame::new(sse_id, json);
        let protocol = registry.protocol();

        let mut evicted = Vec::new();
        let mut delivered = 0u32;
        for entry in registry.snapshot() {
            // Socket handles expose liveness ahead of the send; skip the
            // attempt entirely when the peer is already gone.
            if protocol == Protocol::Websocket && !entry.is_open() {
                warn!(client_id = %entry.id, "handle closed, evicting without send");
                evicted.push(entry.id.clone());
                continue;
            }
            if entry.send(frame.clone()) {
                if kind == DeliveryKind::Sensor {
                    entry.record_delivery();
                    registry.record_sent();
                }
                delivered += 1;
            } else {
                counter!(metric_names::SEND_FAILURES_TOTAL, "protocol" => protocol.label())
                    .increment(1);
                warn!(client_id = %entry.id, %protocol, "send failed, evicting client");
                evicted.push(entry.id.clone());
            }
        }
        for id in &evicted {
            // Idempotent with the lifecycle handlers' own deregistration.
            if registry.deregister(id) {
                counter!(metric_names::EVICTIONS_TOTAL, "protocol" => protocol.label())
                    .increment(1);
            }
        }
        debug!(
            %protocol,
            delivered,
            evicted = evicted.len(),
            "fan-out complete"
        );
    }

    /// Generator loop: one reading per tick, fanned out to both
    /// transports, until cancelled.
    ///
    /// The first tick fires one full period after startup, and a
    /// suppressed tick (simulated packet loss) delivers nothing.
    pub async fn run(
        self: Arc<Self>,
        mut generator: ReadingGenerator,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        info!(?period, "generator loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("generator loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let sequence = self.combined_sent();
                    match generator.next_reading(sequence) {
                        Some(reading) => {
                            counter!(metric_names::TICKS_TOTAL).increment(1);
                            self.tick(&reading);
                        }
                        None => {
                            counter!(metric_names::TICKS_LOST_TOTAL).increment(1);
                            debug!(sequence, "tick suppressed (simulated packet loss)");
                        }
                    }
                }
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a delivery counts toward the sensor counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeliveryKind {
    Sensor,
    Notice,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientEntry;
    use pulse_core::ClientId;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn attach(
        registry: &Registry,
        id: &str,
    ) -> (Arc<ClientEntry>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let entry = Arc::new(ClientEntry::new(ClientId::from(id), tx));
        registry.register(entry.clone()).unwrap();
        (entry, rx)
    }

    fn reading(sequence: u64) -> SensorReading {
        SensorReading::new(sequence, 42.0, 10.0)
    }

    fn parse(frame: &OutboundFrame) -> Value {
        serde_json::from_str(frame.payload.as_str()).unwrap()
    }

    #[tokio::test]
    async fn tick_reaches_both_transports() {
        let broadcaster = Broadcaster::new();
        let (_sse, mut sse_rx) = attach(broadcaster.sse(), "s1");
        let (_ws, mut ws_rx) = attach(broadcaster.websocket(), "w1");

        broadcaster.tick(&reading(0));

        let sse_event = parse(&sse_rx.try_recv().unwrap());
        let ws_event = parse(&ws_rx.try_recv().unwrap());
        assert_eq!(sse_event["type"], "sensor-data");
        assert_eq!(sse_event["protocol"], "sse");
        assert_eq!(ws_event["protocol"], "websocket");
        // Same event, modulo the protocol stamp.
        assert_eq!(sse_event["value"], ws_event["value"]);
        assert_eq!(sse_event["timestamp"], ws_event["timestamp"]);
        assert_eq!(sse_event["id"], ws_event["id"]);
    }

    #[tokio::test]
    async fn tick_increments_counters() {
        let broadcaster = Broadcaster::new();
        let (sse_entry, _sse_rx) = attach(broadcaster.sse(), "s1");
        let (_s2, _sse_rx2) = attach(broadcaster.sse(), "s2");
        let (ws_entry, _ws_rx) = attach(broadcaster.websocket(), "w1");

        broadcaster.tick(&reading(0));

        assert_eq!(broadcaster.sse().messages_sent(), 2);
        assert_eq!(broadcaster.websocket().messages_sent(), 1);
        assert_eq!(broadcaster.combined_sent(), 3);
        assert_eq!(sse_entry.message_count(), 1);
        assert_eq!(ws_entry.message_count(), 1);
    }

    #[tokio::test]
    async fn failed_send_evicts_only_that_client() {
        let broadcaster = Broadcaster::new();
        let (_a, mut rx_a) = attach(broadcaster.sse(), "a");
        let (_b, rx_b) = attach(broadcaster.sse(), "b");
        let (_c, mut rx_c) = attach(broadcaster.sse(), "c");
        drop(rx_b); // b's connection is gone

        broadcaster.tick(&reading(0));

        assert_eq!(broadcaster.sse().len(), 2);
        assert_eq!(broadcaster.sse().messages_sent(), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_websocket_handle_evicted_without_delivery() {
        let broadcaster = Broadcaster::new();
        let (_open, mut rx_open) = attach(broadcaster.websocket(), "open");
        let (closed_entry, rx_closed) = attach(broadcaster.websocket(), "closed");
        drop(rx_closed);

        broadcaster.tick(&reading(0));

        assert_eq!(broadcaster.websocket().len(), 1);
        assert_eq!(closed_entry.message_count(), 0);
        assert_eq!(broadcaster.websocket().messages_sent(), 1);
        assert!(rx_open.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_counts_as_failed_send() {
        let broadcaster = Broadcaster::new();
        let (tx, _rx) = mpsc::channel(1);
        let slow = Arc::new(ClientEntry::new(ClientId::from("slow"), tx));
        broadcaster.sse().register(slow).unwrap();

        // First tick fills the queue; second tick fails and evicts.
        broadcaster.tick(&reading(0));
        assert_eq!(broadcaster.sse().len(), 1);
        broadcaster.tick(&reading(1));
        assert_eq!(broadcaster.sse().len(), 0);
        // Only the first send was counted.
        assert_eq!(broadcaster.sse().messages_sent(), 1);
    }

    #[tokio::test]
    async fn failure_in_one_transport_does_not_affect_the_other() {
        let broadcaster = Broadcaster::new();
        let (_sse, rx_sse) = attach(broadcaster.sse(), "s1");
        let (_ws, mut rx_ws) = attach(broadcaster.websocket(), "w1");
        drop(rx_sse);

        broadcaster.tick(&reading(0));

        assert_eq!(broadcaster.sse().len(), 0);
        assert_eq!(broadcaster.websocket().len(), 1);
        assert!(rx_ws.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_reaches_both_without_counting() {
        let broadcaster = Broadcaster::new();
        let (sse_entry, mut sse_rx) = attach(broadcaster.sse(), "s1");
        let (_ws, mut ws_rx) = attach(broadcaster.websocket(), "w1");

        broadcaster.broadcast("hi", BroadcastTarget::All);

        let sse_event = parse(&sse_rx.try_recv().unwrap());
        let ws_event = parse(&ws_rx.try_recv().unwrap());
        assert_eq!(sse_event["type"], "broadcast");
        assert_eq!(sse_event["message"], "hi");
        assert_eq!(ws_event["message"], "hi");
        assert_eq!(broadcaster.sse().messages_sent(), 0);
        assert_eq!(broadcaster.websocket().messages_sent(), 0);
        assert_eq!(sse_entry.message_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_targets_single_transport() {
        let broadcaster = Broadcaster::new();
        let (_sse, mut sse_rx) = attach(broadcaster.sse(), "s1");
        let (_ws, mut ws_rx) = attach(broadcaster.websocket(), "w1");

        broadcaster.broadcast("sse only", BroadcastTarget::Sse);
        assert!(sse_rx.try_recv().is_ok());
        assert!(ws_rx.try_recv().is_err());

        broadcaster.broadcast("ws only", BroadcastTarget::Websocket);
        assert!(ws_rx.try_recv().is_ok());
        assert!(sse_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_evicts_dead_clients_too() {
        let broadcaster = Broadcaster::new();
        let (_a, rx_a) = attach(broadcaster.sse(), "a");
        let (_b, mut rx_b) = attach(broadcaster.sse(), "b");
        drop(rx_a);

        broadcaster.broadcast("hello", BroadcastTarget::Sse);

        assert_eq!(broadcaster.sse().len(), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn tick_with_empty_registries_is_a_noop() {
        let broadcaster = Broadcaster::new();
        // Must not panic, must not count.
        broadcaster.tick(&reading(0));
        assert_eq!(broadcaster.combined_sent(), 0);
    }

    #[tokio::test]
    async fn sequence_reflects_combined_counter() {
        let broadcaster = Broadcaster::new();
        let (_sse, _sse_rx) = attach(broadcaster.sse(), "s1");
        let (_ws, _ws_rx) = attach(broadcaster.websocket(), "w1");

        broadcaster.tick(&reading(broadcaster.combined_sent()));
        // One delivery per transport happened.
        assert_eq!(broadcaster.combined_sent(), 2);
        // A reading generated now would carry sequence 2.
        let next = reading(broadcaster.combined_sent());
        assert_eq!(next.sequence, 2);
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancellation() {
        let broadcaster = Arc::new(Broadcaster::new());
        let generator = ReadingGenerator::seeded(0.0, 1).unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broadcaster.clone().run(
            generator,
            Duration::from_millis(10),
            cancel.clone(),
        ));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("generator loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn run_loop_delivers_readings() {
        let broadcaster = Arc::new(Broadcaster::new());
        let (_entry, mut rx) = attach(broadcaster.sse(), "s1");
        let generator = ReadingGenerator::seeded(0.0, 1).unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broadcaster.clone().run(
            generator,
            Duration::from_millis(5),
            cancel.clone(),
        ));

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no reading arrived")
            .unwrap();
        let event = parse(&frame);
        assert_eq!(event["type"], "sensor-data");

        cancel.cancel();
        let _ = handle.await;
    }
}
