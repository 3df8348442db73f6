//! Point-in-time stats aggregation for the dashboard.
//!
//! Everything here is derived read-only from registry sizes and lifetime
//! counters; taking a snapshot never perturbs delivery.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::broadcaster::Broadcaster;
use crate::registry::Registry;

/// Process uptime, reported both ways the dashboard wants it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeStats {
    /// Whole seconds since process start.
    pub seconds: u64,
    /// `"XhYmZs"`-style rendering of the same span.
    pub human_readable: String,
}

/// Lifetime and point-in-time numbers for one transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    /// Currently connected clients.
    pub active_clients: usize,
    /// Clients ever connected.
    pub total_clients: u64,
    /// Sensor messages delivered, lifetime.
    pub messages_sent: u64,
    /// `messages_sent / uptime`; `0.0` while uptime is zero.
    pub messages_per_second: f64,
}

/// Combined numbers across both transports.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedStats {
    /// Currently connected clients, both transports.
    pub active_clients: usize,
    /// Sensor messages delivered, both transports.
    pub messages_sent: u64,
}

/// The `/api/stats` response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Process uptime.
    pub uptime: UptimeStats,
    /// Push-transport numbers.
    pub sse: TransportStats,
    /// Socket-transport numbers.
    pub websocket: TransportStats,
    /// Combined totals.
    pub total: CombinedStats,
}

/// Computes snapshots against a fixed process start time.
pub struct StatsAggregator {
    start: Instant,
}

impl StatsAggregator {
    /// Create an aggregator anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Create an aggregator with an explicit start, for tests.
    pub fn anchored_at(start: Instant) -> Self {
        Self { start }
    }

    /// Seconds since process start.
    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    /// Build the full snapshot from the broadcaster's registries.
    pub fn snapshot(&self, broadcaster: &Broadcaster) -> StatsSnapshot {
        let elapsed = self.uptime();
        let sse = transport_stats(broadcaster.sse(), elapsed);
        let websocket = transport_stats(broadcaster.websocket(), elapsed);
        let total = CombinedStats {
            active_clients: sse.active_clients + websocket.active_clients,
            messages_sent: sse.messages_sent + websocket.messages_sent,
        };
        StatsSnapshot {
            uptime: UptimeStats {
                seconds: elapsed.as_secs(),
                human_readable: format_uptime(elapsed),
            },
            sse,
            websocket,
            total,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_stats(registry: &Registry, elapsed: Duration) -> TransportStats {
    let messages_sent = registry.messages_sent();
    TransportStats {
        active_clients: registry.len(),
        total_clients: registry.total_clients(),
        messages_sent,
        messages_per_second: messages_per_second(messages_sent, elapsed),
    }
}

/// Throughput over the whole process lifetime.
///
/// Reports `0.0` while elapsed time is zero: serde_json cannot encode a
/// non-finite float, so the zero marker is the defined answer here.
fn messages_per_second(messages_sent: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let sent = messages_sent as f64;
    sent / secs
}

/// Render a span as hours/minutes/seconds, e.g. `"1h 4m 5s"`.
///
/// Hours are the largest unit; long uptimes keep accumulating hours.
fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}h {minutes}m {seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClientEntry, OutboundFrame};
    use pulse_core::{ClientId, SensorReading};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn attach(registry: &Registry, id: &str) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(8);
        registry
            .register(Arc::new(ClientEntry::new(ClientId::from(id), tx)))
            .unwrap();
        rx
    }

    #[test]
    fn format_zero() {
        assert_eq!(format_uptime(Duration::ZERO), "0h 0m 0s");
    }

    #[test]
    fn format_carries_units() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "0h 0m 5s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "0h 1m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3600 + 125)), "1h 2m 5s");
    }

    #[test]
    fn format_has_no_unit_above_hours() {
        assert_eq!(
            format_uptime(Duration::from_secs(49 * 3600 + 30 * 60 + 1)),
            "49h 30m 1s"
        );
    }

    #[test]
    fn zero_elapsed_reports_zero_rate() {
        assert!(messages_per_second(1000, Duration::ZERO).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_is_messages_over_elapsed() {
        let rate = messages_per_second(100, Duration::from_secs(50));
        assert!((rate - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn snapshot_counts_both_transports() {
        let broadcaster = Broadcaster::new();
        let _sse_rx = attach(broadcaster.sse(), "s1");
        let _sse_rx2 = attach(broadcaster.sse(), "s2");
        let _ws_rx = attach(broadcaster.websocket(), "w1");
        broadcaster.tick(&SensorReading::new(0, 1.0, 1.0));

        let aggregator = StatsAggregator::new();
        let snapshot = aggregator.snapshot(&broadcaster);
        assert_eq!(snapshot.sse.active_clients, 2);
        assert_eq!(snapshot.sse.total_clients, 2);
        assert_eq!(snapshot.sse.messages_sent, 2);
        assert_eq!(snapshot.websocket.active_clients, 1);
        assert_eq!(snapshot.websocket.messages_sent, 1);
        assert_eq!(snapshot.total.active_clients, 3);
        assert_eq!(snapshot.total.messages_sent, 3);
    }

    #[tokio::test]
    async fn snapshot_survives_zero_uptime() {
        let broadcaster = Broadcaster::new();
        let aggregator = StatsAggregator::new();
        let snapshot = aggregator.snapshot(&broadcaster);
        assert!(snapshot.sse.messages_per_second.is_finite());
        assert!(snapshot.websocket.messages_per_second.is_finite());
        // And the whole thing still encodes to JSON.
        let _ = serde_json::to_string(&snapshot).unwrap();
    }

    #[tokio::test]
    async fn snapshot_wire_shape() {
        let broadcaster = Broadcaster::new();
        let _sse_rx = attach(broadcaster.sse(), "s1");
        let start = Instant::now()
            .checked_sub(Duration::from_secs(90))
            .unwrap();
        let aggregator = StatsAggregator::anchored_at(start);
        let parsed: serde_json::Value =
            serde_json::to_value(aggregator.snapshot(&broadcaster)).unwrap();

        assert!(parsed["uptime"]["seconds"].as_u64().unwrap() >= 90);
        assert!(parsed["uptime"]["humanReadable"]
            .as_str()
            .unwrap()
            .contains("1m"));
        assert_eq!(parsed["sse"]["activeClients"], 1);
        assert_eq!(parsed["sse"]["totalClients"], 1);
        assert_eq!(parsed["sse"]["messagesSent"], 0);
        assert!(parsed["sse"]["messagesPerSecond"].is_number());
        assert_eq!(parsed["websocket"]["activeClients"], 0);
        assert_eq!(parsed["total"]["activeClients"], 1);
    }

    #[tokio::test]
    async fn rate_uses_lifetime_elapsed() {
        let broadcaster = Broadcaster::new();
        let _rx = attach(broadcaster.sse(), "s1");
        for i in 0..10 {
            broadcaster.tick(&SensorReading::new(i, 1.0, 1.0));
        }
        let start = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();
        let aggregator = StatsAggregator::anchored_at(start);
        let snapshot = aggregator.snapshot(&broadcaster);
        // 10 messages over ~5 seconds.
        assert!(snapshot.sse.messages_per_second > 1.5);
        assert!(snapshot.sse.messages_per_second < 2.5);
    }

    #[tokio::test]
    async fn snapshot_does_not_perturb_counters() {
        let broadcaster = Broadcaster::new();
        let _rx = attach(broadcaster.sse(), "s1");
        broadcaster.tick(&SensorReading::new(0, 1.0, 1.0));
        let aggregator = StatsAggregator::new();
        let first = aggregator.snapshot(&broadcaster);
        let second = aggregator.snapshot(&broadcaster);
        assert_eq!(first.sse.messages_sent, second.sse.messages_sent);
        assert_eq!(first.sse.total_clients, second.sse.total_clients);
    }
}
