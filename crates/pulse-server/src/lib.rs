//! # pulse-server
//!
//! Axum HTTP server with dual-transport event fan-out.
//!
//! - Per-transport client registries with eviction of dead peers
//! - Fixed-cadence synthetic sensor stream fanned out to SSE and
//!   WebSocket clients alike
//! - Operator broadcast to either transport or both
//! - Point-in-time stats aggregation (`/api/stats`), health check, and
//!   Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod broadcaster;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod sse;
pub mod stats;
pub mod websocket;
