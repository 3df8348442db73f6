//! # pulse-core
//!
//! Shared core for the Pulse demo server:
//!
//! - Wire-format event envelopes ([`events`]) — the JSON shapes both
//!   transports deliver to clients
//! - Branded ID newtypes ([`ids`]) — client and event identifiers
//! - The synthetic sensor reading generator ([`generator`]) — one reading
//!   per tick with simulated network delay and random loss
//!
//! No I/O lives here; the server crate owns sockets and scheduling.

#![deny(unsafe_code)]

pub mod events;
pub mod generator;
pub mod ids;

pub use events::{BroadcastNotice, BroadcastTarget, Echo, Protocol, SensorReading, Welcome};
pub use generator::{GeneratorError, ReadingGenerator};
pub use ids::{ClientId, EventId};
