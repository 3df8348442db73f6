//! Synthetic sensor reading generator.
//!
//! Produces at most one [`SensorReading`] per tick. Values and simulated
//! network delay are drawn uniformly from `[0, 100)`; with independent
//! probability `loss_probability` the tick produces nothing at all
//! (simulated packet loss). The `sequence` number is supplied by the
//! caller from the live delivery counters, not generated here.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::events::SensorReading;

/// Default per-tick probability that a reading is suppressed.
pub const DEFAULT_LOSS_PROBABILITY: f64 = 0.02;

/// Upper bound (exclusive) for generated sensor values.
const VALUE_MAX: f64 = 100.0;

/// Upper bound (exclusive) for simulated network delay, in milliseconds.
const DELAY_MAX_MS: f64 = 100.0;

/// Errors from generator construction.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Loss probability must be within `[0, 1]`.
    #[error("loss probability must be within [0, 1], got {0}")]
    InvalidLossProbability(f64),
}

/// Random sensor reading generator with simulated loss.
#[derive(Debug)]
pub struct ReadingGenerator {
    loss_probability: f64,
    rng: StdRng,
}

impl ReadingGenerator {
    /// Create a generator seeded from the operating system.
    pub fn new(loss_probability: f64) -> Result<Self, GeneratorError> {
        Self::with_rng(loss_probability, StdRng::from_os_rng())
    }

    /// Create a generator with a fixed seed, for deterministic tests.
    pub fn seeded(loss_probability: f64, seed: u64) -> Result<Self, GeneratorError> {
        Self::with_rng(loss_probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(loss_probability: f64, rng: StdRng) -> Result<Self, GeneratorError> {
        if !(0.0..=1.0).contains(&loss_probability) || loss_probability.is_nan() {
            return Err(GeneratorError::InvalidLossProbability(loss_probability));
        }
        Ok(Self {
            loss_probability,
            rng,
        })
    }

    /// Produce the reading for one tick, or `None` when the tick is lost.
    ///
    /// `sequence` is the combined sent-message count across both transports
    /// at generation time.
    pub fn next_reading(&mut self, sequence: u64) -> Option<SensorReading> {
        if self.rng.random_bool(self.loss_probability) {
            return None;
        }
        let value = self.rng.random_range(0.0..VALUE_MAX);
        let network_delay = self.rng.random_range(0.0..DELAY_MAX_MS);
        Some(SensorReading::new(sequence, value, network_delay))
    }

    /// The configured loss probability.
    #[must_use]
    pub fn loss_probability(&self) -> f64 {
        self.loss_probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_probability() {
        assert!(ReadingGenerator::new(-0.1).is_err());
    }

    #[test]
    fn rejects_probability_above_one() {
        assert!(ReadingGenerator::new(1.5).is_err());
    }

    #[test]
    fn rejects_nan_probability() {
        assert!(ReadingGenerator::new(f64::NAN).is_err());
    }

    #[test]
    fn accepts_boundary_probabilities() {
        assert!(ReadingGenerator::new(0.0).is_ok());
        assert!(ReadingGenerator::new(1.0).is_ok());
    }

    #[test]
    fn zero_loss_always_produces() {
        let mut generator = ReadingGenerator::seeded(0.0, 7).unwrap();
        for sequence in 0..100 {
            assert!(generator.next_reading(sequence).is_some());
        }
    }

    #[test]
    fn full_loss_never_produces() {
        let mut generator = ReadingGenerator::seeded(1.0, 7).unwrap();
        for sequence in 0..100 {
            assert!(generator.next_reading(sequence).is_none());
        }
    }

    #[test]
    fn values_stay_in_range() {
        let mut generator = ReadingGenerator::seeded(0.0, 42).unwrap();
        for sequence in 0..1000 {
            let reading = generator.next_reading(sequence).unwrap();
            assert!((0.0..100.0).contains(&reading.value));
            assert!((0.0..100.0).contains(&reading.network_delay));
        }
    }

    #[test]
    fn sequence_is_caller_supplied() {
        let mut generator = ReadingGenerator::seeded(0.0, 1).unwrap();
        let reading = generator.next_reading(37).unwrap();
        assert_eq!(reading.sequence, 37);
    }

    #[test]
    fn delivered_readings_never_marked_lost() {
        let mut generator = ReadingGenerator::seeded(0.5, 3).unwrap();
        for sequence in 0..200 {
            if let Some(reading) = generator.next_reading(sequence) {
                assert!(!reading.packet_loss);
            }
        }
    }

    #[test]
    fn seeded_generators_agree() {
        let mut a = ReadingGenerator::seeded(0.02, 99).unwrap();
        let mut b = ReadingGenerator::seeded(0.02, 99).unwrap();
        for sequence in 0..50 {
            match (a.next_reading(sequence), b.next_reading(sequence)) {
                (Some(x), Some(y)) => {
                    assert_eq!(x.value, y.value);
                    assert_eq!(x.network_delay, y.network_delay);
                }
                (None, None) => {}
                other => panic!("seeded generators diverged: {other:?}"),
            }
        }
    }

    #[test]
    fn default_loss_probability_matches_simulation() {
        assert!((DEFAULT_LOSS_PROBABILITY - 0.02).abs() < f64::EPSILON);
    }
}
