//! Lossy radio link
//!
//! Simulates what the mesh bearer does to access messages on their way to
//! a node:
//! - Random and burst loss
//! - Duplication (relays and retransmissions)
//!
//! All randomness comes from a seeded `StdRng`, so a run is reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link impairment configuration
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Independent loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a loss burst starts
    pub burst_loss_prob: f64,
    /// Burst length range (messages)
    pub burst_length: (u32, u32),
    /// Probability that a delivered message arrives twice
    pub duplicate_prob: f64,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            loss_rate: 0.02,
            burst_loss_prob: 0.01,
            burst_length: (2, 4),
            duplicate_prob: 0.05,
            seed: 42,
        }
    }
}

impl LinkConfig {
    /// Nothing lost, nothing duplicated
    pub fn perfect() -> Self {
        LinkConfig {
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            duplicate_prob: 0.0,
            seed: 42,
        }
    }

    /// Busy network with relays: frequent loss and duplicates
    pub fn congested() -> Self {
        LinkConfig {
            loss_rate: 0.2,
            burst_loss_prob: 0.05,
            burst_length: (2, 6),
            duplicate_prob: 0.3,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Link statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub duplicated: u64,
}

impl LinkStats {
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }
}

/// One direction of a lossy link
pub struct LossyLink {
    config: LinkConfig,
    rng: StdRng,
    burst_remaining: u32,
    stats: LinkStats,
}

impl LossyLink {
    pub fn new(config: LinkConfig) -> Self {
        LossyLink {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            burst_remaining: 0,
            stats: LinkStats::default(),
        }
    }

    /// How many copies of the next message arrive (0, 1 or 2)
    pub fn transmit(&mut self) -> usize {
        self.stats.sent += 1;
        if self.should_drop() {
            self.stats.lost += 1;
            return 0;
        }
        self.stats.delivered += 1;
        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            self.stats.duplicated += 1;
            return 2;
        }
        1
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.config.burst_loss_prob > 0.0 && self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            // The message that starts the burst is lost too
            self.burst_remaining = self.rng.gen_range(min..=max.max(min)).saturating_sub(1);
            return true;
        }

        self.rng.gen::<f64>() < self.config.loss_rate
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}
