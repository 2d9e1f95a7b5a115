//! Transition time primitives
//!
//! Mesh messages carry transition times in a compact 8-bit form:
//! - bits 0-5: number of steps (0x00-0x3E, 0x3F = unknown)
//! - bits 6-7: step resolution (100 ms, 1 s, 10 s, 10 min)
//!
//! Delays are carried as a count of 5 ms units.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transition engine tick period
pub const TRANSITION_TICK_MS: u32 = 100;

/// Delay unit carried on the wire
pub const DELAY_STEP_MS: u32 = 5;

/// Step count meaning "unknown / cannot be represented"
pub const STEPS_UNKNOWN: u8 = 0x3F;

/// Largest representable step count
pub const STEPS_MAX: u8 = 0x3E;

/// Resolutions indexed by the upper two bits
const RESOLUTION_MS: [u32; 4] = [100, 1_000, 10_000, 600_000];

/// Encoded transition time
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TransitionTime(pub u8);

impl TransitionTime {
    /// Zero steps: apply immediately
    pub const IMMEDIATE: TransitionTime = TransitionTime(0x00);
    /// Unknown / not representable
    pub const UNKNOWN: TransitionTime = TransitionTime(STEPS_UNKNOWN);

    #[inline]
    pub fn new(steps: u8, resolution: u8) -> Self {
        TransitionTime(((resolution & 0x03) << 6) | (steps & 0x3F))
    }

    #[inline]
    pub fn steps(self) -> u8 {
        self.0 & 0x3F
    }

    #[inline]
    pub fn resolution(self) -> u8 {
        self.0 >> 6
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        self.steps() == STEPS_UNKNOWN
    }

    #[inline]
    pub fn is_immediate(self) -> bool {
        self.steps() == 0
    }

    #[inline]
    pub fn resolution_ms(self) -> u32 {
        RESOLUTION_MS[self.resolution() as usize]
    }

    /// Duration in milliseconds, `None` when the value is unknown
    pub fn to_ms(self) -> Option<u32> {
        if self.is_unknown() {
            None
        } else {
            Some(self.steps() as u32 * self.resolution_ms())
        }
    }

    /// Encode a duration, picking the finest resolution that fits.
    /// Values are rounded up so a reported remaining time never undershoots;
    /// durations beyond the largest resolution saturate at unknown.
    pub fn from_ms(ms: u32) -> Self {
        if ms == 0 {
            return TransitionTime::IMMEDIATE;
        }
        for (res, step_ms) in RESOLUTION_MS.iter().enumerate() {
            let steps = ms.div_ceil(*step_ms);
            if steps <= STEPS_MAX as u32 {
                return TransitionTime::new(steps as u8, res as u8);
            }
        }
        TransitionTime::UNKNOWN
    }
}

impl fmt::Debug for TransitionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_ms() {
            Some(ms) => write!(f, "Transition({}ms)", ms),
            None => write!(f, "Transition(unknown)"),
        }
    }
}

/// Message execution delay in 5 ms units
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub struct Delay(pub u8);

impl Delay {
    pub const NONE: Delay = Delay(0);

    #[inline]
    pub fn to_ms(self) -> u32 {
        self.0 as u32 * DELAY_STEP_MS
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// Optional transition parameters carried on a Set message
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TransitionParams {
    pub transition: TransitionTime,
    pub delay: Delay,
}

impl TransitionParams {
    pub const IMMEDIATE: TransitionParams = TransitionParams {
        transition: TransitionTime::IMMEDIATE,
        delay: Delay::NONE,
    };

    pub fn new(transition: TransitionTime, delay: Delay) -> Self {
        TransitionParams { transition, delay }
    }

    /// Resolved duration: unknown counts as immediate
    pub fn transition_ms(&self) -> u32 {
        self.transition.to_ms().unwrap_or(0)
    }

    pub fn delay_ms(&self) -> u32 {
        self.delay.to_ms()
    }
}

/// Number of 100 ms ticks covering `ms`
#[inline]
pub fn ticks_for(ms: u32) -> u32 {
    ms.div_ceil(TRANSITION_TICK_MS)
}
