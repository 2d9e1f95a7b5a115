//! Timer scheduling abstraction.
//!
//! Models never wait. They arm a timer with a stable [`TimerId`] and resume
//! when the owner of the event queue calls back with that id:
//! - Simulation and tests: [`VirtualTimers`](crate::VirtualTimers)
//! - Async hosts: the tokio driver in `meshlight-runtime`

use std::time::Duration;

use meshlight_core::{ElementId, ModelKind};
use thiserror::Error;

/// Which timer of a model instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerSlot {
    /// Delay / step timer of the descriptor with this index
    Transition(u8),
    /// Once-per-second clock of the Time server
    Clock,
}

/// Timer identity, stable across rearm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    pub element: ElementId,
    pub model: ModelKind,
    pub slot: TimerSlot,
}

impl TimerId {
    pub fn new(element: ElementId, model: ModelKind, slot: TimerSlot) -> Self {
        TimerId {
            element,
            model,
            slot,
        }
    }
}

/// One-shot or periodic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

/// Timer service failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("No free timer (capacity {0})")]
    Exhausted(usize),
}

/// Abstraction for arming and cancelling timers.
///
/// Starting an id that is already armed replaces the previous deadline:
/// there is never more than one pending expiry per id.
pub trait TimerService {
    fn start(&mut self, id: TimerId, duration: Duration, mode: TimerMode) -> Result<(), TimerError>;
    fn stop(&mut self, id: TimerId);
    fn is_armed(&self, id: TimerId) -> bool;
}
