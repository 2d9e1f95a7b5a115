//! Deterministic virtual timer wheel
//!
//! Time only moves when the owner asks it to. Expiries are delivered one at a
//! time in deadline order (ties broken by arming order), so a handler that
//! rearms or cancels timers sees a consistent wheel before the next expiry.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::{TimerError, TimerId, TimerMode, TimerService};

#[derive(Clone, Copy, Debug)]
struct Armed {
    deadline_ms: u64,
    period_ms: Option<u64>,
    seq: u64,
}

/// Virtual clock + timer set
#[derive(Debug, Default)]
pub struct VirtualTimers {
    /// Current virtual time
    now_ms: u64,
    armed: BTreeMap<TimerId, Armed>,
    /// Maximum simultaneously armed timers (`None` = unbounded)
    capacity: Option<usize>,
    seq: u64,
}

impl VirtualTimers {
    pub fn new() -> Self {
        VirtualTimers::default()
    }

    /// Timer wheel with a fixed number of slots
    pub fn with_capacity(capacity: usize) -> Self {
        VirtualTimers {
            capacity: Some(capacity),
            ..VirtualTimers::default()
        }
    }

    /// Current virtual time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Number of armed timers
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Deadline of the next expiry, if any
    pub fn next_deadline(&self) -> Option<u64> {
        self.armed.values().map(|a| a.deadline_ms).min()
    }

    /// Pop the next timer due at or before `until_ms`, advancing the clock to
    /// its deadline. Periodic timers are rearmed one period later.
    /// Returns `None` (and advances the clock to `until_ms`) when nothing is due.
    pub fn pop_due(&mut self, until_ms: u64) -> Option<TimerId> {
        let next = self
            .armed
            .iter()
            .filter(|(_, a)| a.deadline_ms <= until_ms)
            .min_by_key(|(_, a)| (a.deadline_ms, a.seq))
            .map(|(id, a)| (*id, *a));

        match next {
            Some((id, armed)) => {
                self.now_ms = self.now_ms.max(armed.deadline_ms);
                match armed.period_ms {
                    Some(period) => {
                        self.seq += 1;
                        self.armed.insert(
                            id,
                            Armed {
                                deadline_ms: armed.deadline_ms + period,
                                period_ms: Some(period),
                                seq: self.seq,
                            },
                        );
                    }
                    None => {
                        self.armed.remove(&id);
                    }
                }
                Some(id)
            }
            None => {
                self.now_ms = self.now_ms.max(until_ms);
                None
            }
        }
    }
}

impl TimerService for VirtualTimers {
    fn start(&mut self, id: TimerId, duration: Duration, mode: TimerMode) -> Result<(), TimerError> {
        if let Some(capacity) = self.capacity {
            if !self.armed.contains_key(&id) && self.armed.len() >= capacity {
                return Err(TimerError::Exhausted(capacity));
            }
        }

        let ms = duration.as_millis() as u64;
        self.seq += 1;
        self.armed.insert(
            id,
            Armed {
                deadline_ms: self.now_ms + ms,
                period_ms: match mode {
                    TimerMode::OneShot => None,
                    TimerMode::Periodic => Some(ms.max(1)),
                },
                seq: self.seq,
            },
        );
        Ok(())
    }

    fn stop(&mut self, id: TimerId) {
        self.armed.remove(&id);
    }

    fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }
}
