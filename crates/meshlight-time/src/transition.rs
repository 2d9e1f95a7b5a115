//! Transition scheduler - one state machine per state descriptor
//!
//! ```text
//! Idle --delay>0--> Delaying --expiry--> Transitioning --last tick--> Idle
//!   \                   \                                 
//!    \--move----------> Moving (left only by a new Set or stop)
//! ```
//!
//! The machine is pure: it never touches timers or the stored value itself.
//! Every step returns the value to write (if any) and the timer request the
//! owner must apply, so a superseding Set is always cancel-then-rearm within
//! the same handler.

use meshlight_core::{ticks_for, StateValue, TRANSITION_TICK_MS};

/// Scheduler phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Delaying,
    Transitioning,
    Moving,
}

/// Timer action the owner must apply after a step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerRequest {
    /// Leave the timer as it is
    Keep,
    /// Stop the transition timer
    Cancel,
    /// Arm (or rearm) a one-shot timer
    OneShot(u32),
    /// Arm (or rearm) a periodic timer
    Periodic(u32),
}

/// Result of driving the state machine one step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step<T> {
    /// New present value to store, if it changes
    pub value: Option<T>,
    pub timer: TimerRequest,
    /// The transition reached its target on this step
    pub finished: bool,
}

impl<T> Step<T> {
    fn idle() -> Self {
        Step {
            value: None,
            timer: TimerRequest::Keep,
            finished: false,
        }
    }
}

/// Transition state machine over a state value type
#[derive(Clone, Debug, Default)]
pub struct Transition<T> {
    phase: Phase,
    /// Value captured when the transition (re)started
    initial: T,
    target: T,
    step: u32,
    steps: u32,
    /// Time left until target replaces present
    remaining_ms: u32,
    /// Transition length, kept while delaying
    transition_ms: u32,
    /// Per-tick delta for Move (0 = bounded transition)
    move_delta: i32,
}

impl<T: StateValue> Transition<T> {
    pub fn new() -> Self {
        Transition {
            phase: Phase::Idle,
            initial: T::default(),
            target: T::default(),
            step: 0,
            steps: 0,
            remaining_ms: 0,
            transition_ms: 0,
            move_delta: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn is_move(&self) -> bool {
        self.move_delta != 0 && self.phase != Phase::Idle
    }

    pub fn initial(&self) -> T {
        self.initial
    }

    pub fn target(&self) -> T {
        self.target
    }

    /// Time left; 0 when idle or moving
    pub fn remaining_ms(&self) -> u32 {
        self.remaining_ms
    }

    /// Interpolation cursor `(step, steps)`
    pub fn cursor(&self) -> (u32, u32) {
        (self.step, self.steps)
    }

    pub fn move_delta(&self) -> i32 {
        self.move_delta
    }

    /// Begin a bounded transition, superseding whatever was running
    pub fn begin(&mut self, present: T, target: T, transition_ms: u32, delay_ms: u32) -> Step<T> {
        self.initial = present;
        self.target = target;
        self.move_delta = 0;
        self.transition_ms = transition_ms;

        if delay_ms > 0 {
            self.phase = Phase::Delaying;
            self.step = 0;
            self.steps = ticks_for(transition_ms);
            self.remaining_ms = self.steps * TRANSITION_TICK_MS;
            return Step {
                value: None,
                timer: TimerRequest::OneShot(delay_ms),
                finished: false,
            };
        }

        self.start()
    }

    /// Begin an unbounded Move adding `delta_per_tick` every tick
    pub fn begin_move(&mut self, present: T, delta_per_tick: i32, delay_ms: u32) -> Step<T> {
        if delta_per_tick == 0 {
            return self.stop(present);
        }

        self.initial = present;
        self.move_delta = delta_per_tick;
        // Report the bound the move heads towards
        self.target = present.offset(delta_per_tick.signum() * (i32::MAX / 2));
        self.step = 0;
        self.steps = 0;
        self.remaining_ms = 0;

        if delay_ms > 0 {
            self.phase = Phase::Delaying;
            return Step {
                value: None,
                timer: TimerRequest::OneShot(delay_ms),
                finished: false,
            };
        }

        self.phase = Phase::Moving;
        Step {
            value: None,
            timer: TimerRequest::Periodic(TRANSITION_TICK_MS),
            finished: false,
        }
    }

    /// Stop any transition, leaving present where it is
    pub fn stop(&mut self, present: T) -> Step<T> {
        let was_active = self.is_active();
        self.phase = Phase::Idle;
        self.initial = present;
        self.target = present;
        self.move_delta = 0;
        self.step = 0;
        self.steps = 0;
        self.remaining_ms = 0;
        Step {
            value: None,
            timer: if was_active {
                TimerRequest::Cancel
            } else {
                TimerRequest::Keep
            },
            finished: false,
        }
    }

    /// The delay timer expired
    pub fn on_delay_expired(&mut self, present: T) -> Step<T> {
        if self.phase != Phase::Delaying {
            return Step::idle();
        }

        self.initial = present;
        if self.move_delta != 0 {
            self.phase = Phase::Moving;
            return Step {
                value: None,
                timer: TimerRequest::Periodic(TRANSITION_TICK_MS),
                finished: false,
            };
        }

        self.start()
    }

    /// The step timer expired
    pub fn tick(&mut self, present: T) -> Step<T> {
        match self.phase {
            Phase::Transitioning => {
                self.step += 1;
                self.remaining_ms = self.remaining_ms.saturating_sub(TRANSITION_TICK_MS);

                if self.step >= self.steps {
                    return self.complete();
                }
                Step {
                    value: Some(T::interpolate(self.initial, self.target, self.step, self.steps)),
                    timer: TimerRequest::Keep,
                    finished: false,
                }
            }
            Phase::Moving => Step {
                value: Some(present.offset(self.move_delta)),
                timer: TimerRequest::Keep,
                finished: false,
            },
            Phase::Idle | Phase::Delaying => Step::idle(),
        }
    }

    /// Jump straight to target (degenerate transition or no timer available)
    pub fn complete(&mut self) -> Step<T> {
        let target = self.target;
        self.phase = Phase::Idle;
        self.step = self.steps;
        self.remaining_ms = 0;
        self.move_delta = 0;
        self.initial = target;
        Step {
            value: Some(target),
            timer: TimerRequest::Cancel,
            finished: true,
        }
    }

    fn start(&mut self) -> Step<T> {
        self.steps = ticks_for(self.transition_ms);
        self.step = 0;

        if self.steps == 0 {
            return self.complete();
        }

        self.phase = Phase::Transitioning;
        self.remaining_ms = self.steps * TRANSITION_TICK_MS;
        Step {
            value: Some(T::interpolate(self.initial, self.target, 0, self.steps)),
            timer: TimerRequest::Periodic(TRANSITION_TICK_MS),
            finished: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_level_one_second_transition() {
        let mut t = Transition::<i16>::new();
        let step = t.begin(0, 100, 1_000, 0);
        assert_eq!(step.timer, TimerRequest::Periodic(100));
        assert_eq!(t.remaining_ms(), 1_000);

        let mut present = step.value.unwrap();
        let mut values = Vec::new();
        let mut remaining = Vec::new();
        for _ in 0..10 {
            let step = t.tick(present);
            present = step.value.unwrap();
            values.push(present);
            remaining.push(t.remaining_ms());
        }

        assert_eq!(values, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(remaining, vec![900, 800, 700, 600, 500, 400, 300, 200, 100, 0]);
        assert_eq!(t.phase(), Phase::Idle);
    }

    #[test]
    fn test_delay_then_transition() {
        let mut t = Transition::<u16>::new();
        let step = t.begin(0, 1_000, 200, 50);
        assert_eq!(step.timer, TimerRequest::OneShot(50));
        assert_eq!(step.value, None);
        assert_eq!(t.phase(), Phase::Delaying);
        assert_eq!(t.remaining_ms(), 200);

        let step = t.on_delay_expired(0);
        assert_eq!(step.timer, TimerRequest::Periodic(100));
        assert_eq!(t.phase(), Phase::Transitioning);

        assert_eq!(t.tick(0).value, Some(500));
        let last = t.tick(500);
        assert_eq!(last.value, Some(1_000));
        assert!(last.finished);
        assert_eq!(last.timer, TimerRequest::Cancel);
    }

    #[test]
    fn test_zero_steps_immediate() {
        let mut t = Transition::<u16>::new();
        let step = t.begin(5, 9, 0, 0);
        assert_eq!(step.value, Some(9));
        assert!(step.finished);
        assert!(!t.is_active());
        assert_eq!(t.remaining_ms(), 0);
    }

    #[test]
    fn test_delay_with_zero_transition() {
        let mut t = Transition::<u16>::new();
        t.begin(5, 9, 0, 100);
        let step = t.on_delay_expired(5);
        assert_eq!(step.value, Some(9));
        assert!(step.finished);
    }

    #[test]
    fn test_move_runs_until_stopped() {
        let mut t = Transition::<i16>::new();
        let step = t.begin_move(i16::MAX - 250, 100, 0);
        assert_eq!(step.timer, TimerRequest::Periodic(100));
        assert_eq!(t.target(), i16::MAX);
        assert!(t.is_move());

        let mut present = i16::MAX - 250;
        for _ in 0..5 {
            present = t.tick(present).value.unwrap();
        }
        // Clamped at the bound and still moving
        assert_eq!(present, i16::MAX);
        assert_eq!(t.phase(), Phase::Moving);

        let step = t.stop(present);
        assert_eq!(step.timer, TimerRequest::Cancel);
        assert_eq!(t.tick(present).value, None);
    }

    #[test]
    fn test_stale_tick_ignored() {
        let mut t = Transition::<u16>::new();
        assert_eq!(t.tick(3).value, None);
        assert_eq!(t.on_delay_expired(3).value, None);
    }

    #[test]
    fn test_restart_snapshots_present() {
        let mut t = Transition::<i16>::new();
        t.begin(0, 1_000, 1_000, 0);
        let present = t.tick(0).value.unwrap();
        let present = t.tick(present).value.unwrap();
        assert_eq!(present, 200);

        t.begin(present, -1_000, 1_000, 0);
        assert_eq!(t.initial(), 200);
        let next = t.tick(present).value.unwrap();
        assert_eq!(next, 80);
    }

    proptest! {
        #[test]
        fn prop_transition_monotonic_and_exact(
            initial in any::<u16>(),
            target in any::<u16>(),
            ms in 1u32..20_000,
        ) {
            let mut t = Transition::<u16>::new();
            let first = t.begin(initial, target, ms, 0);
            let mut present = first.value.unwrap();
            let mut last_remaining = t.remaining_ms();
            let mut finished = false;

            while !finished {
                let step = t.tick(present);
                let next = step.value.unwrap();
                if target >= initial {
                    prop_assert!(next >= present);
                } else {
                    prop_assert!(next <= present);
                }
                prop_assert!(t.remaining_ms() < last_remaining);
                last_remaining = t.remaining_ms();
                present = next;
                finished = step.finished;
            }

            prop_assert_eq!(present, target);
            prop_assert_eq!(t.remaining_ms(), 0);
        }

        #[test]
        fn prop_restart_continuity(
            target_a in any::<i16>(),
            target_b in any::<i16>(),
            ticks in 1u32..9,
        ) {
            let mut t = Transition::<i16>::new();
            let mut present = t.begin(0, target_a, 1_000, 0).value.unwrap();
            for _ in 0..ticks {
                present = t.tick(present).value.unwrap();
            }

            let restart = t.begin(present, target_b, 1_000, 0);
            prop_assert_eq!(t.initial(), present);
            // Restart never jumps: the first value is the snapshot itself
            prop_assert_eq!(restart.value.unwrap(), present);
        }
    }
}
