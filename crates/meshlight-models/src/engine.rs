//! Generic transition engine shared by every transitionable server
//!
//! [`TransitionModel`] owns one state descriptor, its transaction tracker and
//! its transition scheduler, and applies scheduler steps to the timer
//! service. Servers only decide targets and render statuses.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use meshlight_core::{
    BindValue, BoundState, ElementId, MeshResult, StateValue, TransitionParams, TransitionTime,
    UpdateSource,
};
use meshlight_state::{
    AckContext, BindingKey, DatasetReader, StateDescriptor, Transaction, TransactionTracker,
};
use meshlight_time::{Phase, Step, TimerId, TimerMode, TimerRequest, Transition};
use meshlight_wire::Transitional;
use tracing::{debug, warn};

use crate::ModelCtx;

/// What a scheduler step did to the stored value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Present value changed
    pub changed: bool,
    /// The transition reached its target
    pub finished: bool,
    /// The delay expired on this step
    pub started: bool,
}

/// Result of a transactional Set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// Retransmission of the current transaction; nothing changed
    Duplicate,
    Applied {
        step: StepOutcome,
        /// Acknowledged Set: reply with the current Status now
        reply_now: bool,
        /// Deferred reply owed to the transaction this Set superseded
        superseded: Option<AckContext>,
    },
}

/// A bound state changed and the change must cascade
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Change {
    pub key: BindingKey,
    /// Value the state is heading to
    pub value: BindValue,
    pub params: TransitionParams,
    pub source: UpdateSource,
}

impl Change {
    pub fn new(
        element: ElementId,
        state: BoundState,
        value: BindValue,
        params: TransitionParams,
        source: UpdateSource,
    ) -> Self {
        Change {
            key: BindingKey::new(element, state),
            value,
            params,
            source,
        }
    }
}

/// Values that can be written to NVM
pub trait PersistValue: StateValue {
    fn put(self, buf: &mut BytesMut);
    fn get(reader: &mut DatasetReader<'_>) -> MeshResult<Self>;
}

impl PersistValue for bool {
    fn put(self, buf: &mut BytesMut) {
        buf.put_u8(self as u8);
    }

    fn get(reader: &mut DatasetReader<'_>) -> MeshResult<Self> {
        Ok(reader.u8()? != 0)
    }
}

impl PersistValue for i16 {
    fn put(self, buf: &mut BytesMut) {
        buf.put_i16_le(self);
    }

    fn get(reader: &mut DatasetReader<'_>) -> MeshResult<Self> {
        Ok(reader.u16()? as i16)
    }
}

impl PersistValue for u16 {
    fn put(self, buf: &mut BytesMut) {
        buf.put_u16_le(self);
    }

    fn get(reader: &mut DatasetReader<'_>) -> MeshResult<Self> {
        reader.u16()
    }
}

/// Descriptor + transaction tracker + transition scheduler
#[derive(Clone, Debug)]
pub struct TransitionModel<T> {
    timer: TimerId,
    desc: StateDescriptor<T>,
    tracker: TransactionTracker<T>,
    transition: Transition<T>,
    source: UpdateSource,
    /// Restore value last written to NVM
    saved: Option<T>,
}

impl<T: StateValue> TransitionModel<T> {
    pub fn new(timer: TimerId, initial: T, scene_count: usize, window_ms: u64) -> Self {
        let mut desc = StateDescriptor::new(initial, scene_count);
        desc.set_target(initial);
        TransitionModel {
            timer,
            desc,
            tracker: TransactionTracker::new(window_ms),
            transition: Transition::new(),
            source: UpdateSource::Local,
            saved: None,
        }
    }

    pub fn timer_id(&self) -> TimerId {
        self.timer
    }

    /// Get the present value
    #[inline]
    pub fn present(&self) -> T {
        self.desc.get_state()
    }

    /// Get the value the state is heading to
    pub fn target(&self) -> T {
        if self.transition.is_active() {
            self.transition.target()
        } else {
            self.desc.get_state()
        }
    }

    pub fn remaining_ms(&self) -> u32 {
        self.transition.remaining_ms()
    }

    pub fn is_active(&self) -> bool {
        self.transition.is_active()
    }

    pub fn is_move(&self) -> bool {
        self.transition.is_move()
    }

    pub fn phase(&self) -> Phase {
        self.transition.phase()
    }

    /// Provenance of the running or last change
    pub fn source(&self) -> UpdateSource {
        self.source
    }

    pub fn descriptor(&self) -> &StateDescriptor<T> {
        &self.desc
    }

    pub fn tracker(&self) -> &TransactionTracker<T> {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TransactionTracker<T> {
        &mut self.tracker
    }

    /// Status view: target and remaining time only while moving
    pub fn transitional(&self) -> Transitional<T> {
        let present = self.present();
        if self.transition.is_move() {
            Transitional::moving(present, self.transition.target(), TransitionTime::UNKNOWN)
        } else if self.transition.is_active() {
            Transitional::moving(
                present,
                self.transition.target(),
                TransitionTime::from_ms(self.transition.remaining_ms()),
            )
        } else {
            Transitional::settled(present)
        }
    }

    /// Remaining time for status messages; unknown while moving
    pub fn remaining_time(&self) -> Option<TransitionTime> {
        if self.transition.is_move() {
            Some(TransitionTime::UNKNOWN)
        } else if self.transition.is_active() {
            Some(TransitionTime::from_ms(self.transition.remaining_ms()))
        } else {
            None
        }
    }

    /// Classify a transactional message
    pub fn transaction(&mut self, tid: u8, ack: AckContext, now_ms: u64) -> Transaction {
        let present = self.present();
        self.tracker
            .begin(tid, ack.src, ack.app_key_index, ack.for_unicast, present, now_ms)
    }

    /// Dedup, then drive toward `target`. A delayed unacknowledged Set owes
    /// a Status when its transition completes.
    pub fn handle_set(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        ack: AckContext,
        tid: u8,
        ack_requested: bool,
        target: T,
        params: TransitionParams,
        source: UpdateSource,
    ) -> SetOutcome {
        let owed = self.owed_ack();
        if self.transaction(tid, ack, ctx.now_ms) == Transaction::Duplicate {
            debug!(timer = ?self.timer, tid, "duplicate set");
            return SetOutcome::Duplicate;
        }
        let step = self.start(ctx, target, params, source);
        self.finish_set(ack_requested, step, owed)
    }

    /// Deferred acknowledgement the current transaction still owes; a new
    /// transaction must flush it before taking over the tracker
    pub fn owed_ack(&self) -> Option<AckContext> {
        self.tracker.ack_pending().then(|| self.tracker.ack_context())
    }

    /// Ack bookkeeping after a Set started its transition
    pub fn finish_set(&mut self, ack_requested: bool, step: StepOutcome, superseded: Option<AckContext>) -> SetOutcome {
        let deferred = !ack_requested && self.transition.phase() == Phase::Delaying;
        self.tracker.set_ack_pending(deferred);
        SetOutcome::Applied {
            step,
            reply_now: ack_requested,
            superseded,
        }
    }

    /// Drive toward `target` with the given timing
    pub fn start(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        target: T,
        params: TransitionParams,
        source: UpdateSource,
    ) -> StepOutcome {
        self.source = source;
        self.desc.set_target(target);
        let step = self.transition.begin(
            self.present(),
            target,
            params.transition_ms(),
            params.delay_ms(),
        );
        self.apply(ctx, step)
    }

    /// Start an unbounded move
    pub fn start_move(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        delta_per_tick: i32,
        delay_ms: u32,
        source: UpdateSource,
    ) -> StepOutcome {
        self.source = source;
        let step = self.transition.begin_move(self.present(), delta_per_tick, delay_ms);
        let target = self.target();
        self.desc.set_target(target);
        self.apply(ctx, step)
    }

    /// Stop any transition where it is
    pub fn stop(&mut self, ctx: &mut ModelCtx<'_>) -> StepOutcome {
        let present = self.present();
        self.desc.set_target(present);
        let step = self.transition.stop(present);
        self.apply(ctx, step)
    }

    /// Write `value` immediately, cancelling any transition
    pub fn jump(&mut self, ctx: &mut ModelCtx<'_>, value: T, source: UpdateSource) -> StepOutcome {
        self.start(ctx, value, TransitionParams::IMMEDIATE, source)
    }

    /// The model's transition timer fired
    pub fn on_timer(&mut self, ctx: &mut ModelCtx<'_>) -> StepOutcome {
        let present = self.present();
        let (step, started) = match self.transition.phase() {
            Phase::Delaying => (self.transition.on_delay_expired(present), true),
            _ => (self.transition.tick(present), false),
        };
        let mut outcome = self.apply(ctx, step);
        outcome.started = started;
        outcome
    }

    /// Owed acknowledgement, once the transition has completed
    pub fn take_deferred_ack(&mut self) -> Option<AckContext> {
        self.tracker.take_ack()
    }

    /// Copy present into scene slot `slot`
    pub fn store_scene(&mut self, slot: usize) -> bool {
        self.desc.store_scene(slot)
    }

    pub fn scene(&self, slot: usize) -> Option<T> {
        self.desc.scene(slot)
    }

    fn apply(&mut self, ctx: &mut ModelCtx<'_>, mut step: Step<T>) -> StepOutcome {
        let armed = match step.timer {
            TimerRequest::Keep => Ok(()),
            TimerRequest::Cancel => {
                ctx.timers.stop(self.timer);
                Ok(())
            }
            TimerRequest::OneShot(ms) => {
                ctx.timers
                    .start(self.timer, Duration::from_millis(ms as u64), TimerMode::OneShot)
            }
            TimerRequest::Periodic(ms) => {
                ctx.timers
                    .start(self.timer, Duration::from_millis(ms as u64), TimerMode::Periodic)
            }
        };

        if let Err(err) = armed {
            warn!(timer = ?self.timer, %err, "no timer for transition, jumping to target");
            ctx.timers.stop(self.timer);
            step = self.transition.complete();
        }

        let mut outcome = StepOutcome {
            finished: step.finished,
            ..StepOutcome::default()
        };
        if let Some(value) = step.value {
            outcome.changed = value != self.present();
            self.desc.set_state(value, self.source);
        }
        if step.finished {
            self.desc.set_target(self.present());
        }
        outcome
    }
}

impl<T: PersistValue> TransitionModel<T> {
    /// The value to restore differs from what NVM holds
    pub fn needs_save(&self) -> bool {
        self.saved != Some(self.target())
    }

    /// Append the value to restore plus every scene snapshot
    pub fn encode_values(&mut self, buf: &mut BytesMut) {
        let restore = self.target();
        restore.put(buf);
        for value in self.desc.scenes() {
            value.put(buf);
        }
        self.saved = Some(restore);
    }

    /// Read what [`encode_values`](Self::encode_values) wrote; returns the
    /// value to restore and fills the scene slots
    pub fn decode_values(&mut self, reader: &mut DatasetReader<'_>) -> MeshResult<T> {
        let restore = T::get(reader)?;
        for slot in 0..self.desc.scene_count() {
            let value = T::get(reader)?;
            self.desc.set_scene(slot, value);
        }
        self.saved = Some(restore);
        Ok(restore)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use meshlight_core::{Delay, MeshAddress, ModelEvent, ModelKind, AppKeyIndex};
    use meshlight_state::{DatasetGroup, DatasetId, MemoryNvm};
    use meshlight_time::{TimerService, TimerSlot, VirtualTimers};
    use meshlight_wire::OutboundMessage;

    /// Owned pieces a [`ModelCtx`] borrows from
    pub(crate) struct Harness {
        pub timers: VirtualTimers,
        pub nvm: MemoryNvm,
        pub outbox: Vec<OutboundMessage>,
        pub events: Vec<ModelEvent>,
        pub default_transition: TransitionParams,
    }

    impl Harness {
        pub fn new() -> Self {
            Harness {
                timers: VirtualTimers::new(),
                nvm: MemoryNvm::new(),
                outbox: Vec::new(),
                events: Vec::new(),
                default_transition: TransitionParams::IMMEDIATE,
            }
        }

        pub fn ctx(&mut self) -> ModelCtx<'_> {
            ModelCtx {
                now_ms: self.timers.now_ms(),
                timers: &mut self.timers,
                nvm: &mut self.nvm,
                outbox: &mut self.outbox,
                events: &mut self.events,
                default_transition: self.default_transition,
            }
        }
    }

    pub(crate) fn ack() -> AckContext {
        AckContext {
            src: MeshAddress(0x0001),
            app_key_index: AppKeyIndex(0),
            for_unicast: true,
        }
    }

    pub(crate) fn params(transition_100ms: u8, delay_5ms: u8) -> TransitionParams {
        TransitionParams::new(TransitionTime::new(transition_100ms, 0), Delay(delay_5ms))
    }

    fn level_model() -> TransitionModel<i16> {
        let timer = TimerId::new(ElementId(0), ModelKind::GenLevel, TimerSlot::Transition(0));
        TransitionModel::new(timer, 0, 2, 6_000)
    }

    #[test]
    fn test_set_duplicate() {
        let mut h = Harness::new();
        let mut model = level_model();

        let first = model.handle_set(&mut h.ctx(), ack(), 1, true, 50, TransitionParams::IMMEDIATE, UpdateSource::Network);
        assert!(matches!(first, SetOutcome::Applied { reply_now: true, .. }));
        assert_eq!(model.present(), 50);

        let again = model.handle_set(&mut h.ctx(), ack(), 1, true, 80, TransitionParams::IMMEDIATE, UpdateSource::Network);
        assert_eq!(again, SetOutcome::Duplicate);
        assert_eq!(model.present(), 50);
    }

    #[test]
    fn test_delayed_acked_set_replies_now() {
        let mut h = Harness::new();
        let mut model = level_model();

        let outcome = model.handle_set(&mut h.ctx(), ack(), 1, true, 100, params(1, 10), UpdateSource::Network);
        assert!(matches!(outcome, SetOutcome::Applied { reply_now: true, superseded: None, .. }));
        assert_eq!(model.phase(), Phase::Delaying);
        assert_eq!(model.take_deferred_ack(), None);
    }

    #[test]
    fn test_delayed_unacked_set_owes_status() {
        let mut h = Harness::new();
        let mut model = level_model();

        let outcome = model.handle_set(&mut h.ctx(), ack(), 1, false, 100, params(1, 10), UpdateSource::Network);
        assert!(matches!(outcome, SetOutcome::Applied { reply_now: false, .. }));
        assert_eq!(model.owed_ack(), Some(ack()));

        // A new transaction flushes what the previous one owed
        let next = model.handle_set(&mut h.ctx(), ack(), 2, false, 200, params(1, 10), UpdateSource::Network);
        assert!(matches!(next, SetOutcome::Applied { superseded: Some(_), .. }));
        assert_eq!(model.take_deferred_ack(), Some(ack()));
        assert_eq!(model.take_deferred_ack(), None);
    }

    #[test]
    fn test_save_only_when_restore_value_changes() {
        let mut h = Harness::new();
        let mut model = level_model();
        assert!(model.needs_save());
        model.encode_values(&mut BytesMut::new());
        assert!(!model.needs_save());

        model.start(&mut h.ctx(), 100, params(2, 0), UpdateSource::Local);
        assert!(model.needs_save());
        model.encode_values(&mut BytesMut::new());
        while h.timers.pop_due(10_000).is_some() {
            model.on_timer(&mut h.ctx());
            assert!(!model.needs_save());
        }
        assert_eq!(model.present(), 100);
    }

    #[test]
    fn test_timer_driven_transition() {
        let mut h = Harness::new();
        let mut model = level_model();
        model.start(&mut h.ctx(), 100, params(2, 0), UpdateSource::Local);
        assert!(h.timers.is_armed(model.timer_id()));

        let mut values = Vec::new();
        while let Some(id) = h.timers.pop_due(10_000) {
            assert_eq!(id, model.timer_id());
            let outcome = model.on_timer(&mut h.ctx());
            values.push(model.present());
            if outcome.finished {
                break;
            }
        }
        assert_eq!(values, vec![50, 100]);
        assert!(!h.timers.is_armed(model.timer_id()));
        assert_eq!(model.transitional(), Transitional::settled(100));
    }

    #[test]
    fn test_timer_exhaustion_collapses() {
        let mut h = Harness::new();
        h.timers = VirtualTimers::with_capacity(0);
        let mut model = level_model();

        let outcome = model.start(&mut h.ctx(), 300, params(10, 0), UpdateSource::Local);
        assert!(outcome.changed);
        assert!(outcome.finished);
        assert_eq!(model.present(), 300);
        assert!(!model.is_active());
    }

    #[test]
    fn test_move_status() {
        let mut h = Harness::new();
        let mut model = level_model();
        model.start_move(&mut h.ctx(), -50, 0, UpdateSource::Network);

        let status = model.transitional();
        assert_eq!(status.target, Some((i16::MIN, TransitionTime::UNKNOWN)));

        model.on_timer(&mut h.ctx());
        assert_eq!(model.present(), -50);
        model.stop(&mut h.ctx());
        assert_eq!(model.transitional(), Transitional::settled(-50));
    }

    #[test]
    fn test_persist_values() {
        let mut h = Harness::new();
        let mut model = level_model();
        model.jump(&mut h.ctx(), -7, UpdateSource::Local);
        model.store_scene(1);

        let mut buf = BytesMut::new();
        model.encode_values(&mut buf);
        let id = DatasetId::new(DatasetGroup::LevelState, ElementId(0));

        let mut restored = level_model();
        let mut reader = DatasetReader::new(id, &buf);
        assert_eq!(restored.decode_values(&mut reader).unwrap(), -7);
        assert_eq!(restored.scene(1), Some(-7));
        assert_eq!(restored.scene(0), Some(0));
    }
}
