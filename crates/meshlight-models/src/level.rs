//! Generic Level server
//!
//! Besides plain Set, Level supports Delta Set (relative to the value the
//! transaction started from) and Move Set (an unbounded ramp that only a
//! new Set or a zero delta stops).

use bytes::BytesMut;
use meshlight_core::{
    BindValue, BoundState, ElementId, ModelEvent, ModelKind, ModelState, StateValue,
    TransitionParams, UpdateSource, TRANSITION_TICK_MS,
};
use meshlight_state::{AckContext, DatasetGroup, DatasetId, DatasetReader, Transaction};
use meshlight_time::{TimerId, TimerSlot};
use meshlight_wire::{ModelMessage, SetParams, StatusMessage};
use tracing::debug;

use crate::{Change, ModelCtx, PublishState, SetOutcome, StepOutcome, TransitionModel};

/// Per-tick delta of a Move: `delta` per `transition_ms`, never rounding to zero
pub fn move_step(delta: i16, transition_ms: u32) -> i32 {
    if delta == 0 || transition_ms == 0 {
        return 0;
    }
    let per_tick = delta as i64 * TRANSITION_TICK_MS as i64 / transition_ms as i64;
    if per_tick == 0 {
        delta.signum() as i32
    } else {
        per_tick as i32
    }
}

/// Generic Level server
#[derive(Clone, Debug)]
pub struct LevelServer {
    element: ElementId,
    pub publish: PublishState,
    model: TransitionModel<i16>,
    /// Delta of the current Delta Set transaction
    last_delta: Option<i32>,
}

impl LevelServer {
    pub fn new(element: ElementId, scene_count: usize, window_ms: u64) -> Self {
        let timer = TimerId::new(element, ModelKind::GenLevel, TimerSlot::Transition(0));
        LevelServer {
            element,
            publish: PublishState::disabled(),
            model: TransitionModel::new(timer, i16::MIN, scene_count, window_ms),
            last_delta: None,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn model(&self) -> &TransitionModel<i16> {
        &self.model
    }

    pub fn status(&self) -> StatusMessage {
        StatusMessage::Level(self.model.transitional())
    }

    pub fn state(&self) -> ModelState {
        ModelState::Level {
            present: self.model.present(),
            target: self.model.target(),
            remaining_ms: self.model.remaining_ms(),
        }
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::LevelState, self.element)
    }

    fn change(&self, value: i16, params: TransitionParams, source: UpdateSource) -> Change {
        Change::new(self.element, BoundState::Level, BindValue::Level(value), params, source)
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Vec<Change> {
        match msg {
            ModelMessage::LevelGet => {
                ctx.reply(self.element, ack, self.status());
                ctx.emit(ModelEvent::CurrentState {
                    element: self.element,
                    state: self.state(),
                });
                Vec::new()
            }
            ModelMessage::LevelSet(set) => {
                self.last_delta = None;
                let params = ctx.resolve(set.transition);
                let outcome =
                    self.model
                        .handle_set(ctx, ack, set.tid, set.ack, set.value, params, UpdateSource::Network);
                self.conclude(ctx, ack, set.ack, outcome, params)
            }
            ModelMessage::LevelDeltaSet(set) => self.delta_set(ctx, ack, set),
            ModelMessage::LevelMoveSet(set) => self.move_set(ctx, ack, set),
            other => {
                debug!(element = %self.element, ?other, "not a Level message");
                Vec::new()
            }
        }
    }

    fn delta_set(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, set: &SetParams<i32>) -> Vec<Change> {
        let params = ctx.resolve(set.transition);
        let owed = self.model.owed_ack();
        let outcome = match self.model.transaction(set.tid, ack, ctx.now_ms) {
            Transaction::Duplicate if self.last_delta == Some(set.value) => SetOutcome::Duplicate,
            // Same transaction, new delta: still relative to where it began
            transaction => {
                self.last_delta = Some(set.value);
                let target = self.model.tracker().initial_state().offset(set.value);
                let step = self.model.start(ctx, target, params, UpdateSource::Network);
                let superseded = if transaction == Transaction::New { owed } else { None };
                self.model.finish_set(set.ack, step, superseded)
            }
        };
        self.conclude(ctx, ack, set.ack, outcome, params)
    }

    fn move_set(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, set: &SetParams<i16>) -> Vec<Change> {
        self.last_delta = None;
        let owed = self.model.owed_ack();
        if self.model.transaction(set.tid, ack, ctx.now_ms) == Transaction::Duplicate {
            if set.ack {
                ctx.reply(self.element, ack, self.status());
            }
            return Vec::new();
        }

        let params = ctx.resolve(set.transition);
        let per_tick = move_step(set.value, params.transition_ms());
        let step = if per_tick == 0 {
            self.model.stop(ctx)
        } else {
            self.model
                .start_move(ctx, per_tick, params.delay_ms(), UpdateSource::Network)
        };
        let outcome = self.model.finish_set(set.ack, step, owed);
        // Empty while moving: the move cascades tick by tick from on_timer.
        // A stop settles bound states at the present value.
        self.conclude(ctx, ack, set.ack, outcome, TransitionParams::IMMEDIATE)
    }

    fn conclude(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        ack: AckContext,
        ack_requested: bool,
        outcome: SetOutcome,
        params: TransitionParams,
    ) -> Vec<Change> {
        match outcome {
            SetOutcome::Duplicate => {
                if ack_requested {
                    ctx.reply(self.element, ack, self.status());
                }
                Vec::new()
            }
            SetOutcome::Applied { step, reply_now, superseded } => {
                if let Some(owed) = superseded {
                    ctx.reply(self.element, owed, self.status());
                }
                if reply_now {
                    ctx.reply(self.element, ack, self.status());
                }
                self.after_change(ctx, step, UpdateSource::Network);
                if self.model.is_move() {
                    Vec::new()
                } else {
                    vec![self.change(self.model.target(), params, UpdateSource::Network)]
                }
            }
        }
    }

    /// Local write (application)
    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: i16, params: TransitionParams, source: UpdateSource) -> Change {
        self.model.tracker_mut().reset();
        self.last_delta = None;
        let step = self.model.start(ctx, value, params, source);
        self.after_change(ctx, step, source);
        self.change(value, params, source)
    }

    pub fn apply_binding(&mut self, ctx: &mut ModelCtx<'_>, value: BindValue, params: TransitionParams) -> Option<BindValue> {
        debug_assert!(matches!(value, BindValue::Level(_)), "Level bound to {:?}", value);
        let BindValue::Level(level) = value else {
            return None;
        };
        let step = self.model.start(ctx, level, params, UpdateSource::Binding);
        self.after_change(ctx, step, UpdateSource::Binding);
        Some(BindValue::Level(self.model.target()))
    }

    /// Timer fired. Each step of a Move cascades immediately.
    pub fn on_timer(&mut self, ctx: &mut ModelCtx<'_>) -> Option<Change> {
        let outcome = self.model.on_timer(ctx);
        if outcome.finished || (outcome.started && self.model.is_move()) {
            if let Some(ack) = self.model.take_deferred_ack() {
                ctx.reply(self.element, ack, self.status());
            }
        }
        let source = self.model.source();
        let (status, state) = (self.status(), self.state());
        ctx.announce(self.element, &mut self.publish, status, state, source, outcome, true);
        if outcome.finished {
            self.persist_if_changed(ctx);
        }

        if self.model.is_move() && outcome.changed {
            Some(self.change(self.model.present(), TransitionParams::IMMEDIATE, source))
        } else {
            None
        }
    }

    pub fn store_scene(&mut self, ctx: &mut ModelCtx<'_>, slot: usize) {
        self.model.store_scene(slot);
        self.persist(ctx);
    }

    pub fn recall_scene(&mut self, ctx: &mut ModelCtx<'_>, slot: usize, params: TransitionParams) {
        if let Some(value) = self.model.scene(slot) {
            let step = self.model.start(ctx, value, params, UpdateSource::SceneRecall);
            self.after_change(ctx, step, UpdateSource::SceneRecall);
        }
    }

    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) -> Option<i16> {
        let id = self.dataset();
        let data = ctx.load(id)?;
        match self.model.decode_values(&mut DatasetReader::new(id, &data)) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%err, "discarding Level dataset");
                None
            }
        }
    }

    pub fn power_up(&mut self, ctx: &mut ModelCtx<'_>, value: i16) -> Change {
        self.model.jump(ctx, value, UpdateSource::PowerUp);
        ctx.emit(ModelEvent::StateUpdate {
            element: self.element,
            state: self.state(),
            source: UpdateSource::PowerUp,
        });
        self.change(value, TransitionParams::IMMEDIATE, UpdateSource::PowerUp)
    }

    fn after_change(&mut self, ctx: &mut ModelCtx<'_>, step: StepOutcome, source: UpdateSource) {
        let (status, state) = (self.status(), self.state());
        ctx.announce(self.element, &mut self.publish, status, state, source, step, false);
        self.persist_if_changed(ctx);
    }

    fn persist_if_changed(&mut self, ctx: &mut ModelCtx<'_>) {
        if self.model.needs_save() {
            self.persist(ctx);
        }
    }

    fn persist(&mut self, ctx: &mut ModelCtx<'_>) {
        let mut buf = BytesMut::new();
        self.model.encode_values(&mut buf);
        ctx.save(self.dataset(), &buf);
    }
}
