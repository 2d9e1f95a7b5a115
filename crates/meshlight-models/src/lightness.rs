//! Light Lightness server
//!
//! Lightness Actual is perceptual; Lightness Linear is its square on the
//! same 16-bit scale. Only Actual is stored, Linear is derived.

use bytes::BytesMut;
use meshlight_core::{
    BindValue, BoundState, ElementId, ModelEvent, ModelKind, ModelState, SettingKind,
    TransitionParams, UpdateSource,
};
use meshlight_state::{AckContext, DatasetGroup, DatasetId, DatasetReader};
use meshlight_time::{TimerId, TimerSlot};
use meshlight_wire::{ModelMessage, OnPowerUp, RangeStatusCode, SetParams, StatusMessage, Transitional};
use tracing::debug;

use crate::{ActualSettings, Change, ModelCtx, PublishState, SetOutcome, StepOutcome, TransitionModel};

/// Linear = ceil(65535 * (Actual / 65535)^2)
pub fn actual_to_linear(actual: u16) -> u16 {
    let a = actual as u64;
    ((a * a + 65_534) / 65_535) as u16
}

/// Actual = floor(65535 * sqrt(Linear / 65535))
pub fn linear_to_actual(linear: u16) -> u16 {
    let n = linear as u64 * 65_535;
    let mut root = (n as f64).sqrt() as u64;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root.min(u16::MAX as u64) as u16
}

/// Light Lightness (+ Setup) server
#[derive(Clone, Debug)]
pub struct LightnessServer {
    element: ElementId,
    pub publish: PublishState,
    model: TransitionModel<u16>,
    settings: ActualSettings,
}

impl LightnessServer {
    pub fn new(element: ElementId, scene_count: usize, window_ms: u64) -> Self {
        let timer = TimerId::new(element, ModelKind::LightLightness, TimerSlot::Transition(0));
        LightnessServer {
            element,
            publish: PublishState::disabled(),
            model: TransitionModel::new(timer, 0, scene_count, window_ms),
            settings: ActualSettings::default(),
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn model(&self) -> &TransitionModel<u16> {
        &self.model
    }

    pub fn settings(&self) -> ActualSettings {
        self.settings
    }

    pub fn status(&self) -> StatusMessage {
        StatusMessage::Lightness(self.model.transitional())
    }

    pub fn linear_status(&self) -> StatusMessage {
        let actual = self.model.transitional();
        StatusMessage::LightnessLinear(Transitional {
            present: actual_to_linear(actual.present),
            target: actual
                .target
                .map(|(target, remaining)| (actual_to_linear(target), remaining)),
        })
    }

    pub fn state(&self) -> ModelState {
        ModelState::LightnessActual {
            present: self.model.present(),
            target: self.model.target(),
            remaining_ms: self.model.remaining_ms(),
        }
    }

    pub fn linear_state(&self) -> ModelState {
        ModelState::LightnessLinear {
            present: actual_to_linear(self.model.present()),
            target: actual_to_linear(self.model.target()),
            remaining_ms: self.model.remaining_ms(),
        }
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::Lightness, self.element)
    }

    fn change(&self, params: TransitionParams, source: UpdateSource) -> Change {
        Change::new(
            self.element,
            BoundState::LightnessActual,
            BindValue::LightnessActual(self.model.target()),
            params,
            source,
        )
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Vec<Change> {
        match msg {
            ModelMessage::LightnessGet => {
                ctx.reply(self.element, ack, self.status());
                ctx.emit(ModelEvent::CurrentState {
                    element: self.element,
                    state: self.state(),
                });
            }
            ModelMessage::LightnessLinearGet => {
                ctx.reply(self.element, ack, self.linear_status());
                ctx.emit(ModelEvent::CurrentState {
                    element: self.element,
                    state: self.linear_state(),
                });
            }
            ModelMessage::LightnessSet(set) => return self.handle_set(ctx, ack, set, set.value, false),
            ModelMessage::LightnessLinearSet(set) => {
                return self.handle_set(ctx, ack, set, linear_to_actual(set.value), true)
            }
            ModelMessage::LightnessLastGet => {
                ctx.reply(self.element, ack, StatusMessage::LightnessLast(self.settings.last));
            }
            ModelMessage::LightnessDefaultGet => {
                ctx.reply(self.element, ack, StatusMessage::LightnessDefault(self.settings.default));
            }
            ModelMessage::LightnessDefaultSet { value, ack: ack_requested } => {
                self.settings.default = *value;
                self.setting_changed(ctx, SettingKind::LightnessDefault, StatusMessage::LightnessDefault(*value));
                if *ack_requested {
                    ctx.reply(self.element, ack, StatusMessage::LightnessDefault(*value));
                }
            }
            ModelMessage::LightnessRangeGet => {
                ctx.reply(self.element, ack, self.range_status());
            }
            ModelMessage::LightnessRangeSet { range, ack: ack_requested } => {
                self.settings.range = *range;
                self.setting_changed(ctx, SettingKind::LightnessRange, self.range_status());
                if *ack_requested {
                    ctx.reply(self.element, ack, self.range_status());
                }
            }
            other => debug!(element = %self.element, ?other, "not a Light Lightness message"),
        }
        Vec::new()
    }

    /// Shared by Actual and Linear Set; `linear` picks the status to reply with
    fn handle_set(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        ack: AckContext,
        set: &SetParams<u16>,
        actual: u16,
        linear: bool,
    ) -> Vec<Change> {
        let params = ctx.resolve(set.transition);
        let target = self.settings.range.clamp_nonzero(actual);
        let outcome = self
            .model
            .handle_set(ctx, ack, set.tid, set.ack, target, params, UpdateSource::Network);
        let reply = |server: &Self| {
            if linear {
                server.linear_status()
            } else {
                server.status()
            }
        };
        match outcome {
            SetOutcome::Duplicate => {
                if set.ack {
                    ctx.reply(self.element, ack, reply(self));
                }
                Vec::new()
            }
            SetOutcome::Applied { step, reply_now, superseded } => {
                if let Some(owed) = superseded {
                    ctx.reply(self.element, owed, self.status());
                }
                if reply_now {
                    ctx.reply(self.element, ack, reply(self));
                }
                self.after_change(ctx, step, UpdateSource::Network);
                vec![self.change(params, UpdateSource::Network)]
            }
        }
    }

    fn range_status(&self) -> StatusMessage {
        StatusMessage::LightnessRange {
            status: RangeStatusCode::Success,
            range: self.settings.range,
        }
    }

    fn setting_changed(&mut self, ctx: &mut ModelCtx<'_>, setting: SettingKind, status: StatusMessage) {
        self.persist(ctx);
        ctx.publish(self.element, &mut self.publish, status, false);
        ctx.emit(ModelEvent::SettingChanged {
            element: self.element,
            setting,
        });
    }

    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: u16, params: TransitionParams, source: UpdateSource) -> Change {
        self.model.tracker_mut().reset();
        let target = self.settings.range.clamp_nonzero(value);
        let step = self.model.start(ctx, target, params, source);
        self.after_change(ctx, step, source);
        self.change(params, source)
    }

    pub fn apply_binding(&mut self, ctx: &mut ModelCtx<'_>, value: BindValue, params: TransitionParams) -> Option<BindValue> {
        let resolved = self.settings.resolve(value);
        debug_assert!(resolved.is_some(), "Lightness Actual bound to {:?}", value);
        let target = resolved?;
        let step = self.model.start(ctx, target, params, UpdateSource::Binding);
        self.after_change(ctx, step, UpdateSource::Binding);
        Some(BindValue::LightnessActual(self.model.target()))
    }

    pub fn on_timer(&mut self, ctx: &mut ModelCtx<'_>) -> Option<Change> {
        let outcome = self.model.on_timer(ctx);
        if outcome.finished {
            if let Some(ack) = self.model.take_deferred_ack() {
                ctx.reply(self.element, ack, self.status());
            }
        }
        let (status, state, source) = (self.status(), self.state(), self.model.source());
        ctx.announce(self.element, &mut self.publish, status, state, source, outcome, true);
        if outcome.finished {
            self.persist_if_changed(ctx);
        }
        None
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

    /// Restore settings and scenes; returns the last persisted Actual
    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) -> Option<u16> {
        let id = self.dataset();
        let data = ctx.load(id)?;
        let mut reader = DatasetReader::new(id, &data);
        let restored = ActualSettings::decode(&mut reader)
            .and_then(|settings| Ok((settings, self.model.decode_values(&mut reader)?)));
        match restored {
            Ok((settings, value)) => {
                self.settings = settings;
                Some(value)
            }
            Err(err) => {
                debug!(%err, "discarding Lightness dataset");
                None
            }
        }
    }

    pub fn power_up(&mut self, ctx: &mut ModelCtx<'_>, mode: OnPowerUp, restored: Option<u16>) -> Change {
        let value = self.settings.power_up_value(mode, restored);
        self.model.jump(ctx, value, UpdateSource::PowerUp);
        ctx.emit(ModelEvent::StateUpdate {
            element: self.element,
            state: self.state(),
            source: UpdateSource::PowerUp,
        });
        self.change(TransitionParams::IMMEDIATE, UpdateSource::PowerUp)
    }

    fn after_change(&mut self, ctx: &mut ModelCtx<'_>, step: StepOutcome, source: UpdateSource) {
        let target = self.model.target();
        if target != 0 {
            self.settings.last = target;
        }
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
        self.settings.encode(&mut buf);
        self.model.encode_values(&mut buf);
        ctx.save(self.dataset(), &buf);
    }
}
