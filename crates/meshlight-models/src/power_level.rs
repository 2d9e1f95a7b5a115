//! Generic Power Level server
//!
//! Power Actual is a transitionable u16 with three companions: Last (most
//! recent non-zero value), Default (used when turned on, 0 = use Last) and
//! Range (non-zero values are clamped into it).

use bytes::{BufMut, BytesMut};
use meshlight_core::{
    BindValue, BoundState, ElementId, MeshResult, ModelEvent, ModelKind, ModelState, SettingKind,
    TransitionParams, UpdateSource,
};
use meshlight_state::{AckContext, DatasetGroup, DatasetId, DatasetReader};
use meshlight_time::{TimerId, TimerSlot};
use meshlight_wire::{ModelMessage, OnPowerUp, RangeStatusCode, StateRange, StatusMessage};
use tracing::debug;

use crate::{Change, ModelCtx, PublishState, SetOutcome, StepOutcome, TransitionModel};

/// Last / Default / Range of an "Actual" state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActualSettings {
    pub last: u16,
    pub default: u16,
    pub range: StateRange,
}

impl ActualSettings {
    /// Value used when the state is turned on
    pub fn on_value(&self) -> u16 {
        let value = if self.default != 0 { self.default } else { self.last };
        self.range.clamp_nonzero(value)
    }

    /// Resolve a bound or requested value into a stored one
    pub fn resolve(&self, value: BindValue) -> Option<u16> {
        match value {
            BindValue::OnOff(true) => Some(self.on_value()),
            BindValue::OnOff(false) => Some(0),
            BindValue::PowerActual(v) | BindValue::LightnessActual(v) => Some(self.range.clamp_nonzero(v)),
            _ => None,
        }
    }

    /// Value to apply at boot
    pub fn power_up_value(&self, mode: OnPowerUp, restored: Option<u16>) -> u16 {
        match mode {
            OnPowerUp::Off => 0,
            OnPowerUp::Default => self.on_value(),
            OnPowerUp::Restore => self.range.clamp_nonzero(restored.unwrap_or(0)),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.last);
        buf.put_u16_le(self.default);
        buf.put_u16_le(self.range.min);
        buf.put_u16_le(self.range.max);
    }

    pub fn decode(reader: &mut DatasetReader<'_>) -> MeshResult<Self> {
        Ok(ActualSettings {
            last: reader.u16()?,
            default: reader.u16()?,
            range: StateRange {
                min: reader.u16()?,
                max: reader.u16()?,
            },
        })
    }
}

impl Default for ActualSettings {
    fn default() -> Self {
        ActualSettings {
            last: 0xFFFF,
            default: 0x0000,
            range: StateRange::default(),
        }
    }
}

/// Generic Power Level (+ Setup) server
#[derive(Clone, Debug)]
pub struct PowerLevelServer {
    element: ElementId,
    pub publish: PublishState,
    model: TransitionModel<u16>,
    settings: ActualSettings,
}

impl PowerLevelServer {
    pub fn new(element: ElementId, scene_count: usize, window_ms: u64) -> Self {
        let timer = TimerId::new(element, ModelKind::GenPowerLevel, TimerSlot::Transition(0));
        PowerLevelServer {
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
        StatusMessage::Power(self.model.transitional())
    }

    pub fn state(&self) -> ModelState {
        ModelState::PowerActual {
            present: self.model.present(),
            target: self.model.target(),
            remaining_ms: self.model.remaining_ms(),
        }
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::PowerLevel, self.element)
    }

    fn change(&self, params: TransitionParams, source: UpdateSource) -> Change {
        Change::new(
            self.element,
            BoundState::PowerActual,
            BindValue::PowerActual(self.model.target()),
            params,
            source,
        )
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Vec<Change> {
        match msg {
            ModelMessage::PowerGet => {
                ctx.reply(self.element, ack, self.status());
                ctx.emit(ModelEvent::CurrentState {
                    element: self.element,
                    state: self.state(),
                });
            }
            ModelMessage::PowerSet(set) => {
                let params = ctx.resolve(set.transition);
                let target = self.settings.range.clamp_nonzero(set.value);
                match self.model.handle_set(ctx, ack, set.tid, set.ack, target, params, UpdateSource::Network) {
                    SetOutcome::Duplicate => {
                        if set.ack {
                            ctx.reply(self.element, ack, self.status());
                        }
                    }
                    SetOutcome::Applied { step, reply_now, superseded } => {
                        if let Some(owed) = superseded {
                            ctx.reply(self.element, owed, self.status());
                        }
                        if reply_now {
                            ctx.reply(self.element, ack, self.status());
                        }
                        self.after_change(ctx, step, UpdateSource::Network);
                        return vec![self.change(params, UpdateSource::Network)];
                    }
                }
            }
            ModelMessage::PowerLastGet => {
                ctx.reply(self.element, ack, StatusMessage::PowerLast(self.settings.last));
            }
            ModelMessage::PowerDefaultGet => {
                ctx.reply(self.element, ack, StatusMessage::PowerDefault(self.settings.default));
            }
            ModelMessage::PowerDefaultSet { value, ack: ack_requested } => {
                self.settings.default = *value;
                self.setting_changed(ctx, SettingKind::PowerDefault, StatusMessage::PowerDefault(*value));
                if *ack_requested {
                    ctx.reply(self.element, ack, StatusMessage::PowerDefault(*value));
                }
            }
            ModelMessage::PowerRangeGet => {
                ctx.reply(self.element, ack, self.range_status());
            }
            ModelMessage::PowerRangeSet { range, ack: ack_requested } => {
                self.settings.range = *range;
                self.setting_changed(ctx, SettingKind::PowerRange, self.range_status());
                if *ack_requested {
                    ctx.reply(self.element, ack, self.range_status());
                }
            }
            other => debug!(element = %self.element, ?other, "not a Power Level message"),
        }
        Vec::new()
    }

    fn range_status(&self) -> StatusMessage {
        StatusMessage::PowerRange {
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

    /// Local write (application)
    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: u16, params: TransitionParams, source: UpdateSource) -> Change {
        self.model.tracker_mut().reset();
        let target = self.settings.range.clamp_nonzero(value);
        let step = self.model.start(ctx, target, params, source);
        self.after_change(ctx, step, source);
        self.change(params, source)
    }

    pub fn apply_binding(&mut self, ctx: &mut ModelCtx<'_>, value: BindValue, params: TransitionParams) -> Option<BindValue> {
        let resolved = self.settings.resolve(value);
        debug_assert!(resolved.is_some(), "Power Actual bound to {:?}", value);
        let target = resolved?;
        let step = self.model.start(ctx, target, params, UpdateSource::Binding);
        self.after_change(ctx, step, UpdateSource::Binding);
        Some(BindValue::PowerActual(self.model.target()))
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
                debug!(%err, "discarding Power Level dataset");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{ack, Harness};
    use meshlight_wire::SetParams;

    fn power_set(value: u16, tid: u8) -> ModelMessage {
        ModelMessage::PowerSet(SetParams {
            value,
            tid,
            transition: None,
            ack: true,
        })
    }

    #[test]
    fn test_on_value_prefers_default() {
        let mut settings = ActualSettings::default();
        assert_eq!(settings.on_value(), 0xFFFF);
        settings.last = 0x1234;
        assert_eq!(settings.on_value(), 0x1234);
        settings.default = 0x4000;
        assert_eq!(settings.on_value(), 0x4000);
        settings.range = StateRange { min: 0x5000, max: 0x6000 };
        assert_eq!(settings.on_value(), 0x5000);
    }

    #[test]
    fn test_set_clamps_into_range() {
        let mut h = Harness::new();
        let mut server = PowerLevelServer::new(ElementId(0), 0, 6_000);
        server.handle(
            &mut h.ctx(),
            ack(),
            &ModelMessage::PowerRangeSet {
                range: StateRange { min: 100, max: 200 },
                ack: false,
            },
        );

        server.handle(&mut h.ctx(), ack(), &power_set(500, 1));
        assert_eq!(server.model().present(), 200);
        server.handle(&mut h.ctx(), ack(), &power_set(0, 2));
        assert_eq!(server.model().present(), 0);
        assert_eq!(server.settings().last, 200);
    }

    #[test]
    fn test_binding_onoff_resolves_default_or_last() {
        let mut h = Harness::new();
        let mut server = PowerLevelServer::new(ElementId(0), 0, 6_000);
        server.set(&mut h.ctx(), 0x3000, TransitionParams::IMMEDIATE, UpdateSource::Local);
        server.apply_binding(&mut h.ctx(), BindValue::OnOff(false), TransitionParams::IMMEDIATE);
        assert_eq!(server.model().present(), 0);

        let stored = server.apply_binding(&mut h.ctx(), BindValue::OnOff(true), TransitionParams::IMMEDIATE);
        assert_eq!(stored, Some(BindValue::PowerActual(0x3000)));
    }

    #[test]
    fn test_settings_persist() {
        let mut h = Harness::new();
        let mut server = PowerLevelServer::new(ElementId(1), 2, 6_000);
        server.handle(&mut h.ctx(), ack(), &ModelMessage::PowerDefaultSet { value: 0x2222, ack: true });
        server.set(&mut h.ctx(), 0x1111, TransitionParams::IMMEDIATE, UpdateSource::Local);
        assert!(h.events.contains(&ModelEvent::SettingChanged {
            element: ElementId(1),
            setting: SettingKind::PowerDefault
        }));

        let mut rebooted = PowerLevelServer::new(ElementId(1), 2, 6_000);
        let restored = rebooted.restore(&mut h.ctx());
        assert_eq!(restored, Some(0x1111));
        assert_eq!(rebooted.settings().default, 0x2222);

        rebooted.power_up(&mut h.ctx(), OnPowerUp::Default, restored);
        assert_eq!(rebooted.model().present(), 0x2222);
    }
}
