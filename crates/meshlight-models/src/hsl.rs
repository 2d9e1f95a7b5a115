//! Light HSL server
//!
//! One HSL server spans three elements: HSL Lightness lives on the main
//! element, Hue on the next and Saturation on the one after. Each part has
//! its own transition engine and timer; an HSL Set drives all three with a
//! single transaction.

use bytes::{BufMut, BytesMut};
use meshlight_core::{
    BindValue, BoundState, ElementId, MeshResult, ModelEvent, ModelKind, ModelState, SettingKind,
    TransitionParams, TransitionTime, UpdateSource,
};
use meshlight_state::{AckContext, DatasetGroup, DatasetId, DatasetReader, Transaction};
use meshlight_time::{TimerId, TimerSlot};
use meshlight_wire::{HslValue, ModelMessage, OnPowerUp, RangeStatusCode, SetParams, StateRange, StatusMessage};
use tracing::debug;

use crate::{Change, ModelCtx, PublishState, SetOutcome, StepOutcome, TransitionModel};

/// One of the three HSL components
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HslPart {
    Lightness,
    Hue,
    Saturation,
}

/// Light HSL (+ Setup, Hue, Saturation) server
#[derive(Clone, Debug)]
pub struct HslServer {
    element: ElementId,
    pub publish: PublishState,
    pub hue_publish: PublishState,
    pub saturation_publish: PublishState,
    lightness: TransitionModel<u16>,
    hue: TransitionModel<u16>,
    saturation: TransitionModel<u16>,
    default: HslValue,
    hue_range: StateRange,
    saturation_range: StateRange,
}

impl HslServer {
    pub fn new(element: ElementId, scene_count: usize, window_ms: u64) -> Self {
        let timer = |element, kind| TimerId::new(element, kind, TimerSlot::Transition(0));
        HslServer {
            element,
            publish: PublishState::disabled(),
            hue_publish: PublishState::disabled(),
            saturation_publish: PublishState::disabled(),
            lightness: TransitionModel::new(timer(element, ModelKind::LightHsl), 0, scene_count, window_ms),
            hue: TransitionModel::new(timer(element.next(), ModelKind::LightHslHue), 0, scene_count, window_ms),
            saturation: TransitionModel::new(
                timer(element.next().next(), ModelKind::LightHslSaturation),
                0,
                scene_count,
                window_ms,
            ),
            default: HslValue::default(),
            hue_range: StateRange::FULL,
            saturation_range: StateRange::FULL,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn hue_element(&self) -> ElementId {
        self.element.next()
    }

    pub fn saturation_element(&self) -> ElementId {
        self.element.next().next()
    }

    pub fn part_element(&self, part: HslPart) -> ElementId {
        match part {
            HslPart::Lightness => self.element(),
            HslPart::Hue => self.hue_element(),
            HslPart::Saturation => self.saturation_element(),
        }
    }

    pub fn model(&self, part: HslPart) -> &TransitionModel<u16> {
        match part {
            HslPart::Lightness => &self.lightness,
            HslPart::Hue => &self.hue,
            HslPart::Saturation => &self.saturation,
        }
    }

    fn model_mut(&mut self, part: HslPart) -> &mut TransitionModel<u16> {
        match part {
            HslPart::Lightness => &mut self.lightness,
            HslPart::Hue => &mut self.hue,
            HslPart::Saturation => &mut self.saturation,
        }
    }

    /// Part whose transition timer is `id`
    pub fn part_for_timer(&self, id: TimerId) -> Option<HslPart> {
        [HslPart::Lightness, HslPart::Hue, HslPart::Saturation]
            .into_iter()
            .find(|part| self.model(*part).timer_id() == id)
    }

    pub fn present(&self) -> HslValue {
        HslValue {
            lightness: self.lightness.present(),
            hue: self.hue.present(),
            saturation: self.saturation.present(),
        }
    }

    pub fn target(&self) -> HslValue {
        HslValue {
            lightness: self.lightness.target(),
            hue: self.hue.target(),
            saturation: self.saturation.target(),
        }
    }

    pub fn default_value(&self) -> HslValue {
        self.default
    }

    pub fn ranges(&self) -> (StateRange, StateRange) {
        (self.hue_range, self.saturation_range)
    }

    /// Longest remaining time of the three parts
    pub fn remaining(&self) -> Option<TransitionTime> {
        let parts = [&self.lightness, &self.hue, &self.saturation];
        if parts.iter().any(|m| m.is_move()) {
            return Some(TransitionTime::UNKNOWN);
        }
        parts
            .iter()
            .filter(|m| m.is_active())
            .map(|m| m.remaining_ms())
            .max()
            .map(TransitionTime::from_ms)
    }

    fn remaining_ms(&self) -> u32 {
        self.lightness
            .remaining_ms()
            .max(self.hue.remaining_ms())
            .max(self.saturation.remaining_ms())
    }

    pub fn status(&self) -> StatusMessage {
        StatusMessage::Hsl {
            value: self.present(),
            remaining: self.remaining(),
        }
    }

    pub fn target_status(&self) -> StatusMessage {
        StatusMessage::HslTarget {
            value: self.target(),
            remaining: self.remaining(),
        }
    }

    pub fn part_status(&self, part: HslPart) -> StatusMessage {
        match part {
            HslPart::Lightness => self.status(),
            HslPart::Hue => StatusMessage::HslHue(self.hue.transitional()),
            HslPart::Saturation => StatusMessage::HslSaturation(self.saturation.transitional()),
        }
    }

    pub fn part_state(&self, part: HslPart) -> ModelState {
        match part {
            HslPart::Lightness => ModelState::Hsl {
                lightness: self.lightness.present(),
                hue: self.hue.present(),
                saturation: self.saturation.present(),
                remaining_ms: self.remaining_ms(),
            },
            HslPart::Hue => ModelState::Hue {
                present: self.hue.present(),
                target: self.hue.target(),
                remaining_ms: self.hue.remaining_ms(),
            },
            HslPart::Saturation => ModelState::Saturation {
                present: self.saturation.present(),
                target: self.saturation.target(),
                remaining_ms: self.saturation.remaining_ms(),
            },
        }
    }

    fn range_status(&self) -> StatusMessage {
        StatusMessage::HslRange {
            status: RangeStatusCode::Success,
            hue: self.hue_range,
            saturation: self.saturation_range,
        }
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::Hsl, self.element)
    }

    fn change(&self, part: HslPart, params: TransitionParams, source: UpdateSource) -> Change {
        let target = self.model(part).target();
        let (state, value) = match part {
            HslPart::Lightness => (BoundState::HslLightness, BindValue::HslLightness(target)),
            HslPart::Hue => (BoundState::HslHue, BindValue::Hue(target)),
            HslPart::Saturation => (BoundState::HslSaturation, BindValue::Saturation(target)),
        };
        Change::new(self.part_element(part), state, value, params, source)
    }

    fn clamp(&self, part: HslPart, value: u16) -> u16 {
        match part {
            HslPart::Lightness => value,
            HslPart::Hue => self.hue_range.clamp(value),
            HslPart::Saturation => self.saturation_range.clamp(value),
        }
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Vec<Change> {
        match msg {
            ModelMessage::HslGet => {
                ctx.reply(self.element, ack, self.status());
                ctx.emit(ModelEvent::CurrentState {
                    element: self.element,
                    state: self.part_state(HslPart::Lightness),
                });
            }
            ModelMessage::HslTargetGet => ctx.reply(self.element, ack, self.target_status()),
            ModelMessage::HslSet(set) => return self.handle_hsl_set(ctx, ack, set),
            ModelMessage::HslHueGet => self.reply_part(ctx, ack, HslPart::Hue),
            ModelMessage::HslSaturationGet => self.reply_part(ctx, ack, HslPart::Saturation),
            ModelMessage::HslHueSet(set) => return self.handle_part_set(ctx, ack, HslPart::Hue, set),
            ModelMessage::HslSaturationSet(set) => {
                return self.handle_part_set(ctx, ack, HslPart::Saturation, set)
            }
            ModelMessage::HslDefaultGet => ctx.reply(self.element, ack, StatusMessage::HslDefault(self.default)),
            ModelMessage::HslDefaultSet { value, ack: ack_requested } => {
                self.default = *value;
                self.setting_changed(ctx, SettingKind::HslDefault, StatusMessage::HslDefault(*value));
                if *ack_requested {
                    ctx.reply(self.element, ack, StatusMessage::HslDefault(*value));
                }
            }
            ModelMessage::HslRangeGet => ctx.reply(self.element, ack, self.range_status()),
            ModelMessage::HslRangeSet {
                hue,
                saturation,
                ack: ack_requested,
            } => {
                self.hue_range = *hue;
                self.saturation_range = *saturation;
                self.setting_changed(ctx, SettingKind::HslRange, self.range_status());
                if *ack_requested {
                    ctx.reply(self.element, ack, self.range_status());
                }
            }
            other => debug!(element = %self.element, ?other, "not a Light HSL message"),
        }
        Vec::new()
    }

    fn reply_part(&self, ctx: &mut ModelCtx<'_>, ack: AckContext, part: HslPart) {
        let element = self.part_element(part);
        ctx.reply(element, ack, self.part_status(part));
        ctx.emit(ModelEvent::CurrentState {
            element,
            state: self.part_state(part),
        });
    }

    fn handle_hsl_set(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, set: &SetParams<HslValue>) -> Vec<Change> {
        let owed = self.lightness.owed_ack();
        if self.lightness.transaction(set.tid, ack, ctx.now_ms) == Transaction::Duplicate {
            debug!(element = %self.element, tid = set.tid, "duplicate HSL set");
            if set.ack {
                ctx.reply(self.element, ack, self.status());
            }
            return Vec::new();
        }

        let params = ctx.resolve(set.transition);
        let targets = [
            (HslPart::Lightness, set.value.lightness),
            (HslPart::Hue, set.value.hue),
            (HslPart::Saturation, set.value.saturation),
        ];
        let mut changes = Vec::with_capacity(targets.len());
        let mut first = StepOutcome::default();
        for (part, value) in targets {
            let target = self.clamp(part, value);
            let step = self.model_mut(part).start(ctx, target, params, UpdateSource::Network);
            if part == HslPart::Lightness {
                first = step;
            }
            self.after_change(ctx, part, step, UpdateSource::Network);
            changes.push(self.change(part, params, UpdateSource::Network));
        }
        self.persist_if_changed(ctx);

        if let SetOutcome::Applied { reply_now, superseded, .. } = self.lightness.finish_set(set.ack, first, owed) {
            if let Some(owed) = superseded {
                ctx.reply(self.element, owed, self.status());
            }
            if reply_now {
                ctx.reply(self.element, ack, self.status());
            }
        }
        changes
    }

    fn handle_part_set(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        ack: AckContext,
        part: HslPart,
        set: &SetParams<u16>,
    ) -> Vec<Change> {
        let params = ctx.resolve(set.transition);
        let target = self.clamp(part, set.value);
        let element = self.part_element(part);
        let outcome = self
            .model_mut(part)
            .handle_set(ctx, ack, set.tid, set.ack, target, params, UpdateSource::Network);
        match outcome {
            SetOutcome::Duplicate => {
                if set.ack {
                    ctx.reply(element, ack, self.part_status(part));
                }
                Vec::new()
            }
            SetOutcome::Applied { step, reply_now, superseded } => {
                if let Some(owed) = superseded {
                    ctx.reply(element, owed, self.part_status(part));
                }
                if reply_now {
                    ctx.reply(element, ack, self.part_status(part));
                }
                self.after_change(ctx, part, step, UpdateSource::Network);
                self.persist_if_changed(ctx);
                vec![self.change(part, params, UpdateSource::Network)]
            }
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

    /// Local write of all three parts
    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: HslValue, params: TransitionParams, source: UpdateSource) -> Vec<Change> {
        self.lightness.tracker_mut().reset();
        let mut changes = Vec::with_capacity(3);
        for (part, v) in [
            (HslPart::Lightness, value.lightness),
            (HslPart::Hue, value.hue),
            (HslPart::Saturation, value.saturation),
        ] {
            let target = self.clamp(part, v);
            let step = self.model_mut(part).start(ctx, target, params, source);
            self.after_change(ctx, part, step, source);
            changes.push(self.change(part, params, source));
        }
        self.persist_if_changed(ctx);
        changes
    }

    pub fn apply_binding(&mut self, ctx: &mut ModelCtx<'_>, value: BindValue, params: TransitionParams) -> Option<BindValue> {
        let bound = match value {
            BindValue::HslLightness(v) => Some((HslPart::Lightness, v)),
            BindValue::Hue(v) => Some((HslPart::Hue, v)),
            BindValue::Saturation(v) => Some((HslPart::Saturation, v)),
            _ => None,
        };
        debug_assert!(bound.is_some(), "HSL bound to {:?}", value);
        let (part, raw) = bound?;
        let target = self.clamp(part, raw);
        let step = self.model_mut(part).start(ctx, target, params, UpdateSource::Binding);
        self.after_change(ctx, part, step, UpdateSource::Binding);
        self.persist_if_changed(ctx);
        Some(self.change(part, params, UpdateSource::Binding).value)
    }

    /// One of the three transition timers fired
    pub fn on_timer(&mut self, ctx: &mut ModelCtx<'_>, id: TimerId) -> Option<Change> {
        let Some(part) = self.part_for_timer(id) else {
            debug!(?id, "timer not owned by HSL server");
            return None;
        };
        let outcome = self.model_mut(part).on_timer(ctx);
        if outcome.finished {
            if let Some(ack) = self.model_mut(part).take_deferred_ack() {
                ctx.reply(self.part_element(part), ack, self.part_status(part));
            }
        }
        let source = self.model(part).source();
        self.announce(ctx, part, outcome, source, true);
        if outcome.finished {
            self.persist_if_changed(ctx);
        }
        None
    }

    pub fn store_scene(&mut self, ctx: &mut ModelCtx<'_>, slot: usize) {
        self.lightness.store_scene(slot);
        self.hue.store_scene(slot);
        self.saturation.store_scene(slot);
        self.persist(ctx);
    }

    pub fn recall_scene(&mut self, ctx: &mut ModelCtx<'_>, slot: usize, params: TransitionParams) {
        for part in [HslPart::Lightness, HslPart::Hue, HslPart::Saturation] {
            if let Some(value) = self.model(part).scene(slot) {
                let step = self.model_mut(part).start(ctx, value, params, UpdateSource::SceneRecall);
                self.after_change(ctx, part, step, UpdateSource::SceneRecall);
            }
        }
        self.persist_if_changed(ctx);
    }

    /// Restore settings and scenes; returns the last persisted targets
    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) -> Option<HslValue> {
        let id = self.dataset();
        let data = ctx.load(id)?;
        let mut reader = DatasetReader::new(id, &data);
        match self.decode(&mut reader) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%err, "discarding HSL dataset");
                None
            }
        }
    }

    fn decode(&mut self, reader: &mut DatasetReader<'_>) -> MeshResult<HslValue> {
        let default = HslValue {
            lightness: reader.u16()?,
            hue: reader.u16()?,
            saturation: reader.u16()?,
        };
        let hue_range = StateRange {
            min: reader.u16()?,
            max: reader.u16()?,
        };
        let saturation_range = StateRange {
            min: reader.u16()?,
            max: reader.u16()?,
        };
        let restored = HslValue {
            lightness: self.lightness.decode_values(reader)?,
            hue: self.hue.decode_values(reader)?,
            saturation: self.saturation.decode_values(reader)?,
        };
        self.default = default;
        self.hue_range = hue_range;
        self.saturation_range = saturation_range;
        Ok(restored)
    }

    /// Boot values for Hue and Saturation. HSL Lightness follows Lightness
    /// Actual through its binding.
    pub fn power_up(&mut self, ctx: &mut ModelCtx<'_>, mode: OnPowerUp, restored: Option<HslValue>) -> Vec<Change> {
        let value = match (mode, restored) {
            (OnPowerUp::Restore, Some(restored)) => restored,
            _ => self.default,
        };
        let mut changes = Vec::with_capacity(2);
        for (part, v) in [(HslPart::Hue, value.hue), (HslPart::Saturation, value.saturation)] {
            let target = self.clamp(part, v);
            self.model_mut(part).jump(ctx, target, UpdateSource::PowerUp);
            ctx.emit(ModelEvent::StateUpdate {
                element: self.part_element(part),
                state: self.part_state(part),
                source: UpdateSource::PowerUp,
            });
            changes.push(self.change(part, TransitionParams::IMMEDIATE, UpdateSource::PowerUp));
        }
        changes
    }

    fn announce(&mut self, ctx: &mut ModelCtx<'_>, part: HslPart, step: StepOutcome, source: UpdateSource, from_timer: bool) {
        let element = self.part_element(part);
        let (status, state) = (self.part_status(part), self.part_state(part));
        let publish = match part {
            HslPart::Lightness => &mut self.publish,
            HslPart::Hue => &mut self.hue_publish,
            HslPart::Saturation => &mut self.saturation_publish,
        };
        ctx.announce(element, publish, status, state, source, step, from_timer);
    }

    fn after_change(&mut self, ctx: &mut ModelCtx<'_>, part: HslPart, step: StepOutcome, source: UpdateSource) {
        self.announce(ctx, part, step, source, false);
    }

    fn persist_if_changed(&mut self, ctx: &mut ModelCtx<'_>) {
        if self.lightness.needs_save() || self.hue.needs_save() || self.saturation.needs_save() {
            self.persist(ctx);
        }
    }

    fn persist(&mut self, ctx: &mut ModelCtx<'_>) {
        let mut buf = BytesMut::new();
        for v in [self.default.lightness, self.default.hue, self.default.saturation] {
            buf.put_u16_le(v);
        }
        for range in [self.hue_range, self.saturation_range] {
            buf.put_u16_le(range.min);
            buf.put_u16_le(range.max);
        }
        self.lightness.encode_values(&mut buf);
        self.hue.encode_values(&mut buf);
        self.saturation.encode_values(&mut buf);
        ctx.save(self.dataset(), &buf);
    }
}
