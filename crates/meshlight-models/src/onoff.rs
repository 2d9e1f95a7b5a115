//! Generic OnOff server

use bytes::BytesMut;
use meshlight_core::{
    BindValue, BoundState, ElementId, ModelEvent, ModelKind, ModelState, TransitionParams,
    UpdateSource,
};
use meshlight_state::{AckContext, DatasetGroup, DatasetId, DatasetReader};
use meshlight_time::{TimerId, TimerSlot};
use meshlight_wire::{ModelMessage, StatusMessage};
use tracing::debug;

use crate::{Change, ModelCtx, PublishState, SetOutcome, StepOutcome, TransitionModel};

/// Generic OnOff server
#[derive(Clone, Debug)]
pub struct OnOffServer {
    element: ElementId,
    pub publish: PublishState,
    model: TransitionModel<bool>,
}

impl OnOffServer {
    pub fn new(element: ElementId, scene_count: usize, window_ms: u64) -> Self {
        let timer = TimerId::new(element, ModelKind::GenOnOff, TimerSlot::Transition(0));
        OnOffServer {
            element,
            publish: PublishState::disabled(),
            model: TransitionModel::new(timer, false, scene_count, window_ms),
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn model(&self) -> &TransitionModel<bool> {
        &self.model
    }

    pub fn status(&self) -> StatusMessage {
        StatusMessage::OnOff(self.model.transitional())
    }

    pub fn state(&self) -> ModelState {
        ModelState::OnOff {
            present: self.model.present(),
            target: self.model.target(),
            remaining_ms: self.model.remaining_ms(),
        }
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::OnOffState, self.element)
    }

    fn change(&self, params: TransitionParams, source: UpdateSource) -> Change {
        Change::new(
            self.element,
            BoundState::OnOff,
            BindValue::OnOff(self.model.target()),
            params,
            source,
        )
    }

    /// Serve a decoded message addressed to this model
    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Vec<Change> {
        match msg {
            ModelMessage::OnOffGet => {
                ctx.reply(self.element, ack, self.status());
                ctx.emit(ModelEvent::CurrentState {
                    element: self.element,
                    state: self.state(),
                });
                Vec::new()
            }
            ModelMessage::OnOffSet(set) => {
                let params = ctx.resolve(set.transition);
                match self.model.handle_set(ctx, ack, set.tid, set.ack, set.value, params, UpdateSource::Network) {
                    SetOutcome::Duplicate => {
                        if set.ack {
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
                        vec![self.change(params, UpdateSource::Network)]
                    }
                }
            }
            other => {
                debug!(element = %self.element, ?other, "not an OnOff message");
                Vec::new()
            }
        }
    }

    /// Local write (application or scheduler)
    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: bool, params: TransitionParams, source: UpdateSource) -> Change {
        self.model.tracker_mut().reset();
        let step = self.model.start(ctx, value, params, source);
        self.after_change(ctx, step, source);
        self.change(params, source)
    }

    /// Bound state pushed a value here
    pub fn apply_binding(&mut self, ctx: &mut ModelCtx<'_>, value: BindValue, params: TransitionParams) -> Option<BindValue> {
        debug_assert!(matches!(value, BindValue::OnOff(_)), "OnOff bound to {:?}", value);
        let BindValue::OnOff(on) = value else {
            return None;
        };
        let step = self.model.start(ctx, on, params, UpdateSource::Binding);
        self.after_change(ctx, step, UpdateSource::Binding);
        Some(BindValue::OnOff(self.model.target()))
    }

    /// Transition timer fired; bounded transitions never cascade per tick
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

    /// Restore scene slots; returns the last persisted value
    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) -> Option<bool> {
        let id = self.dataset();
        let data = ctx.load(id)?;
        match self.model.decode_values(&mut DatasetReader::new(id, &data)) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%err, "discarding OnOff dataset");
                None
            }
        }
    }

    /// Power-up write, no publication
    pub fn power_up(&mut self, ctx: &mut ModelCtx<'_>, value: bool) -> Change {
        self.model.jump(ctx, value, UpdateSource::PowerUp);
        ctx.emit(ModelEvent::StateUpdate {
            element: self.element,
            state: self.state(),
            source: UpdateSource::PowerUp,
        });
        self.change(TransitionParams::IMMEDIATE, UpdateSource::PowerUp)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{ack, params, Harness};
    use meshlight_core::MeshAddress;
    use meshlight_wire::{SetParams, Transitional, GEN_ONOFF_STATUS};

    fn set(value: bool, tid: u8, transition: Option<TransitionParams>, ack: bool) -> ModelMessage {
        ModelMessage::OnOffSet(SetParams {
            value,
            tid,
            transition,
            ack,
        })
    }

    #[test]
    fn test_get_replies_and_emits() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);
        server.handle(&mut h.ctx(), ack(), &ModelMessage::OnOffGet);

        assert_eq!(h.outbox.len(), 1);
        assert_eq!(h.outbox[0].opcode, GEN_ONOFF_STATUS);
        assert_eq!(&h.outbox[0].params[..], &[0x00]);
        assert!(matches!(h.events[0], ModelEvent::CurrentState { .. }));
    }

    #[test]
    fn test_set_immediate() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);
        let changes = server.handle(&mut h.ctx(), ack(), &set(true, 1, None, true));

        assert!(server.model().present());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, BindValue::OnOff(true));
        assert_eq!(&h.outbox[0].params[..], &[0x01]);
        assert!(h.events.iter().any(|e| e.is_state_update()));
    }

    #[test]
    fn test_duplicate_ack_only() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);
        server.handle(&mut h.ctx(), ack(), &set(true, 9, None, true));
        let events = h.events.len();

        let changes = server.handle(&mut h.ctx(), ack(), &set(false, 9, None, true));
        assert!(changes.is_empty());
        assert!(server.model().present());
        assert_eq!(h.events.len(), events);
        assert_eq!(h.outbox.len(), 2);

        // Unacknowledged duplicate: silence
        server.handle(&mut h.ctx(), ack(), &set(false, 9, None, false));
        assert_eq!(h.outbox.len(), 2);
    }

    #[test]
    fn test_turning_off_stays_on_until_end() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);
        server.set(&mut h.ctx(), true, TransitionParams::IMMEDIATE, UpdateSource::Local);

        server.handle(&mut h.ctx(), ack(), &set(false, 1, Some(params(3, 0)), false));
        assert_eq!(
            server.model().transitional(),
            Transitional::moving(true, false, meshlight_core::TransitionTime::new(3, 0))
        );

        let mut seen = Vec::new();
        while h.timers.pop_due(10_000).is_some() {
            server.on_timer(&mut h.ctx());
            seen.push(server.model().present());
        }
        assert_eq!(seen, vec![true, true, false]);
    }

    #[test]
    fn test_acked_delayed_set_replies_immediately() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);
        server.publish = PublishState::new(MeshAddress(0xC000), Default::default(), 5, 0);

        // 1 s transition after a 100 ms delay
        server.handle(&mut h.ctx(), ack(), &set(true, 3, Some(params(10, 20)), true));
        let replies = |h: &Harness| h.outbox.iter().filter(|m| !m.is_publication()).count();
        assert_eq!(replies(&h), 1);
        // Still off, heading on: present, target, remaining time
        assert_eq!(h.outbox.last().map(|m| m.params[..].to_vec()), Some(vec![0x00, 0x01, 0x0A]));

        while h.timers.pop_due(10_000).is_some() {
            server.on_timer(&mut h.ctx());
        }
        assert!(server.model().present());
        assert_eq!(replies(&h), 1);
    }

    #[test]
    fn test_two_acked_delayed_sets_each_get_a_reply() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);

        server.handle(&mut h.ctx(), ack(), &set(true, 3, Some(params(10, 20)), true));
        assert!(h.timers.pop_due(50).is_none());
        server.handle(&mut h.ctx(), ack(), &set(false, 4, Some(params(10, 20)), true));
        while h.timers.pop_due(3_000).is_some() {
            server.on_timer(&mut h.ctx());
        }
        assert_eq!(h.outbox.len(), 2);
        assert!(!server.model().present());
    }

    #[test]
    fn test_unacked_delayed_set_reports_on_completion() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);

        server.handle(&mut h.ctx(), ack(), &set(true, 1, Some(params(2, 20)), false));
        assert!(h.outbox.is_empty());

        // Delay expiry, then two ticks
        h.timers.pop_due(10_000).unwrap();
        server.on_timer(&mut h.ctx());
        h.timers.pop_due(10_000).unwrap();
        server.on_timer(&mut h.ctx());
        assert!(h.outbox.is_empty());

        h.timers.pop_due(10_000).unwrap();
        server.on_timer(&mut h.ctx());
        assert_eq!(h.outbox.len(), 1);
        assert_eq!(&h.outbox[0].params[..], &[0x01]);
    }

    #[test]
    fn test_superseding_set_flushes_owed_status() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(0), 0, 6_000);

        server.handle(&mut h.ctx(), ack(), &set(true, 1, Some(params(2, 20)), false));
        server.handle(&mut h.ctx(), ack(), &set(false, 2, None, false));
        assert_eq!(h.outbox.len(), 1);

        while h.timers.pop_due(10_000).is_some() {
            server.on_timer(&mut h.ctx());
        }
        assert_eq!(h.outbox.len(), 1);
    }

    #[test]
    fn test_restore_after_reboot() {
        let mut h = Harness::new();
        let mut server = OnOffServer::new(ElementId(2), 1, 6_000);
        server.set(&mut h.ctx(), true, TransitionParams::IMMEDIATE, UpdateSource::Local);
        server.store_scene(&mut h.ctx(), 0);

        let mut rebooted = OnOffServer::new(ElementId(2), 1, 6_000);
        assert_eq!(rebooted.restore(&mut h.ctx()), Some(true));
        assert_eq!(rebooted.model().scene(0), Some(true));
    }
}
