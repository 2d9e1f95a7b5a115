//! Scene server
//!
//! The server owns the scene register of its element. Storing and recalling
//! the snapshots themselves touches every scene-capable model on the
//! element, so [`SceneServer::handle`] returns a [`SceneRequest`] that the
//! node fans out.

use meshlight_core::{ElementId, ModelEvent, TransitionParams, TransitionTime};
use meshlight_state::{
    AckContext, DatasetGroup, DatasetId, SceneError, SceneRegister, Transaction, TransactionTracker,
};
use meshlight_wire::{ModelMessage, SceneStatusCode, SetParams, StatusMessage};
use tracing::debug;

use crate::{ModelCtx, PublishState};

/// Snapshot work the node performs on behalf of the scene server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneRequest {
    /// Copy present values into snapshot slot `slot`
    Store { slot: usize },
    /// Drive every model to snapshot slot `slot`
    Recall { slot: usize, params: TransitionParams },
}

/// Scene (+ Setup) server
#[derive(Clone, Debug)]
pub struct SceneServer {
    element: ElementId,
    pub publish: PublishState,
    register: SceneRegister,
    tracker: TransactionTracker<u16>,
    /// When the running recall transition ends
    recall_deadline_ms: Option<u64>,
}

impl SceneServer {
    pub fn new(element: ElementId, capacity: usize, window_ms: u64) -> Self {
        SceneServer {
            element,
            publish: PublishState::disabled(),
            register: SceneRegister::new(capacity),
            tracker: TransactionTracker::new(window_ms),
            recall_deadline_ms: None,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn register(&self) -> &SceneRegister {
        &self.register
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::SceneRegister, self.element)
    }

    /// Settle a recall whose transition time has passed
    pub fn refresh(&mut self, now_ms: u64) {
        if let Some(deadline) = self.recall_deadline_ms {
            if now_ms >= deadline {
                self.register.finish_recall();
                self.recall_deadline_ms = None;
            }
        }
    }

    /// Every model of the recalled scene reached its target
    pub fn finish_recall(&mut self, ctx: &mut ModelCtx<'_>) {
        if self.register.target() == 0 {
            return;
        }
        self.register.finish_recall();
        self.recall_deadline_ms = None;
        debug!(element = %self.element, current = self.register.current(), "scene recall finished");
        let status = self.status(ctx.now_ms, SceneStatusCode::Success);
        ctx.publish(self.element, &mut self.publish, status, false);
    }

    /// A scene-participating state changed outside a recall
    pub fn invalidate(&mut self) {
        if self.register.current() != 0 || self.register.target() != 0 {
            debug!(element = %self.element, "current scene invalidated");
        }
        self.register.invalidate();
        self.recall_deadline_ms = None;
    }

    pub fn status(&mut self, now_ms: u64, code: SceneStatusCode) -> StatusMessage {
        self.refresh(now_ms);
        let target = match (self.register.target(), self.recall_deadline_ms) {
            (0, _) | (_, None) => None,
            (scene, Some(deadline)) => Some((
                scene,
                TransitionTime::from_ms(deadline.saturating_sub(now_ms).min(u32::MAX as u64) as u32),
            )),
        };
        StatusMessage::Scene {
            status: code,
            current: self.register.current(),
            target,
        }
    }

    pub fn register_status(&mut self, now_ms: u64, code: SceneStatusCode) -> StatusMessage {
        self.refresh(now_ms);
        StatusMessage::SceneRegister {
            status: code,
            current: self.register.current(),
            scenes: self.register.scenes(),
        }
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Option<SceneRequest> {
        match msg {
            ModelMessage::SceneGet => {
                let status = self.status(ctx.now_ms, SceneStatusCode::Success);
                ctx.reply(self.element, ack, status);
                None
            }
            ModelMessage::SceneRegisterGet => {
                let status = self.register_status(ctx.now_ms, SceneStatusCode::Success);
                ctx.reply(self.element, ack, status);
                None
            }
            ModelMessage::SceneStore { scene, ack: ack_requested } => {
                let (code, request) = match self.store(ctx, *scene) {
                    Ok(slot) => (SceneStatusCode::Success, Some(SceneRequest::Store { slot })),
                    Err(err) => (status_code(err), None),
                };
                self.respond_register(ctx, ack, *ack_requested, code, request.is_some());
                request
            }
            ModelMessage::SceneDelete { scene, ack: ack_requested } => {
                let deleted = self.delete(ctx, *scene);
                self.respond_register(ctx, ack, *ack_requested, SceneStatusCode::Success, deleted);
                None
            }
            ModelMessage::SceneRecall(set) => self.handle_recall(ctx, ack, set),
            other => {
                debug!(element = %self.element, ?other, "not a Scene message");
                None
            }
        }
    }

    fn respond_register(
        &mut self,
        ctx: &mut ModelCtx<'_>,
        ack: AckContext,
        ack_requested: bool,
        code: SceneStatusCode,
        changed: bool,
    ) {
        let status = self.register_status(ctx.now_ms, code);
        if ack_requested {
            ctx.reply(self.element, ack, status.clone());
        }
        if changed {
            ctx.publish(self.element, &mut self.publish, status, false);
        }
    }

    fn handle_recall(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, set: &SetParams<u16>) -> Option<SceneRequest> {
        let current = self.register.current();
        let transaction = self
            .tracker
            .begin(set.tid, ack.src, ack.app_key_index, ack.for_unicast, current, ctx.now_ms);
        if transaction == Transaction::Duplicate {
            debug!(element = %self.element, tid = set.tid, "duplicate scene recall");
            if set.ack {
                let status = self.status(ctx.now_ms, SceneStatusCode::Success);
                ctx.reply(self.element, ack, status);
            }
            return None;
        }

        let params = ctx.resolve(set.transition);
        let (code, request) = match self.recall(ctx, set.value, params) {
            Ok(slot) => (SceneStatusCode::Success, Some(SceneRequest::Recall { slot, params })),
            Err(err) => (status_code(err), None),
        };
        let status = self.status(ctx.now_ms, code);
        if set.ack {
            ctx.reply(self.element, ack, status.clone());
        }
        if request.is_some() {
            ctx.publish(self.element, &mut self.publish, status, false);
        }
        request
    }

    /// Reserve a register slot for `scene`
    pub fn store(&mut self, ctx: &mut ModelCtx<'_>, scene: u16) -> Result<usize, SceneError> {
        let slot = self.register.store(scene)?;
        self.recall_deadline_ms = None;
        self.persist(ctx);
        ctx.emit(ModelEvent::SceneStored {
            element: self.element,
            scene,
        });
        Ok(slot)
    }

    /// Begin a recall; the caller drives the snapshot slot
    pub fn recall(&mut self, ctx: &mut ModelCtx<'_>, scene: u16, params: TransitionParams) -> Result<usize, SceneError> {
        let total_ms = params.delay_ms() as u64 + params.transition_ms() as u64;
        let slot = self.register.recall(scene, total_ms > 0)?;
        self.recall_deadline_ms = (total_ms > 0).then(|| ctx.now_ms + total_ms);
        ctx.emit(ModelEvent::SceneRecalled {
            element: self.element,
            scene,
            transition_ms: params.transition_ms(),
        });
        Ok(slot)
    }

    /// Remove `scene`; absent scenes are not an error
    pub fn delete(&mut self, ctx: &mut ModelCtx<'_>, scene: u16) -> bool {
        if self.register.delete(scene).is_none() {
            return false;
        }
        if self.register.target() == 0 {
            self.recall_deadline_ms = None;
        }
        self.persist(ctx);
        ctx.emit(ModelEvent::SceneDeleted {
            element: self.element,
            scene,
        });
        true
    }

    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) {
        let Some(data) = ctx.load(self.dataset()) else {
            return;
        };
        if let Err(err) = self.register.load(&data) {
            debug!(%err, "discarding scene register dataset");
        }
    }

    fn persist(&self, ctx: &mut ModelCtx<'_>) {
        ctx.save(self.dataset(), &self.register.to_bytes());
    }
}

fn status_code(err: SceneError) -> SceneStatusCode {
    match err {
        SceneError::RegisterFull => SceneStatusCode::RegisterFull,
        SceneError::NotFound => SceneStatusCode::NotFound,
    }
}
