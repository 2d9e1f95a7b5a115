//! Generic Default Transition Time server

use meshlight_core::{Delay, ElementId, ModelEvent, TransitionParams, TransitionTime};
use meshlight_state::{AckContext, DatasetGroup, DatasetId};
use meshlight_wire::{ModelMessage, StatusMessage};
use tracing::debug;

use crate::{ModelCtx, PublishState};

/// Generic Default Transition Time server
#[derive(Clone, Debug)]
pub struct DefaultTransitionServer {
    element: ElementId,
    pub publish: PublishState,
    value: TransitionTime,
}

impl DefaultTransitionServer {
    pub fn new(element: ElementId) -> Self {
        DefaultTransitionServer {
            element,
            publish: PublishState::disabled(),
            value: TransitionTime::IMMEDIATE,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn value(&self) -> TransitionTime {
        self.value
    }

    /// Transition parameters applied when a Set carries none
    pub fn params(&self) -> TransitionParams {
        TransitionParams::new(self.value, Delay::NONE)
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::DefaultTransition, self.element)
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) {
        match msg {
            ModelMessage::DefaultTransitionGet => {
                ctx.reply(self.element, ack, StatusMessage::DefaultTransition(self.value));
            }
            ModelMessage::DefaultTransitionSet { value, ack: ack_requested } => {
                self.set(ctx, *value);
                if *ack_requested {
                    ctx.reply(self.element, ack, StatusMessage::DefaultTransition(self.value));
                }
            }
            other => debug!(element = %self.element, ?other, "not a Default Transition Time message"),
        }
    }

    /// Store a new default; unknown step counts are ignored
    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: TransitionTime) {
        if value.is_unknown() {
            debug!(element = %self.element, "default transition 0x3f ignored");
            return;
        }
        let changed = value != self.value;
        self.value = value;
        ctx.save(self.dataset(), &[value.0]);
        ctx.publish(self.element, &mut self.publish, StatusMessage::DefaultTransition(value), false);
        if changed {
            ctx.emit(ModelEvent::DefaultTransitionChanged {
                element: self.element,
                raw: value.0,
            });
        }
    }

    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) {
        if let Some(&[raw]) = ctx.load(self.dataset()).as_deref() {
            let value = TransitionTime(raw);
            if !value.is_unknown() {
                self.value = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{ack, Harness};

    #[test]
    fn test_set_and_persist() {
        let mut h = Harness::new();
        let mut server = DefaultTransitionServer::new(ElementId(0));
        let value = TransitionTime::new(5, 1);

        server.handle(&mut h.ctx(), ack(), &ModelMessage::DefaultTransitionSet { value, ack: true });
        assert_eq!(server.params().transition_ms(), 5_000);
        assert_eq!(&h.outbox[0].params[..], &[value.0]);
        assert_eq!(
            h.events,
            vec![ModelEvent::DefaultTransitionChanged {
                element: ElementId(0),
                raw: value.0
            }]
        );

        let mut rebooted = DefaultTransitionServer::new(ElementId(0));
        rebooted.restore(&mut h.ctx());
        assert_eq!(rebooted.value(), value);
    }

    #[test]
    fn test_unknown_ignored() {
        let mut h = Harness::new();
        let mut server = DefaultTransitionServer::new(ElementId(0));
        server.set(&mut h.ctx(), TransitionTime::UNKNOWN);
        assert_eq!(server.value(), TransitionTime::IMMEDIATE);
        assert!(h.events.is_empty());
    }
}
