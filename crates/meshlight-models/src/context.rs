//! Model context: publication, events, timers and storage
//!
//! Handlers receive everything they may touch through [`ModelCtx`]; there
//! are no global registries. The node builds a fresh context per call.

use meshlight_core::{
    AppKeyIndex, ElementId, MeshAddress, ModelEvent, ModelState, TransitionParams, UpdateSource,
};
use meshlight_state::{AckContext, DatasetId, Nvm};
use meshlight_time::TimerService;
use meshlight_wire::{Destination, OutboundMessage, StatusMessage, TTL_DEFAULT};
use tracing::trace;

use crate::StepOutcome;

/// Publication settings and rate limiter of one model instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishState {
    pub address: MeshAddress,
    pub app_key_index: AppKeyIndex,
    pub ttl: u8,
    /// Minimum spacing of periodic (per-tick) publications; 0 = no limit
    pub min_interval_ms: u64,
    last_ms: Option<u64>,
}

impl PublishState {
    pub fn new(address: MeshAddress, app_key_index: AppKeyIndex, ttl: u8, min_interval_ms: u64) -> Self {
        PublishState {
            address,
            app_key_index,
            ttl,
            min_interval_ms,
            last_ms: None,
        }
    }

    /// No publish address
    pub fn disabled() -> Self {
        PublishState::new(MeshAddress::UNASSIGNED, AppKeyIndex::default(), TTL_DEFAULT, 0)
    }

    pub fn is_enabled(&self) -> bool {
        !self.address.is_unassigned()
    }

    /// Decide whether an offered publication goes out now
    pub fn offer(&mut self, now_ms: u64, periodic: bool) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if periodic && self.min_interval_ms > 0 {
            if let Some(last) = self.last_ms {
                if now_ms.saturating_sub(last) < self.min_interval_ms {
                    return false;
                }
            }
        }
        self.last_ms = Some(now_ms);
        true
    }
}

impl Default for PublishState {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Everything a model handler may touch
pub struct ModelCtx<'a> {
    pub timers: &'a mut dyn TimerService,
    pub nvm: &'a mut dyn Nvm,
    pub outbox: &'a mut Vec<OutboundMessage>,
    pub events: &'a mut Vec<ModelEvent>,
    /// Node monotonic time
    pub now_ms: u64,
    /// Default Transition Time of the element being served
    pub default_transition: TransitionParams,
}

impl<'a> ModelCtx<'a> {
    /// Transition parameters of a Set, falling back to the element default
    pub fn resolve(&self, transition: Option<TransitionParams>) -> TransitionParams {
        transition.unwrap_or(self.default_transition)
    }

    /// Send a status back to the requester
    pub fn reply(&mut self, element: ElementId, ack: AckContext, status: StatusMessage) {
        trace!(%element, dst = %ack.src, opcode = ?status.opcode(), "reply");
        self.outbox.push(OutboundMessage {
            opcode: status.opcode(),
            element,
            dst: Destination::Reply(ack.src),
            app_key_index: ack.app_key_index,
            ttl: TTL_DEFAULT,
            params: status.encode(),
        });
    }

    /// Offer a status publication; `periodic` ones go through the rate limiter
    pub fn publish(&mut self, element: ElementId, publish: &mut PublishState, status: StatusMessage, periodic: bool) {
        if !publish.offer(self.now_ms, periodic) {
            return;
        }
        trace!(%element, dst = %publish.address, opcode = ?status.opcode(), "publish");
        self.outbox.push(OutboundMessage {
            opcode: status.opcode(),
            element,
            dst: Destination::Publish(publish.address),
            app_key_index: publish.app_key_index,
            ttl: publish.ttl,
            params: status.encode(),
        });
    }

    pub fn emit(&mut self, event: ModelEvent) {
        self.events.push(event);
    }

    /// Publish and raise events after a state step.
    ///
    /// Message- and binding-driven steps always publish. Timer steps publish
    /// only when something changed, through the rate limiter unless final.
    #[allow(clippy::too_many_arguments)]
    pub fn announce(
        &mut self,
        element: ElementId,
        publish: &mut PublishState,
        status: StatusMessage,
        state: ModelState,
        source: UpdateSource,
        outcome: StepOutcome,
        from_timer: bool,
    ) {
        if !from_timer || outcome.changed || outcome.finished {
            self.publish(element, publish, status, from_timer && !outcome.finished);
        }
        if outcome.changed {
            self.emit(ModelEvent::StateUpdate {
                element,
                state,
                source,
            });
        }
    }

    pub fn save(&mut self, id: DatasetId, data: &[u8]) {
        self.nvm.save(id, data);
    }

    pub fn load(&self, id: DatasetId) -> Option<Vec<u8>> {
        self.nvm.load(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_disabled() {
        let mut publish = PublishState::disabled();
        assert!(!publish.offer(0, false));
    }

    #[test]
    fn test_rate_limit_periodic_only() {
        let mut publish = PublishState::new(MeshAddress(0xC000), AppKeyIndex(0), 5, 250);
        assert!(publish.offer(0, true));
        assert!(!publish.offer(100, true));
        assert!(publish.offer(100, false));
        assert!(!publish.offer(300, true));
        assert!(publish.offer(350, true));
    }

    #[test]
    fn test_no_limit() {
        let mut publish = PublishState::new(MeshAddress(0xC000), AppKeyIndex(0), 5, 0);
        assert!(publish.offer(0, true));
        assert!(publish.offer(0, true));
    }
}
