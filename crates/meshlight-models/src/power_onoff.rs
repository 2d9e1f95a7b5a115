//! Generic Power OnOff server (OnPowerUp)
//!
//! Holds only the OnPowerUp setting. The node applies it at boot to every
//! OnOff-bound state on the element.

use meshlight_core::{ElementId, ModelEvent};
use meshlight_state::{AckContext, DatasetGroup, DatasetId};
use meshlight_wire::{ModelMessage, OnPowerUp, StatusMessage};
use tracing::debug;

use crate::{ModelCtx, PublishState};

/// Generic Power OnOff (+ Setup) server
#[derive(Clone, Debug)]
pub struct PowerOnOffServer {
    element: ElementId,
    pub publish: PublishState,
    on_power_up: OnPowerUp,
}

impl PowerOnOffServer {
    pub fn new(element: ElementId) -> Self {
        PowerOnOffServer {
            element,
            publish: PublishState::disabled(),
            on_power_up: OnPowerUp::Off,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn on_power_up(&self) -> OnPowerUp {
        self.on_power_up
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::OnPowerUp, self.element)
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) {
        match msg {
            ModelMessage::OnPowerUpGet => {
                ctx.reply(self.element, ack, StatusMessage::OnPowerUp(self.on_power_up));
            }
            ModelMessage::OnPowerUpSet { value, ack: ack_requested } => {
                self.set(ctx, *value);
                if *ack_requested {
                    ctx.reply(self.element, ack, StatusMessage::OnPowerUp(self.on_power_up));
                }
            }
            other => debug!(element = %self.element, ?other, "not a Power OnOff message"),
        }
    }

    pub fn set(&mut self, ctx: &mut ModelCtx<'_>, value: OnPowerUp) {
        let changed = value != self.on_power_up;
        self.on_power_up = value;
        ctx.save(self.dataset(), &[value.to_byte()]);
        ctx.publish(self.element, &mut self.publish, StatusMessage::OnPowerUp(value), false);
        if changed {
            ctx.emit(ModelEvent::OnPowerUpChanged {
                element: self.element,
                value: value.to_byte(),
            });
        }
    }

    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) {
        if let Some(&[raw]) = ctx.load(self.dataset()).as_deref() {
            if let Some(value) = OnPowerUp::from_byte(raw) {
                self.on_power_up = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{ack, Harness};

    #[test]
    fn test_set_get() {
        let mut h = Harness::new();
        let mut server = PowerOnOffServer::new(ElementId(0));
        server.handle(
            &mut h.ctx(),
            ack(),
            &ModelMessage::OnPowerUpSet {
                value: OnPowerUp::Restore,
                ack: false,
            },
        );
        assert!(h.outbox.is_empty());
        server.handle(&mut h.ctx(), ack(), &ModelMessage::OnPowerUpGet);
        assert_eq!(&h.outbox[0].params[..], &[0x02]);

        let mut rebooted = PowerOnOffServer::new(ElementId(0));
        rebooted.restore(&mut h.ctx());
        assert_eq!(rebooted.on_power_up(), OnPowerUp::Restore);
    }
}
