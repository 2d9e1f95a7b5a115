//! Uniform dispatch over every model server kind

use meshlight_core::{BindValue, BoundState, ElementId, ModelKind, TransitionParams};
use meshlight_state::{AckContext, BindingKey};
use meshlight_time::TimerId;
use meshlight_wire::ModelMessage;

use crate::{
    Change, DefaultTransitionServer, HslPart, HslServer, LevelServer, LightnessServer, ModelCtx,
    OnOffServer, PowerLevelServer, PowerOnOffServer, PublishState, SceneRequest, SceneServer,
    SchedulerServer, TimeServer,
};

/// What handling one message produced for the node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Handled {
    /// Bound states that changed and must cascade
    pub changes: Vec<Change>,
    /// Scene snapshot work to fan out
    pub scene: Option<SceneRequest>,
}

impl Handled {
    fn changes(changes: Vec<Change>) -> Self {
        Handled {
            changes,
            scene: None,
        }
    }
}

/// One model instance on the node
#[derive(Clone, Debug)]
pub enum ModelServer {
    OnOff(OnOffServer),
    Level(LevelServer),
    DefaultTransition(DefaultTransitionServer),
    PowerOnOff(PowerOnOffServer),
    PowerLevel(PowerLevelServer),
    Lightness(LightnessServer),
    Hsl(HslServer),
    Scene(SceneServer),
    Scheduler(SchedulerServer),
    Time(TimeServer),
}

impl ModelServer {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelServer::OnOff(_) => ModelKind::GenOnOff,
            ModelServer::Level(_) => ModelKind::GenLevel,
            ModelServer::DefaultTransition(_) => ModelKind::GenDefaultTransitionTime,
            ModelServer::PowerOnOff(_) => ModelKind::GenPowerOnOff,
            ModelServer::PowerLevel(_) => ModelKind::GenPowerLevel,
            ModelServer::Lightness(_) => ModelKind::LightLightness,
            ModelServer::Hsl(_) => ModelKind::LightHsl,
            ModelServer::Scene(_) => ModelKind::Scene,
            ModelServer::Scheduler(_) => ModelKind::Scheduler,
            ModelServer::Time(_) => ModelKind::Time,
        }
    }

    pub fn element(&self) -> ElementId {
        match self {
            ModelServer::OnOff(s) => s.element(),
            ModelServer::Level(s) => s.element(),
            ModelServer::DefaultTransition(s) => s.element(),
            ModelServer::PowerOnOff(s) => s.element(),
            ModelServer::PowerLevel(s) => s.element(),
            ModelServer::Lightness(s) => s.element(),
            ModelServer::Hsl(s) => s.element(),
            ModelServer::Scene(s) => s.element(),
            ModelServer::Scheduler(s) => s.element(),
            ModelServer::Time(s) => s.element(),
        }
    }

    /// `(element, kind)` pairs this instance answers for
    pub fn addresses(&self) -> Vec<(ElementId, ModelKind)> {
        match self {
            ModelServer::Hsl(s) => vec![
                (s.element(), ModelKind::LightHsl),
                (s.hue_element(), ModelKind::LightHslHue),
                (s.saturation_element(), ModelKind::LightHslSaturation),
            ],
            other => vec![(other.element(), other.kind())],
        }
    }

    /// Binding graph nodes owned by this instance
    pub fn bound_states(&self) -> Vec<BindingKey> {
        let key = BindingKey::new;
        match self {
            ModelServer::OnOff(s) => vec![key(s.element(), BoundState::OnOff)],
            ModelServer::Level(s) => vec![key(s.element(), BoundState::Level)],
            ModelServer::PowerLevel(s) => vec![key(s.element(), BoundState::PowerActual)],
            ModelServer::Lightness(s) => vec![key(s.element(), BoundState::LightnessActual)],
            ModelServer::Hsl(s) => vec![
                key(s.element(), BoundState::HslLightness),
                key(s.hue_element(), BoundState::HslHue),
                key(s.saturation_element(), BoundState::HslSaturation),
            ],
            _ => Vec::new(),
        }
    }

    /// Has per-scene snapshot slots
    pub fn is_scene_capable(&self) -> bool {
        !self.bound_states().is_empty()
    }

    /// Any state of this instance is delaying, transitioning or moving
    pub fn is_transitioning(&self) -> bool {
        match self {
            ModelServer::OnOff(s) => s.model().is_active(),
            ModelServer::Level(s) => s.model().is_active(),
            ModelServer::PowerLevel(s) => s.model().is_active(),
            ModelServer::Lightness(s) => s.model().is_active(),
            ModelServer::Hsl(s) => [HslPart::Lightness, HslPart::Hue, HslPart::Saturation]
                .into_iter()
                .any(|part| s.model(part).is_active()),
            _ => false,
        }
    }

    /// Publication settings of the instance's main element
    pub fn publish_mut(&mut self) -> &mut PublishState {
        match self {
            ModelServer::OnOff(s) => &mut s.publish,
            ModelServer::Level(s) => &mut s.publish,
            ModelServer::DefaultTransition(s) => &mut s.publish,
            ModelServer::PowerOnOff(s) => &mut s.publish,
            ModelServer::PowerLevel(s) => &mut s.publish,
            ModelServer::Lightness(s) => &mut s.publish,
            ModelServer::Hsl(s) => &mut s.publish,
            ModelServer::Scene(s) => &mut s.publish,
            ModelServer::Scheduler(s) => &mut s.publish,
            ModelServer::Time(s) => &mut s.publish,
        }
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) -> Handled {
        match self {
            ModelServer::OnOff(s) => Handled::changes(s.handle(ctx, ack, msg)),
            ModelServer::Level(s) => Handled::changes(s.handle(ctx, ack, msg)),
            ModelServer::PowerLevel(s) => Handled::changes(s.handle(ctx, ack, msg)),
            ModelServer::Lightness(s) => Handled::changes(s.handle(ctx, ack, msg)),
            ModelServer::Hsl(s) => Handled::changes(s.handle(ctx, ack, msg)),
            ModelServer::DefaultTransition(s) => {
                s.handle(ctx, ack, msg);
                Handled::default()
            }
            ModelServer::PowerOnOff(s) => {
                s.handle(ctx, ack, msg);
                Handled::default()
            }
            ModelServer::Scheduler(s) => {
                s.handle(ctx, ack, msg);
                Handled::default()
            }
            ModelServer::Time(s) => {
                s.handle(ctx, ack, msg);
                Handled::default()
            }
            ModelServer::Scene(s) => Handled {
                changes: Vec::new(),
                scene: s.handle(ctx, ack, msg),
            },
        }
    }

    /// Push a bound value into this instance; `None` stops the cascade here
    pub fn apply_binding(&mut self, ctx: &mut ModelCtx<'_>, value: BindValue, params: TransitionParams) -> Option<BindValue> {
        match self {
            ModelServer::OnOff(s) => s.apply_binding(ctx, value, params),
            ModelServer::Level(s) => s.apply_binding(ctx, value, params),
            ModelServer::PowerLevel(s) => s.apply_binding(ctx, value, params),
            ModelServer::Lightness(s) => s.apply_binding(ctx, value, params),
            ModelServer::Hsl(s) => s.apply_binding(ctx, value, params),
            _ => None,
        }
    }

    /// A transition timer owned by this instance fired
    pub fn on_timer(&mut self, ctx: &mut ModelCtx<'_>, id: TimerId) -> Option<Change> {
        match self {
            ModelServer::OnOff(s) => s.on_timer(ctx),
            ModelServer::Level(s) => s.on_timer(ctx),
            ModelServer::PowerLevel(s) => s.on_timer(ctx),
            ModelServer::Lightness(s) => s.on_timer(ctx),
            ModelServer::Hsl(s) => s.on_timer(ctx, id),
            _ => None,
        }
    }

    pub fn store_scene(&mut self, ctx: &mut ModelCtx<'_>, slot: usize) {
        match self {
            ModelServer::OnOff(s) => s.store_scene(ctx, slot),
            ModelServer::Level(s) => s.store_scene(ctx, slot),
            ModelServer::PowerLevel(s) => s.store_scene(ctx, slot),
            ModelServer::Lightness(s) => s.store_scene(ctx, slot),
            ModelServer::Hsl(s) => s.store_scene(ctx, slot),
            _ => {}
        }
    }

    pub fn recall_scene(&mut self, ctx: &mut ModelCtx<'_>, slot: usize, params: TransitionParams) {
        match self {
            ModelServer::OnOff(s) => s.recall_scene(ctx, slot, params),
            ModelServer::Level(s) => s.recall_scene(ctx, slot, params),
            ModelServer::PowerLevel(s) => s.recall_scene(ctx, slot, params),
            ModelServer::Lightness(s) => s.recall_scene(ctx, slot, params),
            ModelServer::Hsl(s) => s.recall_scene(ctx, slot, params),
            _ => {}
        }
    }
}
