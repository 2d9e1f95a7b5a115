//! Model kinds hosted by the engine
//!
//! Each kind maps to a SIG model identifier. Setup server variants share the
//! instance of their main server and are not listed separately.

use serde::{Deserialize, Serialize};

/// Server model kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    GenOnOff,
    GenLevel,
    GenDefaultTransitionTime,
    GenPowerOnOff,
    GenPowerLevel,
    LightLightness,
    LightHsl,
    LightHslHue,
    LightHslSaturation,
    Scene,
    Scheduler,
    Time,
}

impl ModelKind {
    pub const ALL: [ModelKind; 12] = [
        ModelKind::GenOnOff,
        ModelKind::GenLevel,
        ModelKind::GenDefaultTransitionTime,
        ModelKind::GenPowerOnOff,
        ModelKind::GenPowerLevel,
        ModelKind::LightLightness,
        ModelKind::LightHsl,
        ModelKind::LightHslHue,
        ModelKind::LightHslSaturation,
        ModelKind::Scene,
        ModelKind::Scheduler,
        ModelKind::Time,
    ];

    /// SIG model identifier of the server
    pub fn sig_model_id(self) -> u16 {
        match self {
            ModelKind::GenOnOff => 0x1000,
            ModelKind::GenLevel => 0x1002,
            ModelKind::GenDefaultTransitionTime => 0x1004,
            ModelKind::GenPowerOnOff => 0x1006,
            ModelKind::GenPowerLevel => 0x1009,
            ModelKind::LightLightness => 0x1300,
            ModelKind::LightHsl => 0x1307,
            ModelKind::LightHslHue => 0x130A,
            ModelKind::LightHslSaturation => 0x130B,
            ModelKind::Scene => 0x1203,
            ModelKind::Scheduler => 0x1206,
            ModelKind::Time => 0x1200,
        }
    }

    /// SIG model identifier of the paired setup server, if any
    pub fn setup_model_id(self) -> Option<u16> {
        match self {
            ModelKind::GenPowerOnOff => Some(0x1007),
            ModelKind::GenPowerLevel => Some(0x100A),
            ModelKind::LightLightness => Some(0x1301),
            ModelKind::LightHsl => Some(0x1308),
            ModelKind::Scene => Some(0x1204),
            ModelKind::Scheduler => Some(0x1207),
            ModelKind::Time => Some(0x1201),
            _ => None,
        }
    }

    pub fn from_sig_model_id(id: u16) -> Option<Self> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.sig_model_id() == id || k.setup_model_id() == Some(id))
    }

    /// Does this model keep per-scene snapshots?
    pub fn stores_scenes(self) -> bool {
        matches!(
            self,
            ModelKind::GenOnOff
                | ModelKind::GenLevel
                | ModelKind::GenPowerLevel
                | ModelKind::LightLightness
                | ModelKind::LightHsl
                | ModelKind::LightHslHue
                | ModelKind::LightHslSaturation
        )
    }
}
