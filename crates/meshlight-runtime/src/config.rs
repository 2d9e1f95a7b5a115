//! Node configuration
//!
//! A node is described by its element table: the model kinds hosted on
//! each element plus optional publication settings. Configurations are
//! plain serde documents and are validated before a node is built.

use std::collections::HashSet;

use meshlight_core::{MeshError, MeshResult, ModelKind};
use meshlight_state::TRANSACTION_WINDOW_MS;
use serde::{Deserialize, Serialize};

/// Largest scene register a node may request
pub const MAX_SCENE_CAPACITY: usize = 16;

/// Publication settings of one model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub model: ModelKind,
    pub address: u16,
    #[serde(default)]
    pub app_key_index: u16,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    /// Minimum spacing of per-tick publications, 0 = every tick
    #[serde(default)]
    pub min_interval_ms: u64,
}

fn default_ttl() -> u8 {
    meshlight_wire::TTL_DEFAULT
}

/// One element of the node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementConfig {
    pub models: Vec<ModelKind>,
    #[serde(default)]
    pub publish: Vec<PublishConfig>,
}

impl ElementConfig {
    pub fn new(models: impl Into<Vec<ModelKind>>) -> Self {
        ElementConfig {
            models: models.into(),
            publish: Vec::new(),
        }
    }

    pub fn has(&self, kind: ModelKind) -> bool {
        self.models.contains(&kind)
    }
}

/// Node configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub elements: Vec<ElementConfig>,
    /// Scene register slots (shared by every scene-capable state)
    pub scene_capacity: usize,
    /// Transaction aggregation window
    pub transaction_window_ms: u64,
    /// Simultaneously armed timers, `None` = unbounded
    pub timer_capacity: Option<usize>,
    /// Seed of the scheduler's random time fields
    pub scheduler_seed: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            elements: vec![ElementConfig::new([
                ModelKind::GenOnOff,
                ModelKind::GenLevel,
                ModelKind::GenDefaultTransitionTime,
            ])],
            scene_capacity: MAX_SCENE_CAPACITY,
            transaction_window_ms: TRANSACTION_WINDOW_MS,
            timer_capacity: None,
            scheduler_seed: 0,
        }
    }
}

impl NodeConfig {
    /// A dimmable light: OnOff, Level, Lightness, Power OnOff, Default
    /// Transition Time, Scenes, Scheduler and Time on one element
    pub fn dimmable_light() -> Self {
        NodeConfig {
            elements: vec![ElementConfig::new([
                ModelKind::GenOnOff,
                ModelKind::GenLevel,
                ModelKind::GenDefaultTransitionTime,
                ModelKind::GenPowerOnOff,
                ModelKind::LightLightness,
                ModelKind::Scene,
                ModelKind::Scheduler,
                ModelKind::Time,
            ])],
            ..NodeConfig::default()
        }
    }

    /// A colour light: the dimmable light plus HSL with its Hue and
    /// Saturation sub-elements
    pub fn hsl_light() -> Self {
        let mut config = Self::dimmable_light();
        config.elements[0].models.push(ModelKind::LightHsl);
        config.elements.push(ElementConfig::new([ModelKind::GenLevel, ModelKind::LightHslHue]));
        config
            .elements
            .push(ElementConfig::new([ModelKind::GenLevel, ModelKind::LightHslSaturation]));
        config
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> MeshResult<Self> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|e| MeshError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> MeshResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MeshError::InvalidConfig(e.to_string()))
    }

    /// Check the element table for combinations the engine cannot host
    pub fn validate(&self) -> MeshResult<()> {
        let invalid = |msg: String| Err(MeshError::InvalidConfig(msg));

        if self.elements.is_empty() {
            return invalid("no elements".into());
        }
        if self.elements.len() > u8::MAX as usize {
            return invalid(format!("{} elements", self.elements.len()));
        }
        if self.scene_capacity == 0 || self.scene_capacity > MAX_SCENE_CAPACITY {
            return invalid(format!("scene capacity {}", self.scene_capacity));
        }
        if self.transaction_window_ms == 0 {
            return invalid("zero transaction window".into());
        }
        if self.timer_capacity == Some(0) {
            return invalid("zero timer capacity".into());
        }

        let any = |kind| self.elements.iter().any(|e| e.has(kind));
        if any(ModelKind::Scheduler) && !any(ModelKind::Time) {
            return invalid("Scheduler requires a Time server".into());
        }

        for (i, element) in self.elements.iter().enumerate() {
            let mut seen = HashSet::new();
            for kind in &element.models {
                if !seen.insert(*kind) {
                    return invalid(format!("element {}: {:?} listed twice", i, kind));
                }
            }

            if element.has(ModelKind::GenPowerLevel) && element.has(ModelKind::LightLightness) {
                return invalid(format!("element {}: Power Level and Lightness both bind OnOff", i));
            }

            if element.has(ModelKind::LightHsl) {
                if !element.has(ModelKind::LightLightness) {
                    return invalid(format!("element {}: HSL requires Lightness", i));
                }
                let hue = self.elements.get(i + 1);
                let saturation = self.elements.get(i + 2);
                if !hue.is_some_and(|e| e.has(ModelKind::LightHslHue))
                    || !saturation.is_some_and(|e| e.has(ModelKind::LightHslSaturation))
                {
                    return invalid(format!("element {}: HSL needs Hue and Saturation on the next two elements", i));
                }
            }

            let owner = |offset: usize| i.checked_sub(offset).and_then(|o| self.elements.get(o));
            if element.has(ModelKind::LightHslHue) && !owner(1).is_some_and(|e| e.has(ModelKind::LightHsl)) {
                return invalid(format!("element {}: Hue without an HSL server before it", i));
            }
            if element.has(ModelKind::LightHslSaturation) && !owner(2).is_some_and(|e| e.has(ModelKind::LightHsl))
            {
                return invalid(format!("element {}: Saturation without an HSL server two before it", i));
            }

            for publish in &element.publish {
                if !element.has(publish.model) {
                    return invalid(format!("element {}: publication for absent {:?}", i, publish.model));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(NodeConfig::default().validate().is_ok());
        assert!(NodeConfig::dimmable_light().validate().is_ok());
        assert!(NodeConfig::hsl_light().validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = NodeConfig::hsl_light();
        let json = config.to_json().unwrap();
        assert_eq!(NodeConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_json_defaults() {
        let config = NodeConfig::from_json(
            r#"{ "elements": [ { "models": ["GenOnOff"], "publish": [ { "model": "GenOnOff", "address": 49152 } ] } ] }"#,
        )
        .unwrap();
        assert_eq!(config.scene_capacity, MAX_SCENE_CAPACITY);
        assert_eq!(config.transaction_window_ms, TRANSACTION_WINDOW_MS);
        assert_eq!(config.elements[0].publish[0].ttl, meshlight_wire::TTL_DEFAULT);
    }

    #[test]
    fn test_rejects_bad_tables() {
        let mut config = NodeConfig::hsl_light();
        config.elements.pop();
        assert!(matches!(config.validate(), Err(MeshError::InvalidConfig(_))));

        let mut config = NodeConfig::dimmable_light();
        config.elements[0].models.push(ModelKind::GenPowerLevel);
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.elements[0].models.push(ModelKind::Scheduler);
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.elements[0].models.push(ModelKind::GenOnOff);
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.elements[0].publish.push(PublishConfig {
            model: ModelKind::Scene,
            address: 0xC000,
            app_key_index: 0,
            ttl: 5,
            min_interval_ms: 0,
        });
        assert!(config.validate().is_err());

        assert!(NodeConfig::from_json("{ not json").is_err());
    }
}
