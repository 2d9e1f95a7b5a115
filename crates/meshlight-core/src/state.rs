//! State values and binding primitives
//!
//! Every transitionable state variable implements [`StateValue`]: it knows
//! how to interpolate between two values and how to clamp into its numeric
//! range. Binding edges exchange [`BindValue`]s tagged with their unit.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Provenance of a state change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpdateSource {
    /// Local application call
    #[default]
    Local,
    /// Received mesh message
    Network,
    /// Bound state cascade
    Binding,
    /// Scene recall
    SceneRecall,
    /// Power-up restore
    PowerUp,
    /// Scheduler action
    Scheduler,
}

/// A transitionable state value
pub trait StateValue: Copy + PartialEq + Debug + Default {
    /// Value at `step` of `steps` when moving from `initial` to `target`.
    /// `step >= steps` yields `target` exactly.
    fn interpolate(initial: Self, target: Self, step: u32, steps: u32) -> Self;

    /// Add a signed delta, saturating at the type's range
    fn offset(self, delta: i32) -> Self;
}

#[inline]
fn lerp_i64(initial: i64, target: i64, step: u32, steps: u32) -> i64 {
    initial + (target - initial) * step as i64 / steps as i64
}

impl StateValue for i16 {
    fn interpolate(initial: i16, target: i16, step: u32, steps: u32) -> i16 {
        if steps == 0 || step >= steps {
            return target;
        }
        lerp_i64(initial as i64, target as i64, step, steps) as i16
    }

    fn offset(self, delta: i32) -> i16 {
        (self as i32 + delta).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl StateValue for u16 {
    fn interpolate(initial: u16, target: u16, step: u32, steps: u32) -> u16 {
        if steps == 0 || step >= steps {
            return target;
        }
        lerp_i64(initial as i64, target as i64, step, steps) as u16
    }

    fn offset(self, delta: i32) -> u16 {
        (self as i32 + delta).clamp(0, u16::MAX as i32) as u16
    }
}

/// Generic OnOff: on for the whole transition whenever either end is on
impl StateValue for bool {
    fn interpolate(initial: bool, target: bool, step: u32, steps: u32) -> bool {
        if steps == 0 || step >= steps {
            return target;
        }
        initial || target
    }

    fn offset(self, delta: i32) -> bool {
        if delta == 0 {
            self
        } else {
            delta > 0
        }
    }
}

/// Bound state variable kinds (binding graph node kinds)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BoundState {
    OnOff,
    Level,
    PowerActual,
    LightnessActual,
    HslLightness,
    HslHue,
    HslSaturation,
}

/// Value exchanged along a binding edge, tagged with its unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindValue {
    OnOff(bool),
    Level(i16),
    PowerActual(u16),
    LightnessActual(u16),
    HslLightness(u16),
    Hue(u16),
    Saturation(u16),
}

impl BindValue {
    /// Kind of state this value describes
    pub fn kind(self) -> BoundState {
        match self {
            BindValue::OnOff(_) => BoundState::OnOff,
            BindValue::Level(_) => BoundState::Level,
            BindValue::PowerActual(_) => BoundState::PowerActual,
            BindValue::LightnessActual(_) => BoundState::LightnessActual,
            BindValue::HslLightness(_) => BoundState::HslLightness,
            BindValue::Hue(_) => BoundState::HslHue,
            BindValue::Saturation(_) => BoundState::HslSaturation,
        }
    }
}

/// Level = unsigned - 32768
#[inline]
pub fn unsigned_to_level(value: u16) -> i16 {
    (value as i32 - 32768) as i16
}

/// Unsigned = Level + 32768
#[inline]
pub fn level_to_unsigned(level: i16) -> u16 {
    (level as i32 + 32768) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_interpolation() {
        assert_eq!(i16::interpolate(0, 100, 0, 10), 0);
        assert_eq!(i16::interpolate(0, 100, 1, 10), 10);
        assert_eq!(i16::interpolate(0, 100, 10, 10), 100);
        assert_eq!(i16::interpolate(100, 0, 3, 10), 70);
        assert_eq!(i16::interpolate(i16::MIN, i16::MAX, 5, 10), -1);
    }

    #[test]
    fn test_truncating_interpolation() {
        // 7 / 3 per step truncates; last step lands exactly
        assert_eq!(u16::interpolate(0, 7, 1, 3), 2);
        assert_eq!(u16::interpolate(0, 7, 2, 3), 4);
        assert_eq!(u16::interpolate(0, 7, 3, 3), 7);
    }

    #[test]
    fn test_zero_steps_is_target() {
        assert_eq!(u16::interpolate(10, 20, 0, 0), 20);
    }

    #[test]
    fn test_onoff_transition_semantics() {
        assert!(bool::interpolate(false, true, 0, 10));
        assert!(bool::interpolate(true, false, 9, 10));
        assert!(!bool::interpolate(true, false, 10, 10));
    }

    #[test]
    fn test_offset_saturates() {
        assert_eq!(i16::MAX.offset(10), i16::MAX);
        assert_eq!(i16::MIN.offset(-10), i16::MIN);
        assert_eq!(0u16.offset(-1), 0);
        assert_eq!(5i16.offset(-10), -5);
    }

    #[test]
    fn test_level_unsigned_mapping() {
        assert_eq!(unsigned_to_level(0), i16::MIN);
        assert_eq!(unsigned_to_level(u16::MAX), i16::MAX);
        assert_eq!(level_to_unsigned(0), 32768);
        assert_eq!(level_to_unsigned(unsigned_to_level(1234)), 1234);
    }
}
