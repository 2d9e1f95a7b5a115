//! Upper-layer event definitions
//!
//! Events are the only channel through which the application learns about
//! state changes. Every change carries the new present value, the target,
//! the remaining transition time and its provenance.

use crate::{ElementId, UpdateSource};

/// Snapshot of one model's transitionable state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    OnOff {
        present: bool,
        target: bool,
        remaining_ms: u32,
    },
    Level {
        present: i16,
        target: i16,
        remaining_ms: u32,
    },
    PowerActual {
        present: u16,
        target: u16,
        remaining_ms: u32,
    },
    LightnessActual {
        present: u16,
        target: u16,
        remaining_ms: u32,
    },
    LightnessLinear {
        present: u16,
        target: u16,
        remaining_ms: u32,
    },
    Hsl {
        lightness: u16,
        hue: u16,
        saturation: u16,
        remaining_ms: u32,
    },
    Hue {
        present: u16,
        target: u16,
        remaining_ms: u32,
    },
    Saturation {
        present: u16,
        target: u16,
        remaining_ms: u32,
    },
}

impl ModelState {
    /// Remaining transition time carried by this snapshot
    pub fn remaining_ms(&self) -> u32 {
        match *self {
            ModelState::OnOff { remaining_ms, .. }
            | ModelState::Level { remaining_ms, .. }
            | ModelState::PowerActual { remaining_ms, .. }
            | ModelState::LightnessActual { remaining_ms, .. }
            | ModelState::LightnessLinear { remaining_ms, .. }
            | ModelState::Hsl { remaining_ms, .. }
            | ModelState::Hue { remaining_ms, .. }
            | ModelState::Saturation { remaining_ms, .. } => remaining_ms,
        }
    }
}

/// Which durable setting changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKind {
    PowerDefault,
    PowerRange,
    LightnessDefault,
    LightnessRange,
    HslDefault,
    HslRange,
}

/// Scheduled action types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScheduleAction {
    TurnOff = 0x00,
    TurnOn = 0x01,
    SceneRecall = 0x02,
    NoAction = 0x0F,
}

impl ScheduleAction {
    pub fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0x00 => Some(ScheduleAction::TurnOff),
            0x01 => Some(ScheduleAction::TurnOn),
            0x02 => Some(ScheduleAction::SceneRecall),
            0x0F => Some(ScheduleAction::NoAction),
            _ => None,
        }
    }

    #[inline]
    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

/// Event delivered to the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelEvent {
    /// Reply to an explicit Get
    CurrentState {
        element: ElementId,
        state: ModelState,
    },
    /// Present value changed
    StateUpdate {
        element: ElementId,
        state: ModelState,
        source: UpdateSource,
    },
    /// Default Transition Time changed
    DefaultTransitionChanged { element: ElementId, raw: u8 },
    /// OnPowerUp changed
    OnPowerUpChanged { element: ElementId, value: u8 },
    /// A Default or Range setting changed
    SettingChanged {
        element: ElementId,
        setting: SettingKind,
    },
    SceneStored { element: ElementId, scene: u16 },
    SceneRecalled {
        element: ElementId,
        scene: u16,
        transition_ms: u32,
    },
    SceneDeleted { element: ElementId, scene: u16 },
    /// A scheduler register entry was set
    ScheduleUpdated { element: ElementId, index: u8 },
    /// A scheduler entry fired
    ScheduleFired {
        element: ElementId,
        index: u8,
        action: ScheduleAction,
    },
    /// Time, zone or TAI-UTC delta changed
    TimeUpdated { element: ElementId, tai_seconds: u64 },
    TimeRoleChanged { element: ElementId, role: u8 },
}

impl ModelEvent {
    /// Element the event concerns
    pub fn element(&self) -> ElementId {
        match *self {
            ModelEvent::CurrentState { element, .. }
            | ModelEvent::StateUpdate { element, .. }
            | ModelEvent::DefaultTransitionChanged { element, .. }
            | ModelEvent::OnPowerUpChanged { element, .. }
            | ModelEvent::SettingChanged { element, .. }
            | ModelEvent::SceneStored { element, .. }
            | ModelEvent::SceneRecalled { element, .. }
            | ModelEvent::SceneDeleted { element, .. }
            | ModelEvent::ScheduleUpdated { element, .. }
            | ModelEvent::ScheduleFired { element, .. }
            | ModelEvent::TimeUpdated { element, .. }
            | ModelEvent::TimeRoleChanged { element, .. } => element,
        }
    }

    /// Is this a state change (as opposed to a Get reply or setting change)?
    pub fn is_state_update(&self) -> bool {
        matches!(self, ModelEvent::StateUpdate { .. })
    }
}
