//! Outbound Status message encoding
//!
//! Status messages for transitionable states carry the optional
//! `target + remaining time` pair only while a transition is in progress.

use bytes::{BufMut, Bytes, BytesMut};
use meshlight_core::TransitionTime;

use crate::message::write_u40;
use crate::*;

/// Scene status codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SceneStatusCode {
    Success = 0x00,
    RegisterFull = 0x01,
    NotFound = 0x02,
}

/// Range set status codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RangeStatusCode {
    Success = 0x00,
    CannotSetMin = 0x01,
    CannotSetMax = 0x02,
}

/// Present value with an optional in-progress target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transitional<T> {
    pub present: T,
    /// `(target, remaining)` while a transition is running
    pub target: Option<(T, TransitionTime)>,
}

impl<T: Copy> Transitional<T> {
    pub fn settled(present: T) -> Self {
        Transitional {
            present,
            target: None,
        }
    }

    pub fn moving(present: T, target: T, remaining: TransitionTime) -> Self {
        Transitional {
            present,
            target: Some((target, remaining)),
        }
    }
}

/// Outbound Status message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMessage {
    OnOff(Transitional<bool>),
    Level(Transitional<i16>),
    DefaultTransition(TransitionTime),
    OnPowerUp(OnPowerUp),
    Power(Transitional<u16>),
    PowerLast(u16),
    PowerDefault(u16),
    PowerRange {
        status: RangeStatusCode,
        range: StateRange,
    },
    Lightness(Transitional<u16>),
    LightnessLinear(Transitional<u16>),
    LightnessLast(u16),
    LightnessDefault(u16),
    LightnessRange {
        status: RangeStatusCode,
        range: StateRange,
    },
    Hsl {
        value: HslValue,
        remaining: Option<TransitionTime>,
    },
    HslTarget {
        value: HslValue,
        remaining: Option<TransitionTime>,
    },
    HslHue(Transitional<u16>),
    HslSaturation(Transitional<u16>),
    HslDefault(HslValue),
    HslRange {
        status: RangeStatusCode,
        hue: StateRange,
        saturation: StateRange,
    },
    Scene {
        status: SceneStatusCode,
        current: u16,
        /// `(target scene, remaining)` while a recall transition runs
        target: Option<(u16, TransitionTime)>,
    },
    SceneRegister {
        status: SceneStatusCode,
        current: u16,
        scenes: Vec<u16>,
    },
    Scheduler { bitmap: u16 },
    SchedulerAction(ScheduleEntry),
    Time(TimeState),
    TimeRole(u8),
    TimeZone {
        current: u8,
        new: u8,
        tai_of_change: u64,
    },
    TaiUtcDelta {
        current: u16,
        new: u16,
        tai_of_change: u64,
    },
}

fn put_transitional<T: Copy>(buf: &mut BytesMut, value: &Transitional<T>, put: impl Fn(&mut BytesMut, T)) {
    put(buf, value.present);
    if let Some((target, remaining)) = value.target {
        put(buf, target);
        buf.put_u8(remaining.0);
    }
}

fn put_u16(buf: &mut BytesMut, v: u16) {
    buf.put_u16_le(v);
}

fn put_hsl(buf: &mut BytesMut, v: HslValue) {
    buf.put_u16_le(v.lightness);
    buf.put_u16_le(v.hue);
    buf.put_u16_le(v.saturation);
}

fn put_range(buf: &mut BytesMut, range: StateRange) {
    buf.put_u16_le(range.min);
    buf.put_u16_le(range.max);
}

impl StatusMessage {
    /// Opcode of this status
    pub fn opcode(&self) -> Opcode {
        match self {
            StatusMessage::OnOff(_) => GEN_ONOFF_STATUS,
            StatusMessage::Level(_) => GEN_LEVEL_STATUS,
            StatusMessage::DefaultTransition(_) => GEN_DEF_TRANS_STATUS,
            StatusMessage::OnPowerUp(_) => GEN_ON_POWER_UP_STATUS,
            StatusMessage::Power(_) => GEN_POWER_STATUS,
            StatusMessage::PowerLast(_) => GEN_POWER_LAST_STATUS,
            StatusMessage::PowerDefault(_) => GEN_POWER_DEFAULT_STATUS,
            StatusMessage::PowerRange { .. } => GEN_POWER_RANGE_STATUS,
            StatusMessage::Lightness(_) => LIGHT_LIGHTNESS_STATUS,
            StatusMessage::LightnessLinear(_) => LIGHT_LIGHTNESS_LINEAR_STATUS,
            StatusMessage::LightnessLast(_) => LIGHT_LIGHTNESS_LAST_STATUS,
            StatusMessage::LightnessDefault(_) => LIGHT_LIGHTNESS_DEFAULT_STATUS,
            StatusMessage::LightnessRange { .. } => LIGHT_LIGHTNESS_RANGE_STATUS,
            StatusMessage::Hsl { .. } => LIGHT_HSL_STATUS,
            StatusMessage::HslTarget { .. } => LIGHT_HSL_TARGET_STATUS,
            StatusMessage::HslHue(_) => LIGHT_HSL_HUE_STATUS,
            StatusMessage::HslSaturation(_) => LIGHT_HSL_SAT_STATUS,
            StatusMessage::HslDefault(_) => LIGHT_HSL_DEFAULT_STATUS,
            StatusMessage::HslRange { .. } => LIGHT_HSL_RANGE_STATUS,
            StatusMessage::Scene { .. } => SCENE_STATUS,
            StatusMessage::SceneRegister { .. } => SCENE_REGISTER_STATUS,
            StatusMessage::Scheduler { .. } => SCHEDULER_STATUS,
            StatusMessage::SchedulerAction(_) => SCHEDULER_ACTION_STATUS,
            StatusMessage::Time(_) => TIME_STATUS,
            StatusMessage::TimeRole(_) => TIME_ROLE_STATUS,
            StatusMessage::TimeZone { .. } => TIME_ZONE_STATUS,
            StatusMessage::TaiUtcDelta { .. } => TAI_UTC_DELTA_STATUS,
        }
    }

    /// Encode the status parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        match self {
            StatusMessage::OnOff(v) => put_transitional(&mut buf, v, |b, on| b.put_u8(on as u8)),
            StatusMessage::Level(v) => put_transitional(&mut buf, v, |b, l| b.put_i16_le(l)),
            StatusMessage::DefaultTransition(tt) => buf.put_u8(tt.0),
            StatusMessage::OnPowerUp(v) => buf.put_u8(v.to_byte()),
            StatusMessage::Power(v)
            | StatusMessage::Lightness(v)
            | StatusMessage::LightnessLinear(v)
            | StatusMessage::HslHue(v)
            | StatusMessage::HslSaturation(v) => put_transitional(&mut buf, v, put_u16),
            StatusMessage::PowerLast(v)
            | StatusMessage::PowerDefault(v)
            | StatusMessage::LightnessLast(v)
            | StatusMessage::LightnessDefault(v) => buf.put_u16_le(*v),
            StatusMessage::PowerRange { status, range }
            | StatusMessage::LightnessRange { status, range } => {
                buf.put_u8(*status as u8);
                put_range(&mut buf, *range);
            }
            StatusMessage::Hsl { value, remaining } | StatusMessage::HslTarget { value, remaining } => {
                put_hsl(&mut buf, *value);
                if let Some(remaining) = remaining {
                    buf.put_u8(remaining.0);
                }
            }
            StatusMessage::HslDefault(value) => put_hsl(&mut buf, *value),
            StatusMessage::HslRange {
                status,
                hue,
                saturation,
            } => {
                buf.put_u8(*status as u8);
                put_range(&mut buf, *hue);
                put_range(&mut buf, *saturation);
            }
            StatusMessage::Scene {
                status,
                current,
                target,
            } => {
                buf.put_u8(*status as u8);
                buf.put_u16_le(*current);
                if let Some((scene, remaining)) = target {
                    buf.put_u16_le(*scene);
                    buf.put_u8(remaining.0);
                }
            }
            StatusMessage::SceneRegister {
                status,
                current,
                scenes,
            } => {
                buf.put_u8(*status as u8);
                buf.put_u16_le(*current);
                for scene in scenes {
                    buf.put_u16_le(*scene);
                }
            }
            StatusMessage::Scheduler { bitmap } => buf.put_u16_le(*bitmap),
            StatusMessage::SchedulerAction(entry) => buf.extend_from_slice(&entry.to_bytes()),
            StatusMessage::Time(state) => state.write(&mut buf),
            StatusMessage::TimeRole(role) => buf.put_u8(*role),
            StatusMessage::TimeZone {
                current,
                new,
                tai_of_change,
            } => {
                buf.put_u8(*current);
                buf.put_u8(*new);
                write_u40(&mut buf, *tai_of_change);
            }
            StatusMessage::TaiUtcDelta {
                current,
                new,
                tai_of_change,
            } => {
                buf.put_u16_le(*current & 0x7FFF);
                buf.put_u16_le(*new & 0x7FFF);
                write_u40(&mut buf, *tai_of_change);
            }
        }
        buf.freeze()
    }
}
