//! Time server
//!
//! Holds the node's TAI clock and Time Role. The runtime advances the clock
//! from a once-per-second periodic timer; the Scheduler reads local time
//! from it.

use std::time::Duration;

use chrono::NaiveDateTime;
use meshlight_core::{ElementId, ModelEvent, ModelKind};
use meshlight_state::{AckContext, DatasetGroup, DatasetId};
use meshlight_time::{TaiClock, TimerId, TimerMode, TimerSlot};
use meshlight_wire::{ModelMessage, StatusMessage, TimeState};
use tracing::{debug, info, warn};

use crate::{ModelCtx, PublishState};

/// Clock timer period
pub const CLOCK_PERIOD_MS: u32 = 1_000;

/// Time Role values
pub const TIME_ROLE_NONE: u8 = 0x00;
pub const TIME_ROLE_AUTHORITY: u8 = 0x01;
pub const TIME_ROLE_RELAY: u8 = 0x02;
pub const TIME_ROLE_CLIENT: u8 = 0x03;

/// Time (+ Setup) server
#[derive(Clone, Debug)]
pub struct TimeServer {
    element: ElementId,
    pub publish: PublishState,
    clock: TaiClock,
    role: u8,
}

impl TimeServer {
    pub fn new(element: ElementId) -> Self {
        TimeServer {
            element,
            publish: PublishState::disabled(),
            clock: TaiClock::new(),
            role: TIME_ROLE_NONE,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn clock(&self) -> &TaiClock {
        &self.clock
    }

    pub fn role(&self) -> u8 {
        self.role
    }

    pub fn clock_timer(&self) -> TimerId {
        TimerId::new(self.element, ModelKind::Time, TimerSlot::Clock)
    }

    /// Arm the once-per-second clock timer
    pub fn start_clock(&self, ctx: &mut ModelCtx<'_>) {
        let period = Duration::from_millis(CLOCK_PERIOD_MS as u64);
        if let Err(err) = ctx.timers.start(self.clock_timer(), period, TimerMode::Periodic) {
            warn!(element = %self.element, %err, "no timer for the time clock");
        }
    }

    /// Advance the clock; returns whole seconds crossed
    pub fn advance(&mut self, elapsed_ms: u32) -> u32 {
        self.clock.advance(elapsed_ms)
    }

    pub fn local_datetime(&self) -> Option<NaiveDateTime> {
        self.clock.local_datetime()
    }

    pub fn time_state(&self) -> TimeState {
        TimeState {
            tai_seconds: self.clock.tai_seconds(),
            subsecond: self.clock.subsecond(),
            uncertainty: self.clock.uncertainty(),
            time_authority: self.clock.time_authority(),
            tai_utc_delta: self.clock.tai_utc_delta(),
            time_zone_offset: self.clock.time_zone_offset(),
        }
    }

    fn zone_status(&self) -> StatusMessage {
        let current = self.clock.time_zone_offset();
        let (new, tai_of_change) = self
            .clock
            .pending_zone()
            .map_or((current, 0), |p| (p.value, p.tai_of_change));
        StatusMessage::TimeZone {
            current,
            new,
            tai_of_change,
        }
    }

    fn delta_status(&self) -> StatusMessage {
        let current = self.clock.tai_utc_delta();
        let (new, tai_of_change) = self
            .clock
            .pending_delta()
            .map_or((current, 0), |p| (p.value, p.tai_of_change));
        StatusMessage::TaiUtcDelta {
            current,
            new,
            tai_of_change,
        }
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::TimeRole, self.element)
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) {
        match msg {
            ModelMessage::TimeGet => ctx.reply(self.element, ack, StatusMessage::Time(self.time_state())),
            ModelMessage::TimeSet(state) => {
                self.set_time(ctx, *state);
                ctx.reply(self.element, ack, StatusMessage::Time(self.time_state()));
            }
            ModelMessage::TimeRoleGet => ctx.reply(self.element, ack, StatusMessage::TimeRole(self.role)),
            ModelMessage::TimeRoleSet { role } => {
                self.set_role(ctx, *role);
                ctx.reply(self.element, ack, StatusMessage::TimeRole(self.role));
            }
            ModelMessage::TimeZoneGet => ctx.reply(self.element, ack, self.zone_status()),
            ModelMessage::TimeZoneSet {
                offset_new,
                tai_of_change,
            } => {
                self.clock.set_zone_change(*offset_new, *tai_of_change);
                self.time_updated(ctx);
                ctx.reply(self.element, ack, self.zone_status());
            }
            ModelMessage::TaiUtcDeltaGet => ctx.reply(self.element, ack, self.delta_status()),
            ModelMessage::TaiUtcDeltaSet {
                delta_new,
                tai_of_change,
            } => {
                self.clock.set_delta_change(*delta_new, *tai_of_change);
                self.time_updated(ctx);
                ctx.reply(self.element, ack, self.delta_status());
            }
            other => debug!(element = %self.element, ?other, "not a Time message"),
        }
    }

    /// Set the full time state and start the clock
    pub fn set_time(&mut self, ctx: &mut ModelCtx<'_>, state: TimeState) {
        self.clock.set(
            state.tai_seconds,
            state.subsecond,
            state.uncertainty,
            state.time_authority,
            state.tai_utc_delta,
            state.time_zone_offset,
        );
        info!(element = %self.element, tai = state.tai_seconds, "time set");
        if self.clock.is_known() && !ctx.timers.is_armed(self.clock_timer()) {
            self.start_clock(ctx);
        }
        self.time_updated(ctx);
        let status = StatusMessage::Time(self.time_state());
        ctx.publish(self.element, &mut self.publish, status, false);
    }

    pub fn set_role(&mut self, ctx: &mut ModelCtx<'_>, role: u8) {
        self.role = role;
        ctx.save(self.dataset(), &[role]);
        ctx.emit(ModelEvent::TimeRoleChanged {
            element: self.element,
            role,
        });
    }

    fn time_updated(&self, ctx: &mut ModelCtx<'_>) {
        ctx.emit(ModelEvent::TimeUpdated {
            element: self.element,
            tai_seconds: self.clock.tai_seconds(),
        });
    }

    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) {
        match ctx.load(self.dataset()).as_deref() {
            Some(&[role]) if role <= TIME_ROLE_CLIENT => self.role = role,
            Some(_) => debug!("discarding time role dataset"),
            None => {}
        }
    }
}
