//! TAI clock for the Time server
//!
//! Mesh time counts TAI seconds since 2000-01-01T00:00:00. A value of zero
//! means "time unknown". Local civil time is derived from the TAI-UTC delta
//! and the time zone offset, both carried in their raw wire encodings.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

/// Raw TAI-UTC delta that means zero seconds
pub const TAI_UTC_DELTA_ZERO: u16 = 0x00FF;

/// Raw time zone offset that means UTC
pub const TIME_ZONE_ZERO: u8 = 0x40;

/// Minutes per time zone offset step
pub const TIME_ZONE_STEP_MIN: i64 = 15;

/// Largest representable TAI seconds value (40 bits)
pub const TAI_SECONDS_LIMIT: u64 = (1 << 40) - 1;

/// A change scheduled to take effect at a TAI instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingChange<T> {
    pub value: T,
    pub tai_of_change: u64,
}

/// Local TAI clock
#[derive(Clone, Debug)]
pub struct TaiClock {
    tai_seconds: u64,
    /// Milliseconds into the current second
    sub_ms: u32,
    /// Uncertainty in 10 ms units
    uncertainty: u8,
    time_authority: bool,
    tai_utc_delta: u16,
    time_zone_offset: u8,
    pending_delta: Option<PendingChange<u16>>,
    pending_zone: Option<PendingChange<u8>>,
}

impl TaiClock {
    /// Create a clock with unknown time
    pub fn new() -> Self {
        TaiClock {
            tai_seconds: 0,
            sub_ms: 0,
            uncertainty: 0,
            time_authority: false,
            tai_utc_delta: TAI_UTC_DELTA_ZERO,
            time_zone_offset: TIME_ZONE_ZERO,
            pending_delta: None,
            pending_zone: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.tai_seconds != 0
    }

    pub fn tai_seconds(&self) -> u64 {
        self.tai_seconds
    }

    /// Subsecond in 1/256 s units
    pub fn subsecond(&self) -> u8 {
        (self.sub_ms * 256 / 1000) as u8
    }

    pub fn uncertainty(&self) -> u8 {
        self.uncertainty
    }

    pub fn time_authority(&self) -> bool {
        self.time_authority
    }

    /// Raw TAI-UTC delta (seconds + 255)
    pub fn tai_utc_delta(&self) -> u16 {
        self.tai_utc_delta
    }

    /// Raw time zone offset (15 minute steps + 64)
    pub fn time_zone_offset(&self) -> u8 {
        self.time_zone_offset
    }

    pub fn pending_delta(&self) -> Option<PendingChange<u16>> {
        self.pending_delta
    }

    pub fn pending_zone(&self) -> Option<PendingChange<u8>> {
        self.pending_zone
    }

    /// Set the full time state
    pub fn set(
        &mut self,
        tai_seconds: u64,
        subsecond: u8,
        uncertainty: u8,
        time_authority: bool,
        tai_utc_delta: u16,
        time_zone_offset: u8,
    ) {
        self.tai_seconds = tai_seconds.min(TAI_SECONDS_LIMIT);
        self.sub_ms = subsecond as u32 * 1000 / 256;
        self.uncertainty = uncertainty;
        self.time_authority = time_authority;
        self.tai_utc_delta = tai_utc_delta;
        self.time_zone_offset = time_zone_offset;
        self.apply_pending();
    }

    /// Schedule a zone offset change
    pub fn set_zone_change(&mut self, value: u8, tai_of_change: u64) {
        self.pending_zone = Some(PendingChange {
            value,
            tai_of_change,
        });
        self.apply_pending();
    }

    /// Schedule a TAI-UTC delta change
    pub fn set_delta_change(&mut self, value: u16, tai_of_change: u64) {
        self.pending_delta = Some(PendingChange {
            value,
            tai_of_change,
        });
        self.apply_pending();
    }

    /// Advance by elapsed milliseconds. Unknown time does not advance.
    /// Returns the number of whole seconds crossed.
    pub fn advance(&mut self, elapsed_ms: u32) -> u32 {
        if !self.is_known() {
            return 0;
        }

        let total = self.sub_ms + elapsed_ms;
        let seconds = total / 1000;
        self.sub_ms = total % 1000;
        self.tai_seconds = (self.tai_seconds + seconds as u64).min(TAI_SECONDS_LIMIT);

        if seconds > 0 {
            self.apply_pending();
        }
        seconds
    }

    /// UTC seconds since the mesh epoch
    pub fn utc_seconds(&self) -> Option<i64> {
        if !self.is_known() {
            return None;
        }
        let delta = self.tai_utc_delta as i64 - TAI_UTC_DELTA_ZERO as i64;
        Some(self.tai_seconds as i64 - delta)
    }

    /// Zone offset in minutes
    pub fn zone_offset_minutes(&self) -> i64 {
        (self.time_zone_offset as i64 - TIME_ZONE_ZERO as i64) * TIME_ZONE_STEP_MIN
    }

    /// Local civil time, `None` while time is unknown
    pub fn local_datetime(&self) -> Option<NaiveDateTime> {
        let utc = self.utc_seconds()?;
        let local = utc + self.zone_offset_minutes() * 60;
        mesh_epoch()?.checked_add_signed(Duration::seconds(local))
    }

    fn apply_pending(&mut self) {
        if !self.is_known() {
            return;
        }

        if let Some(change) = self.pending_delta {
            if self.tai_seconds >= change.tai_of_change {
                debug!(delta = change.value, "TAI-UTC delta change applied");
                self.tai_utc_delta = change.value;
                self.pending_delta = None;
            }
        }
        if let Some(change) = self.pending_zone {
            if self.tai_seconds >= change.tai_of_change {
                debug!(zone = change.value, "Time zone change applied");
                self.time_zone_offset = change.value;
                self.pending_zone = None;
            }
        }
    }
}

impl Default for TaiClock {
    fn default() -> Self {
        Self::new()
    }
}

/// 2000-01-01T00:00:00
pub fn mesh_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)
}

/// TAI seconds of a local date-time, assuming the given raw delta and zone
pub fn tai_for_local(local: NaiveDateTime, tai_utc_delta: u16, time_zone_offset: u8) -> Option<u64> {
    let since_epoch = local.signed_duration_since(mesh_epoch()?).num_seconds();
    let zone = (time_zone_offset as i64 - TIME_ZONE_ZERO as i64) * TIME_ZONE_STEP_MIN * 60;
    let delta = tai_utc_delta as i64 - TAI_UTC_DELTA_ZERO as i64;
    u64::try_from(since_epoch - zone + delta).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_unknown_time() {
        let mut clock = TaiClock::new();
        assert!(!clock.is_known());
        assert_eq!(clock.advance(5_000), 0);
        assert_eq!(clock.local_datetime(), None);
    }

    #[test]
    fn test_advance_carries_subseconds() {
        let mut clock = TaiClock::new();
        clock.set(1_000, 0, 0, true, TAI_UTC_DELTA_ZERO, TIME_ZONE_ZERO);

        assert_eq!(clock.advance(600), 0);
        assert_eq!(clock.advance(600), 1);
        assert_eq!(clock.tai_seconds(), 1_001);
        assert_eq!(clock.subsecond(), (200 * 256 / 1000) as u8);
    }

    #[test]
    fn test_local_datetime() {
        let mut clock = TaiClock::new();
        // One day and one hour after the epoch, UTC+1h, no leap seconds
        clock.set(86_400 + 3_600, 0, 0, false, TAI_UTC_DELTA_ZERO, TIME_ZONE_ZERO + 4);

        let local = clock.local_datetime().unwrap();
        assert_eq!(local.year(), 2000);
        assert_eq!(local.month(), 1);
        assert_eq!(local.day(), 2);
        assert_eq!(local.hour(), 2);
    }

    #[test]
    fn test_delta_subtracts() {
        let mut clock = TaiClock::new();
        clock.set(100, 0, 0, false, TAI_UTC_DELTA_ZERO + 37, TIME_ZONE_ZERO);
        assert_eq!(clock.utc_seconds(), Some(63));
    }

    #[test]
    fn test_pending_zone_change() {
        let mut clock = TaiClock::new();
        clock.set(1_000, 0, 0, false, TAI_UTC_DELTA_ZERO, TIME_ZONE_ZERO);
        clock.set_zone_change(TIME_ZONE_ZERO + 8, 1_002);
        assert_eq!(clock.time_zone_offset(), TIME_ZONE_ZERO);

        clock.advance(1_000);
        assert!(clock.pending_zone().is_some());
        clock.advance(1_000);
        assert_eq!(clock.time_zone_offset(), TIME_ZONE_ZERO + 8);
        assert!(clock.pending_zone().is_none());
    }

    #[test]
    fn test_tai_for_local_inverse() {
        let mut clock = TaiClock::new();
        clock.set(500_000_000, 0, 0, false, TAI_UTC_DELTA_ZERO + 5, TIME_ZONE_ZERO - 12);
        let local = clock.local_datetime().unwrap();
        assert_eq!(
            tai_for_local(local, clock.tai_utc_delta(), clock.time_zone_offset()),
            Some(500_000_000)
        );
    }
}
