//! Scheduler server
//!
//! Sixteen register entries matched against local civil time once per
//! second. Random hour/minute/second fields are rolled from a seeded RNG
//! when an entry is written and again after it fires, so a simulation with
//! a fixed seed is reproducible.

use chrono::{Datelike, NaiveDateTime, Timelike};
use meshlight_core::{ElementId, ModelEvent};
use meshlight_state::{AckContext, DatasetGroup, DatasetId};
use meshlight_wire::{
    ModelMessage, ScheduleEntry, StatusMessage, HOUR_ANY, HOUR_RANDOM, MINSEC_ANY, MINSEC_EVERY_15,
    MINSEC_EVERY_20, MINSEC_RANDOM, SCHEDULE_ENTRY_SIZE, SCHEDULE_REGISTER_SIZE, YEAR_ANY,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::{ModelCtx, PublishState};

/// Concrete values standing in for "random" fields of one entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Rolled {
    hour: u8,
    minute: u8,
    second: u8,
}

/// Scheduler (+ Setup) server
#[derive(Clone, Debug)]
pub struct SchedulerServer {
    element: ElementId,
    pub publish: PublishState,
    entries: [ScheduleEntry; SCHEDULE_REGISTER_SIZE],
    rolled: [Rolled; SCHEDULE_REGISTER_SIZE],
    /// Local second an entry last fired in
    last_fired: [Option<NaiveDateTime>; SCHEDULE_REGISTER_SIZE],
    rng: StdRng,
}

impl SchedulerServer {
    pub fn new(element: ElementId, seed: u64) -> Self {
        SchedulerServer {
            element,
            publish: PublishState::disabled(),
            entries: std::array::from_fn(|i| ScheduleEntry::empty(i as u8)),
            rolled: [Rolled::default(); SCHEDULE_REGISTER_SIZE],
            last_fired: [None; SCHEDULE_REGISTER_SIZE],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn entry(&self, index: u8) -> Option<&ScheduleEntry> {
        self.entries.get(index as usize)
    }

    /// Bit `i` set when entry `i` has an action
    pub fn bitmap(&self) -> u16 {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_active())
            .fold(0, |bits, (i, _)| bits | (1 << i))
    }

    fn dataset(&self) -> DatasetId {
        DatasetId::new(DatasetGroup::Scheduler, self.element)
    }

    pub fn handle(&mut self, ctx: &mut ModelCtx<'_>, ack: AckContext, msg: &ModelMessage) {
        match msg {
            ModelMessage::SchedulerGet => {
                ctx.reply(self.element, ack, StatusMessage::Scheduler { bitmap: self.bitmap() });
            }
            ModelMessage::SchedulerActionGet { index } => match self.entry(*index) {
                Some(entry) => ctx.reply(self.element, ack, StatusMessage::SchedulerAction(*entry)),
                None => debug!(index, "scheduler index out of range"),
            },
            ModelMessage::SchedulerActionSet { entry, ack: ack_requested } => {
                if !self.set_entry(ctx, *entry) {
                    return;
                }
                let status = StatusMessage::SchedulerAction(*entry);
                if *ack_requested {
                    ctx.reply(self.element, ack, status.clone());
                }
                ctx.publish(self.element, &mut self.publish, status, false);
            }
            other => debug!(element = %self.element, ?other, "not a Scheduler message"),
        }
    }

    /// Write one register entry; false when the index is out of range
    pub fn set_entry(&mut self, ctx: &mut ModelCtx<'_>, entry: ScheduleEntry) -> bool {
        let slot = entry.index as usize;
        if slot >= SCHEDULE_REGISTER_SIZE {
            return false;
        }
        self.entries[slot] = entry;
        self.last_fired[slot] = None;
        self.reroll(slot);
        self.persist(ctx);
        ctx.emit(ModelEvent::ScheduleUpdated {
            element: self.element,
            index: entry.index,
        });
        true
    }

    /// Entries due at local time `now`
    pub fn evaluate(&mut self, now: NaiveDateTime) -> Vec<u8> {
        let now = now.with_nanosecond(0).unwrap_or(now);
        let mut due = Vec::new();
        for slot in 0..SCHEDULE_REGISTER_SIZE {
            let entry = &self.entries[slot];
            if !entry.is_active() || self.last_fired[slot] == Some(now) {
                continue;
            }
            if matches(entry, self.rolled[slot], now) {
                self.last_fired[slot] = Some(now);
                due.push(slot as u8);
            }
        }
        due
    }

    /// Fire entry `index`; `None` for an out-of-range index or an empty entry
    pub fn trigger(&mut self, ctx: &mut ModelCtx<'_>, index: u8) -> Option<ScheduleEntry> {
        let slot = index as usize;
        let entry = *self.entries.get(slot)?;
        if !entry.is_active() {
            debug!(index, "no scheduled action to fire");
            return None;
        }
        info!(element = %self.element, index, action = ?entry.action, "schedule fired");
        self.reroll(slot);
        ctx.emit(ModelEvent::ScheduleFired {
            element: self.element,
            index,
            action: entry.action,
        });
        Some(entry)
    }

    /// Reset entry `index` to "no action"; true when something was cleared
    pub fn clear_event(&mut self, ctx: &mut ModelCtx<'_>, index: u8) -> bool {
        let slot = index as usize;
        match self.entries.get(slot) {
            Some(entry) if entry.is_active() => {
                self.set_entry(ctx, ScheduleEntry::empty(index));
                true
            }
            _ => false,
        }
    }

    fn reroll(&mut self, slot: usize) {
        self.rolled[slot] = Rolled {
            hour: self.rng.gen_range(0..24),
            minute: self.rng.gen_range(0..60),
            second: self.rng.gen_range(0..60),
        };
    }

    pub fn restore(&mut self, ctx: &mut ModelCtx<'_>) {
        let Some(data) = ctx.load(self.dataset()) else {
            return;
        };
        if data.len() != SCHEDULE_ENTRY_SIZE * SCHEDULE_REGISTER_SIZE {
            debug!(len = data.len(), "discarding scheduler dataset");
            return;
        }
        for (slot, chunk) in data.chunks_exact(SCHEDULE_ENTRY_SIZE).enumerate() {
            match ScheduleEntry::parse(chunk) {
                Ok(entry) if entry.index as usize == slot => {
                    self.entries[slot] = entry;
                    self.reroll(slot);
                }
                Ok(_) | Err(_) => debug!(slot, "discarding scheduler entry"),
            }
        }
    }

    fn persist(&self, ctx: &mut ModelCtx<'_>) {
        let data: Vec<u8> = self.entries.iter().flat_map(|e| e.to_bytes()).collect();
        ctx.save(self.dataset(), &data);
    }
}

fn matches(entry: &ScheduleEntry, rolled: Rolled, now: NaiveDateTime) -> bool {
    let year_ok = entry.year == YEAR_ANY || (now.year().rem_euclid(100)) as u8 == entry.year;
    let month_ok = entry.month & (1 << now.month0()) != 0;
    let day_ok = entry.day == 0 || entry.day as u32 == now.day();
    let hour_ok = match entry.hour {
        HOUR_ANY => true,
        HOUR_RANDOM => rolled.hour as u32 == now.hour(),
        hour => hour as u32 == now.hour(),
    };
    let weekday_ok = entry.day_of_week & (1 << now.weekday().num_days_from_monday()) != 0;

    year_ok
        && month_ok
        && day_ok
        && hour_ok
        && minsec_matches(entry.minute, rolled.minute, now.minute())
        && minsec_matches(entry.second, rolled.second, now.second())
        && weekday_ok
}

fn minsec_matches(field: u8, rolled: u8, value: u32) -> bool {
    match field {
        MINSEC_ANY => true,
        MINSEC_EVERY_15 => value % 15 == 0,
        MINSEC_EVERY_20 => value % 20 == 0,
        MINSEC_RANDOM => rolled as u32 == value,
        exact => exact as u32 == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{ack, Harness};
    use chrono::NaiveDate;
    use meshlight_core::{ScheduleAction, TransitionTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        // 2024-06-05 is a Wednesday
        NaiveDate::from_ymd_opt(2024, 6, 5)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("valid date")
    }

    fn every_day(index: u8, hour: u8, minute: u8, second: u8) -> ScheduleEntry {
        ScheduleEntry {
            index,
            year: YEAR_ANY,
            month: 0x0FFF,
            day: 0,
            hour,
            minute,
            second,
            day_of_week: 0x7F,
            action: ScheduleAction::TurnOn,
            transition: TransitionTime::IMMEDIATE,
            scene: 0,
        }
    }

    #[test]
    fn test_set_and_bitmap() {
        let mut h = Harness::new();
        let mut server = SchedulerServer::new(ElementId(0), 1);
        server.handle(
            &mut h.ctx(),
            ack(),
            &ModelMessage::SchedulerActionSet {
                entry: every_day(3, 7, 30, 0),
                ack: true,
            },
        );
        assert_eq!(server.bitmap(), 1 << 3);
        assert_eq!(h.outbox.len(), 1);
        assert!(h.events.contains(&ModelEvent::ScheduleUpdated {
            element: ElementId(0),
            index: 3
        }));
    }

    #[test]
    fn test_exact_match_fires_once_per_second() {
        let mut h = Harness::new();
        let mut server = SchedulerServer::new(ElementId(0), 1);
        server.set_entry(&mut h.ctx(), every_day(0, 7, 30, 0));

        assert!(server.evaluate(at(7, 29, 59)).is_empty());
        assert_eq!(server.evaluate(at(7, 30, 0)), vec![0]);
        assert!(server.evaluate(at(7, 30, 0)).is_empty());
        assert!(server.evaluate(at(7, 30, 1)).is_empty());
    }

    #[test]
    fn test_every_fifteen_seconds() {
        let mut h = Harness::new();
        let mut server = SchedulerServer::new(ElementId(0), 1);
        server.set_entry(&mut h.ctx(), every_day(1, HOUR_ANY, MINSEC_ANY, MINSEC_EVERY_15));
        let fired = (0..60).filter(|s| !server.evaluate(at(12, 0, *s)).is_empty()).count();
        assert_eq!(fired, 4);
    }

    #[test]
    fn test_weekday_and_month_filters() {
        let mut h = Harness::new();
        let mut server = SchedulerServer::new(ElementId(0), 1);
        let mut entry = every_day(2, HOUR_ANY, MINSEC_ANY, MINSEC_ANY);
        entry.day_of_week = 0x01; // Monday only
        server.set_entry(&mut h.ctx(), entry);
        assert!(server.evaluate(at(10, 0, 0)).is_empty());

        entry.day_of_week = 0x04; // Wednesday
        entry.month = 1 << 6; // July
        server.set_entry(&mut h.ctx(), entry);
        assert!(server.evaluate(at(10, 0, 0)).is_empty());
    }

    #[test]
    fn test_random_is_seeded() {
        let mut h = Harness::new();
        let mut a = SchedulerServer::new(ElementId(0), 42);
        let mut b = SchedulerServer::new(ElementId(0), 42);
        let entry = every_day(0, HOUR_RANDOM, MINSEC_RANDOM, MINSEC_RANDOM);
        a.set_entry(&mut h.ctx(), entry);
        b.set_entry(&mut h.ctx(), entry);
        assert_eq!(a.rolled[0], b.rolled[0]);
    }

    #[test]
    fn test_trigger_empty_is_noop() {
        let mut h = Harness::new();
        let mut server = SchedulerServer::new(ElementId(0), 1);
        assert!(server.trigger(&mut h.ctx(), 3).is_none());
        assert!(server.trigger(&mut h.ctx(), 16).is_none());
        assert!(!server.clear_event(&mut h.ctx(), 3));
        assert!(h.events.is_empty());

        server.set_entry(&mut h.ctx(), every_day(3, 1, 2, 3));
        assert!(server.trigger(&mut h.ctx(), 3).is_some());
        assert!(server.clear_event(&mut h.ctx(), 3));
        assert_eq!(server.bitmap(), 0);
        assert!(server.trigger(&mut h.ctx(), 3).is_none());
    }

    #[test]
    fn test_register_persists() {
        let mut h = Harness::new();
        let mut server = SchedulerServer::new(ElementId(0), 1);
        server.set_entry(&mut h.ctx(), every_day(5, 6, 0, 0));

        let mut rebooted = SchedulerServer::new(ElementId(0), 1);
        rebooted.restore(&mut h.ctx());
        assert_eq!(rebooted.entry(5), Some(&every_day(5, 6, 0, 0)));
        assert_eq!(rebooted.bitmap(), 1 << 5);
    }
}
