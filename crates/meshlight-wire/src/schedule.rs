//! Scheduler register entry packing
//!
//! One entry is 80 bits packed little-endian, first field in the least
//! significant bits:
//!
//! | bits | field |
//! |---|---|
//! | 4 | index |
//! | 7 | year (0x00-0x63, 0x64 = any) |
//! | 12 | month bitmap |
//! | 5 | day (0 = any) |
//! | 5 | hour (0x18 = any, 0x19 = random) |
//! | 6 | minute (0x3C any, 0x3D every 15, 0x3E every 20, 0x3F random) |
//! | 6 | second (same encoding as minute) |
//! | 7 | day-of-week bitmap |
//! | 4 | action |
//! | 8 | transition time |
//! | 16 | scene number |

use meshlight_core::{MeshError, MeshResult, ScheduleAction, TransitionTime};

/// Packed entry size in octets
pub const SCHEDULE_ENTRY_SIZE: usize = 10;

/// Number of register entries
pub const SCHEDULE_REGISTER_SIZE: usize = 16;

pub const YEAR_ANY: u8 = 0x64;
pub const HOUR_ANY: u8 = 0x18;
pub const HOUR_RANDOM: u8 = 0x19;
pub const MINSEC_ANY: u8 = 0x3C;
pub const MINSEC_EVERY_15: u8 = 0x3D;
pub const MINSEC_EVERY_20: u8 = 0x3E;
pub const MINSEC_RANDOM: u8 = 0x3F;

/// Scheduler register entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub index: u8,
    pub year: u8,
    pub month: u16,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub day_of_week: u8,
    pub action: ScheduleAction,
    pub transition: TransitionTime,
    pub scene: u16,
}

impl ScheduleEntry {
    /// Empty entry: no action
    pub fn empty(index: u8) -> Self {
        ScheduleEntry {
            index,
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            day_of_week: 0,
            action: ScheduleAction::NoAction,
            transition: TransitionTime::IMMEDIATE,
            scene: 0,
        }
    }

    /// Is this entry doing anything?
    pub fn is_active(&self) -> bool {
        self.action != ScheduleAction::NoAction
    }

    /// Decode and validate a packed entry
    pub fn parse(buf: &[u8]) -> MeshResult<Self> {
        if buf.len() != SCHEDULE_ENTRY_SIZE {
            return Err(MeshError::BufferTooShort {
                expected: SCHEDULE_ENTRY_SIZE,
                actual: buf.len(),
            });
        }

        let mut raw = [0u8; 16];
        raw[..SCHEDULE_ENTRY_SIZE].copy_from_slice(buf);
        let mut bits = BitReader(u128::from_le_bytes(raw));

        let index = bits.take(4) as u8;
        let year = bits.take(7) as u8;
        let month = bits.take(12) as u16;
        let day = bits.take(5) as u8;
        let hour = bits.take(5) as u8;
        let minute = bits.take(6) as u8;
        let second = bits.take(6) as u8;
        let day_of_week = bits.take(7) as u8;
        let action = bits.take(4) as u8;
        let transition = TransitionTime(bits.take(8) as u8);
        let scene = bits.take(16) as u16;

        if year > YEAR_ANY {
            return Err(MeshError::ProhibitedValue("schedule year"));
        }
        if hour > HOUR_RANDOM {
            return Err(MeshError::ProhibitedValue("schedule hour"));
        }
        let action =
            ScheduleAction::from_nibble(action).ok_or(MeshError::ProhibitedValue("schedule action"))?;
        if action == ScheduleAction::SceneRecall && scene == 0 {
            return Err(MeshError::ProhibitedValue("schedule scene 0"));
        }

        Ok(ScheduleEntry {
            index,
            year,
            month,
            day,
            hour,
            minute,
            second,
            day_of_week,
            action,
            transition,
            scene,
        })
    }

    /// Pack into the 10-octet wire layout
    pub fn to_bytes(&self) -> [u8; SCHEDULE_ENTRY_SIZE] {
        let mut bits = BitWriter::default();
        bits.put(self.index as u128, 4);
        bits.put(self.year as u128, 7);
        bits.put(self.month as u128, 12);
        bits.put(self.day as u128, 5);
        bits.put(self.hour as u128, 5);
        bits.put(self.minute as u128, 6);
        bits.put(self.second as u128, 6);
        bits.put(self.day_of_week as u128, 7);
        bits.put(self.action.to_nibble() as u128, 4);
        bits.put(self.transition.0 as u128, 8);
        bits.put(self.scene as u128, 16);

        let mut out = [0u8; SCHEDULE_ENTRY_SIZE];
        out.copy_from_slice(&bits.value.to_le_bytes()[..SCHEDULE_ENTRY_SIZE]);
        out
    }
}

struct BitReader(u128);

impl BitReader {
    fn take(&mut self, width: u32) -> u128 {
        let value = self.0 & ((1u128 << width) - 1);
        self.0 >>= width;
        value
    }
}

#[derive(Default)]
struct BitWriter {
    value: u128,
    offset: u32,
}

impl BitWriter {
    fn put(&mut self, field: u128, width: u32) {
        self.value |= (field & ((1u128 << width) - 1)) << self.offset;
        self.offset += width;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScheduleEntry {
        ScheduleEntry {
            index: 3,
            year: YEAR_ANY,
            month: 0x0FFF,
            day: 0,
            hour: 7,
            minute: 30,
            second: 0,
            day_of_week: 0x1F,
            action: ScheduleAction::TurnOn,
            transition: TransitionTime::new(10, 0),
            scene: 0,
        }
    }

    #[test]
    fn test_index_in_low_nibble() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes[0] & 0x0F, 3);
        // year 0x64 occupies bits 4..11
        assert_eq!(bytes[0] >> 4, 0x64 & 0x0F);
        assert_eq!(bytes[1] & 0x07, 0x64 >> 4);
    }

    #[test]
    fn test_entry_pack_parse() {
        let entry = sample();
        assert_eq!(ScheduleEntry::parse(&entry.to_bytes()).unwrap(), entry);
    }

    #[test]
    fn test_scene_number_in_top_octets() {
        let mut entry = sample();
        entry.action = ScheduleAction::SceneRecall;
        entry.scene = 0xBEEF;
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[8..], &[0xEF, 0xBE]);
    }

    #[test]
    fn test_prohibited_values() {
        let mut entry = sample();
        entry.year = 0x65;
        assert!(ScheduleEntry::parse(&entry.to_bytes()).is_err());

        let mut entry = sample();
        entry.hour = 0x1A;
        assert!(ScheduleEntry::parse(&entry.to_bytes()).is_err());

        let mut entry = sample();
        entry.action = ScheduleAction::SceneRecall;
        entry.scene = 0;
        assert!(ScheduleEntry::parse(&entry.to_bytes()).is_err());

        let mut bytes = sample().to_bytes();
        // action nibble sits at bits 52..55
        bytes[6] = (bytes[6] & 0x0F) | (0x05 << 4);
        assert!(ScheduleEntry::parse(&bytes).is_err());
    }

    #[test]
    fn test_wrong_length() {
        assert!(ScheduleEntry::parse(&[0u8; 9]).is_err());
    }
}
