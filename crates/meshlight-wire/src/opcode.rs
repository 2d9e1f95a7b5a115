//! Opcode definitions
//!
//! Access layer opcodes come in three sizes:
//! - 1 octet: 0b0xxxxxxx (0x7F reserved)
//! - 2 octets: 0b10xxxxxx xxxxxxxx
//! - 3 octets: 0b11xxxxxx + 16-bit company identifier

use bytes::{BufMut, BytesMut};
use meshlight_core::{MeshError, MeshResult};

/// Access layer opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Opcode(pub u32);

impl Opcode {
    /// Encoded size in octets
    pub fn len(self) -> usize {
        if self.0 <= 0x7E {
            1
        } else if self.0 <= 0xFFFF {
            2
        } else {
            3
        }
    }

    /// Parse an opcode from the front of an access payload.
    /// Returns the opcode and the number of octets consumed.
    pub fn parse(buf: &[u8]) -> MeshResult<(Opcode, usize)> {
        let first = *buf.first().ok_or(MeshError::BufferTooShort {
            expected: 1,
            actual: 0,
        })?;

        let size = match first >> 6 {
            0b00 | 0b01 => {
                if first == 0x7F {
                    return Err(MeshError::ReservedField("opcode 0x7f"));
                }
                1
            }
            0b10 => 2,
            _ => 3,
        };

        if buf.len() < size {
            return Err(MeshError::BufferTooShort {
                expected: size,
                actual: buf.len(),
            });
        }

        let value = buf[..size]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);
        Ok((Opcode(value), size))
    }

    /// Write the opcode (big-endian, as transmitted)
    pub fn write(self, buf: &mut BytesMut) {
        match self.len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(self.0 as u16),
            _ => {
                buf.put_u8((self.0 >> 16) as u8);
                buf.put_u16(self.0 as u16);
            }
        }
    }
}

// Generic OnOff
pub const GEN_ONOFF_GET: Opcode = Opcode(0x8201);
pub const GEN_ONOFF_SET: Opcode = Opcode(0x8202);
pub const GEN_ONOFF_SET_UNACK: Opcode = Opcode(0x8203);
pub const GEN_ONOFF_STATUS: Opcode = Opcode(0x8204);

// Generic Level
pub const GEN_LEVEL_GET: Opcode = Opcode(0x8205);
pub const GEN_LEVEL_SET: Opcode = Opcode(0x8206);
pub const GEN_LEVEL_SET_UNACK: Opcode = Opcode(0x8207);
pub const GEN_LEVEL_STATUS: Opcode = Opcode(0x8208);
pub const GEN_DELTA_SET: Opcode = Opcode(0x8209);
pub const GEN_DELTA_SET_UNACK: Opcode = Opcode(0x820A);
pub const GEN_MOVE_SET: Opcode = Opcode(0x820B);
pub const GEN_MOVE_SET_UNACK: Opcode = Opcode(0x820C);

// Generic Default Transition Time
pub const GEN_DEF_TRANS_GET: Opcode = Opcode(0x820D);
pub const GEN_DEF_TRANS_SET: Opcode = Opcode(0x820E);
pub const GEN_DEF_TRANS_SET_UNACK: Opcode = Opcode(0x820F);
pub const GEN_DEF_TRANS_STATUS: Opcode = Opcode(0x8210);

// Generic Power OnOff
pub const GEN_ON_POWER_UP_GET: Opcode = Opcode(0x8211);
pub const GEN_ON_POWER_UP_STATUS: Opcode = Opcode(0x8212);
pub const GEN_ON_POWER_UP_SET: Opcode = Opcode(0x8213);
pub const GEN_ON_POWER_UP_SET_UNACK: Opcode = Opcode(0x8214);

// Generic Power Level
pub const GEN_POWER_GET: Opcode = Opcode(0x8215);
pub const GEN_POWER_SET: Opcode = Opcode(0x8216);
pub const GEN_POWER_SET_UNACK: Opcode = Opcode(0x8217);
pub const GEN_POWER_STATUS: Opcode = Opcode(0x8218);
pub const GEN_POWER_LAST_GET: Opcode = Opcode(0x8219);
pub const GEN_POWER_LAST_STATUS: Opcode = Opcode(0x821A);
pub const GEN_POWER_DEFAULT_GET: Opcode = Opcode(0x821B);
pub const GEN_POWER_DEFAULT_STATUS: Opcode = Opcode(0x821C);
pub const GEN_POWER_RANGE_GET: Opcode = Opcode(0x821D);
pub const GEN_POWER_RANGE_STATUS: Opcode = Opcode(0x821E);
pub const GEN_POWER_DEFAULT_SET: Opcode = Opcode(0x821F);
pub const GEN_POWER_DEFAULT_SET_UNACK: Opcode = Opcode(0x8220);
pub const GEN_POWER_RANGE_SET: Opcode = Opcode(0x8221);
pub const GEN_POWER_RANGE_SET_UNACK: Opcode = Opcode(0x8222);

// Time
pub const TIME_GET: Opcode = Opcode(0x8237);
pub const TIME_SET: Opcode = Opcode(0x5C);
pub const TIME_STATUS: Opcode = Opcode(0x5D);
pub const TIME_ROLE_GET: Opcode = Opcode(0x8238);
pub const TIME_ROLE_SET: Opcode = Opcode(0x8239);
pub const TIME_ROLE_STATUS: Opcode = Opcode(0x823A);
pub const TIME_ZONE_GET: Opcode = Opcode(0x823B);
pub const TIME_ZONE_SET: Opcode = Opcode(0x823C);
pub const TIME_ZONE_STATUS: Opcode = Opcode(0x823D);
pub const TAI_UTC_DELTA_GET: Opcode = Opcode(0x823E);
pub const TAI_UTC_DELTA_SET: Opcode = Opcode(0x823F);
pub const TAI_UTC_DELTA_STATUS: Opcode = Opcode(0x8240);

// Scenes
pub const SCENE_GET: Opcode = Opcode(0x8241);
pub const SCENE_RECALL: Opcode = Opcode(0x8242);
pub const SCENE_RECALL_UNACK: Opcode = Opcode(0x8243);
pub const SCENE_STATUS: Opcode = Opcode(0x5E);
pub const SCENE_REGISTER_GET: Opcode = Opcode(0x8244);
pub const SCENE_REGISTER_STATUS: Opcode = Opcode(0x8245);
pub const SCENE_STORE: Opcode = Opcode(0x8246);
pub const SCENE_STORE_UNACK: Opcode = Opcode(0x8247);
pub const SCENE_DELETE: Opcode = Opcode(0x829E);
pub const SCENE_DELETE_UNACK: Opcode = Opcode(0x829F);

// Scheduler
pub const SCHEDULER_ACTION_GET: Opcode = Opcode(0x8248);
pub const SCHEDULER_ACTION_STATUS: Opcode = Opcode(0x5F);
pub const SCHEDULER_GET: Opcode = Opcode(0x8249);
pub const SCHEDULER_STATUS: Opcode = Opcode(0x824A);
pub const SCHEDULER_ACTION_SET: Opcode = Opcode(0x60);
pub const SCHEDULER_ACTION_SET_UNACK: Opcode = Opcode(0x61);

// Light Lightness
pub const LIGHT_LIGHTNESS_GET: Opcode = Opcode(0x824B);
pub const LIGHT_LIGHTNESS_SET: Opcode = Opcode(0x824C);
pub const LIGHT_LIGHTNESS_SET_UNACK: Opcode = Opcode(0x824D);
pub const LIGHT_LIGHTNESS_STATUS: Opcode = Opcode(0x824E);
pub const LIGHT_LIGHTNESS_LINEAR_GET: Opcode = Opcode(0x824F);
pub const LIGHT_LIGHTNESS_LINEAR_SET: Opcode = Opcode(0x8250);
pub const LIGHT_LIGHTNESS_LINEAR_SET_UNACK: Opcode = Opcode(0x8251);
pub const LIGHT_LIGHTNESS_LINEAR_STATUS: Opcode = Opcode(0x8252);
pub const LIGHT_LIGHTNESS_LAST_GET: Opcode = Opcode(0x8253);
pub const LIGHT_LIGHTNESS_LAST_STATUS: Opcode = Opcode(0x8254);
pub const LIGHT_LIGHTNESS_DEFAULT_GET: Opcode = Opcode(0x8255);
pub const LIGHT_LIGHTNESS_DEFAULT_STATUS: Opcode = Opcode(0x8256);
pub const LIGHT_LIGHTNESS_RANGE_GET: Opcode = Opcode(0x8257);
pub const LIGHT_LIGHTNESS_RANGE_STATUS: Opcode = Opcode(0x8258);
pub const LIGHT_LIGHTNESS_DEFAULT_SET: Opcode = Opcode(0x8259);
pub const LIGHT_LIGHTNESS_DEFAULT_SET_UNACK: Opcode = Opcode(0x825A);
pub const LIGHT_LIGHTNESS_RANGE_SET: Opcode = Opcode(0x825B);
pub const LIGHT_LIGHTNESS_RANGE_SET_UNACK: Opcode = Opcode(0x825C);

// Light HSL
pub const LIGHT_HSL_GET: Opcode = Opcode(0x826D);
pub const LIGHT_HSL_HUE_GET: Opcode = Opcode(0x826E);
pub const LIGHT_HSL_HUE_SET: Opcode = Opcode(0x826F);
pub const LIGHT_HSL_HUE_SET_UNACK: Opcode = Opcode(0x8270);
pub const LIGHT_HSL_HUE_STATUS: Opcode = Opcode(0x8271);
pub const LIGHT_HSL_SAT_GET: Opcode = Opcode(0x8272);
pub const LIGHT_HSL_SAT_SET: Opcode = Opcode(0x8273);
pub const LIGHT_HSL_SAT_SET_UNACK: Opcode = Opcode(0x8274);
pub const LIGHT_HSL_SAT_STATUS: Opcode = Opcode(0x8275);
pub const LIGHT_HSL_SET: Opcode = Opcode(0x8276);
pub const LIGHT_HSL_SET_UNACK: Opcode = Opcode(0x8277);
pub const LIGHT_HSL_STATUS: Opcode = Opcode(0x8278);
pub const LIGHT_HSL_TARGET_GET: Opcode = Opcode(0x8279);
pub const LIGHT_HSL_TARGET_STATUS: Opcode = Opcode(0x827A);
pub const LIGHT_HSL_DEFAULT_GET: Opcode = Opcode(0x827B);
pub const LIGHT_HSL_DEFAULT_STATUS: Opcode = Opcode(0x827C);
pub const LIGHT_HSL_RANGE_GET: Opcode = Opcode(0x827D);
pub const LIGHT_HSL_RANGE_STATUS: Opcode = Opcode(0x827E);
pub const LIGHT_HSL_DEFAULT_SET: Opcode = Opcode(0x827F);
pub const LIGHT_HSL_DEFAULT_SET_UNACK: Opcode = Opcode(0x8280);
pub const LIGHT_HSL_RANGE_SET: Opcode = Opcode(0x8281);
pub const LIGHT_HSL_RANGE_SET_UNACK: Opcode = Opcode(0x8282);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_sizes() {
        assert_eq!(SCENE_STATUS.len(), 1);
        assert_eq!(GEN_ONOFF_GET.len(), 2);
        assert_eq!(Opcode(0xC0_1234).len(), 3);
    }

    #[test]
    fn test_opcode_parse() {
        let (op, used) = Opcode::parse(&[0x82, 0x02, 0x01]).unwrap();
        assert_eq!(op, GEN_ONOFF_SET);
        assert_eq!(used, 2);

        let (op, used) = Opcode::parse(&[0x5E, 0x00]).unwrap();
        assert_eq!(op, SCENE_STATUS);
        assert_eq!(used, 1);

        let (op, used) = Opcode::parse(&[0xC1, 0x59, 0x00]).unwrap();
        assert_eq!(op, Opcode(0xC15900));
        assert_eq!(used, 3);
    }

    #[test]
    fn test_opcode_parse_errors() {
        assert!(Opcode::parse(&[]).is_err());
        assert!(Opcode::parse(&[0x7F]).is_err());
        assert!(Opcode::parse(&[0x82]).is_err());
    }

    #[test]
    fn test_opcode_write() {
        let mut buf = BytesMut::new();
        GEN_LEVEL_STATUS.write(&mut buf);
        SCENE_STATUS.write(&mut buf);
        assert_eq!(&buf[..], &[0x82, 0x08, 0x5E]);
    }
}
