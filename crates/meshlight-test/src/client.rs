//! Client side of the access layer
//!
//! Builds well-formed requests the way a provisioner or a light switch
//! would send them. Each transactional Set takes the next TID, so a
//! retransmission has to reuse the [`Request`] it got back.

use bytes::{BufMut, Bytes, BytesMut};
use meshlight_core::{ElementId, MeshAddress, TransitionParams};
use meshlight_wire::*;

/// Encoded request, not yet addressed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub params: Bytes,
}

impl Request {
    pub fn new(opcode: Opcode, params: impl Into<Bytes>) -> Self {
        Request {
            opcode,
            params: params.into(),
        }
    }

    /// Address the request to `element`, reachable at `dst`
    pub fn to(&self, src: MeshAddress, dst: MeshAddress, element: ElementId) -> InboundMessage {
        InboundMessage::new(self.opcode, src, element, self.params.clone()).with_dst(dst)
    }
}

/// Request builder with its own unicast address and TID counter
#[derive(Clone, Debug)]
pub struct TestClient {
    address: MeshAddress,
    tid: u8,
}

impl TestClient {
    pub fn new(address: MeshAddress) -> Self {
        TestClient { address, tid: 0 }
    }

    /// Start the TID counter at `tid`
    pub fn with_tid(mut self, tid: u8) -> Self {
        self.tid = tid;
        self
    }

    pub fn address(&self) -> MeshAddress {
        self.address
    }

    /// TID the next Set will carry
    pub fn peek_tid(&self) -> u8 {
        self.tid
    }

    fn next_tid(&mut self) -> u8 {
        let tid = self.tid;
        self.tid = self.tid.wrapping_add(1);
        tid
    }

    fn set(&mut self, opcode: Opcode, value: impl FnOnce(&mut BytesMut), transition: Option<TransitionParams>) -> Request {
        let mut buf = BytesMut::with_capacity(8);
        value(&mut buf);
        buf.put_u8(self.next_tid());
        if let Some(params) = transition {
            buf.put_u8(params.transition.0);
            buf.put_u8(params.delay.0);
        }
        Request::new(opcode, buf.freeze())
    }

    pub fn get(&self, opcode: Opcode) -> Request {
        Request::new(opcode, Bytes::new())
    }

    pub fn onoff_set(&mut self, on: bool, transition: Option<TransitionParams>) -> Request {
        self.set(GEN_ONOFF_SET, |b| b.put_u8(on as u8), transition)
    }

    pub fn onoff_set_unack(&mut self, on: bool, transition: Option<TransitionParams>) -> Request {
        self.set(GEN_ONOFF_SET_UNACK, |b| b.put_u8(on as u8), transition)
    }

    pub fn level_set(&mut self, level: i16, transition: Option<TransitionParams>) -> Request {
        self.set(GEN_LEVEL_SET, |b| b.put_i16_le(level), transition)
    }

    /// Delta Set; `continue_transaction` keeps the current TID so the delta
    /// stays relative to the transaction's initial level
    pub fn delta_set(&mut self, delta: i32, continue_transaction: bool, transition: Option<TransitionParams>) -> Request {
        if continue_transaction {
            self.tid = self.tid.wrapping_sub(1);
        }
        self.set(GEN_DELTA_SET, |b| b.put_i32_le(delta), transition)
    }

    pub fn move_set(&mut self, delta: i16, transition: Option<TransitionParams>) -> Request {
        self.set(GEN_MOVE_SET, |b| b.put_i16_le(delta), transition)
    }

    pub fn default_transition_set(&self, value: meshlight_core::TransitionTime) -> Request {
        Request::new(GEN_DEF_TRANS_SET, vec![value.0])
    }

    pub fn on_power_up_set(&self, value: OnPowerUp) -> Request {
        Request::new(GEN_ON_POWER_UP_SET, vec![value.to_byte()])
    }

    pub fn power_set(&mut self, power: u16, transition: Option<TransitionParams>) -> Request {
        self.set(GEN_POWER_SET, |b| b.put_u16_le(power), transition)
    }

    pub fn lightness_set(&mut self, lightness: u16, transition: Option<TransitionParams>) -> Request {
        self.set(LIGHT_LIGHTNESS_SET, |b| b.put_u16_le(lightness), transition)
    }

    pub fn lightness_linear_set(&mut self, linear: u16, transition: Option<TransitionParams>) -> Request {
        self.set(LIGHT_LIGHTNESS_LINEAR_SET, |b| b.put_u16_le(linear), transition)
    }

    pub fn lightness_range_set(&self, min: u16, max: u16) -> Request {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u16_le(min);
        buf.put_u16_le(max);
        Request::new(LIGHT_LIGHTNESS_RANGE_SET, buf.freeze())
    }

    pub fn hsl_set(&mut self, value: HslValue, transition: Option<TransitionParams>) -> Request {
        self.set(
            LIGHT_HSL_SET,
            |b| {
                b.put_u16_le(value.lightness);
                b.put_u16_le(value.hue);
                b.put_u16_le(value.saturation);
            },
            transition,
        )
    }

    pub fn hue_set(&mut self, hue: u16, transition: Option<TransitionParams>) -> Request {
        self.set(LIGHT_HSL_HUE_SET, |b| b.put_u16_le(hue), transition)
    }

    pub fn saturation_set(&mut self, saturation: u16, transition: Option<TransitionParams>) -> Request {
        self.set(LIGHT_HSL_SAT_SET, |b| b.put_u16_le(saturation), transition)
    }

    pub fn scene_store(&self, scene: u16) -> Request {
        Request::new(SCENE_STORE, scene.to_le_bytes().to_vec())
    }

    pub fn scene_recall(&mut self, scene: u16, transition: Option<TransitionParams>) -> Request {
        self.set(SCENE_RECALL, |b| b.put_u16_le(scene), transition)
    }

    pub fn scene_delete(&self, scene: u16) -> Request {
        Request::new(SCENE_DELETE, scene.to_le_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlight_core::{Delay, TransitionTime};

    #[test]
    fn test_tid_advances_per_set() {
        let mut client = TestClient::new(MeshAddress(0x0002));
        let a = client.onoff_set(true, None);
        let b = client.onoff_set(true, None);
        assert_eq!(&a.params[..], &[1, 0]);
        assert_eq!(&b.params[..], &[1, 1]);
        assert_eq!(client.peek_tid(), 2);
    }

    #[test]
    fn test_set_with_transition_decodes() {
        let mut client = TestClient::new(MeshAddress(0x0002));
        let transition = TransitionParams::new(TransitionTime::new(10, 0), Delay(4));
        let request = client.level_set(-200, Some(transition));
        match ModelMessage::decode(request.opcode, &request.params).unwrap() {
            ModelMessage::LevelSet(set) => {
                assert_eq!(set.value, -200);
                assert_eq!(set.transition, Some(transition));
                assert!(set.ack);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delta_continuation_reuses_tid() {
        let mut client = TestClient::new(MeshAddress(0x0002));
        let first = client.delta_set(100, false, None);
        let second = client.delta_set(200, true, None);
        assert_eq!(first.params[4], second.params[4]);
    }

    #[test]
    fn test_hsl_set_layout() {
        let mut client = TestClient::new(MeshAddress(0x0002));
        let value = HslValue {
            lightness: 0x1234,
            hue: 0x5678,
            saturation: 0x9ABC,
        };
        let request = client.hsl_set(value, None);
        assert_eq!(&request.params[..], &[0x34, 0x12, 0x78, 0x56, 0xBC, 0x9A, 0]);
    }
}
