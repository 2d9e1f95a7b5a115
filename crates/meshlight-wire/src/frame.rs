//! Inbound and outbound access message records
//!
//! The transport hands the engine already-decrypted, already-addressed
//! messages; the engine hands back records of the same shape.

use bytes::{Bytes, BytesMut};
use meshlight_core::{AppKeyIndex, ElementId, MeshAddress, MeshResult};

use crate::Opcode;

/// Default TTL marker: use the node's configured default
pub const TTL_DEFAULT: u8 = 0xFF;

/// Maximum access payload (opcode + parameters) for a segmented message
pub const MAX_ACCESS_PAYLOAD: usize = 380;

/// Message delivered by the transport layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub opcode: Opcode,
    /// Originating element address
    pub src: MeshAddress,
    /// Destination address (unicast, group or virtual)
    pub dst: MeshAddress,
    /// Element the destination resolved to
    pub element: ElementId,
    pub app_key_index: AppKeyIndex,
    pub ttl: u8,
    /// Opcode-specific parameters
    pub params: Bytes,
}

impl InboundMessage {
    pub fn new(opcode: Opcode, src: MeshAddress, element: ElementId, params: impl Into<Bytes>) -> Self {
        InboundMessage {
            opcode,
            src,
            dst: MeshAddress::UNASSIGNED,
            element,
            app_key_index: AppKeyIndex::default(),
            ttl: TTL_DEFAULT,
            params: params.into(),
        }
    }

    /// Set the destination address
    pub fn with_dst(mut self, dst: MeshAddress) -> Self {
        self.dst = dst;
        self
    }

    /// Set the application key index
    pub fn with_app_key(mut self, index: AppKeyIndex) -> Self {
        self.app_key_index = index;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Build from a raw access payload (opcode followed by parameters)
    pub fn from_access_payload(
        payload: &[u8],
        src: MeshAddress,
        dst: MeshAddress,
        element: ElementId,
        app_key_index: AppKeyIndex,
        ttl: u8,
    ) -> MeshResult<Self> {
        let (opcode, used) = Opcode::parse(payload)?;
        Ok(InboundMessage {
            opcode,
            src,
            dst,
            element,
            app_key_index,
            ttl,
            params: Bytes::copy_from_slice(&payload[used..]),
        })
    }

    /// Was the message addressed to a unicast address?
    pub fn is_unicast(&self) -> bool {
        self.dst.is_unicast() || self.dst.is_unassigned()
    }
}

/// Where an outbound message goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Reply to the sender of a request
    Reply(MeshAddress),
    /// Publication to the model's configured publish address
    Publish(MeshAddress),
}

impl Destination {
    pub fn address(self) -> MeshAddress {
        match self {
            Destination::Reply(addr) | Destination::Publish(addr) => addr,
        }
    }
}

/// Message handed back to the transport layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub opcode: Opcode,
    /// Element the message originates from
    pub element: ElementId,
    pub dst: Destination,
    pub app_key_index: AppKeyIndex,
    pub ttl: u8,
    pub params: Bytes,
}

impl OutboundMessage {
    /// Serialize opcode and parameters into an access payload
    pub fn access_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.opcode.len() + self.params.len());
        self.opcode.write(&mut buf);
        buf.extend_from_slice(&self.params);
        buf.freeze()
    }

    pub fn is_publication(&self) -> bool {
        matches!(self.dst, Destination::Publish(_))
    }
}
