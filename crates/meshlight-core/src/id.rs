//! Identity types for the mesh model engine
//!
//! Addresses follow the mesh address space layout: unassigned, unicast,
//! virtual and group ranges packed into a single 16-bit value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element index - dense, assigned at configuration load
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ElementId(pub u8);

impl ElementId {
    pub const PRIMARY: ElementId = ElementId(0);

    #[inline]
    pub fn new(index: u8) -> Self {
        ElementId(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Element following this one (used for HSL sub-elements)
    #[inline]
    pub fn next(self) -> ElementId {
        ElementId(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mesh address (16-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MeshAddress(pub u16);

impl MeshAddress {
    pub const UNASSIGNED: MeshAddress = MeshAddress(0x0000);
    pub const ALL_NODES: MeshAddress = MeshAddress(0xFFFF);

    #[inline]
    pub fn new(addr: u16) -> Self {
        MeshAddress(addr)
    }

    #[inline]
    pub fn is_unassigned(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_unicast(self) -> bool {
        (0x0001..=0x7FFF).contains(&self.0)
    }

    #[inline]
    pub fn is_virtual(self) -> bool {
        (0x8000..=0xBFFF).contains(&self.0)
    }

    #[inline]
    pub fn is_group(self) -> bool {
        self.0 >= 0xC000
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        MeshAddress(u16::from_le_bytes(bytes))
    }
}

impl fmt::Debug for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({:04x})", self.0)
    }
}

impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Application key index (12 significant bits)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub struct AppKeyIndex(pub u16);

impl AppKeyIndex {
    #[inline]
    pub fn new(index: u16) -> Self {
        AppKeyIndex(index & 0x0FFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_ranges() {
        assert!(MeshAddress::UNASSIGNED.is_unassigned());
        assert!(MeshAddress::new(0x0001).is_unicast());
        assert!(MeshAddress::new(0x7FFF).is_unicast());
        assert!(MeshAddress::new(0x8000).is_virtual());
        assert!(MeshAddress::new(0xC000).is_group());
        assert!(MeshAddress::ALL_NODES.is_group());
        assert!(!MeshAddress::new(0xC001).is_unicast());
    }

    #[test]
    fn test_address_bytes_little_endian() {
        let addr = MeshAddress::new(0x1234);
        assert_eq!(addr.to_bytes(), [0x34, 0x12]);
        assert_eq!(MeshAddress::from_bytes([0x34, 0x12]), addr);
    }

    #[test]
    fn test_app_key_index_masked() {
        assert_eq!(AppKeyIndex::new(0xF123).0, 0x0123);
    }
}
