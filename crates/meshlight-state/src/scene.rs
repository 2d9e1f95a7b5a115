//! Scene register
//!
//! Maps scene numbers to register slots. Slot `i` corresponds to snapshot
//! slot `i` of every scene-capable state descriptor on the element.

use meshlight_core::{MeshError, MeshResult};
use thiserror::Error;

/// Scene number 0 is prohibited
pub const SCENE_PROHIBITED: u16 = 0x0000;

/// Scene register failures that map onto status codes
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneError {
    #[error("Scene register full")]
    RegisterFull,
    #[error("Scene not found")]
    NotFound,
}

/// Fixed-capacity scene register
#[derive(Clone, Debug)]
pub struct SceneRegister {
    /// Scene number per slot, 0 = free
    slots: Vec<u16>,
    /// Scene currently shown, 0 = none
    current: u16,
    /// Scene being recalled while a transition runs, 0 = none
    target: u16,
}

impl SceneRegister {
    pub fn new(capacity: usize) -> Self {
        SceneRegister {
            slots: vec![SCENE_PROHIBITED; capacity],
            current: SCENE_PROHIBITED,
            target: SCENE_PROHIBITED,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot holding `scene`
    pub fn find(&self, scene: u16) -> Option<usize> {
        if scene == SCENE_PROHIBITED {
            return None;
        }
        self.slots.iter().position(|&s| s == scene)
    }

    /// Reserve a slot for `scene`: its own slot if stored, else a free one
    pub fn store(&mut self, scene: u16) -> Result<usize, SceneError> {
        if let Some(slot) = self.find(scene) {
            self.current = scene;
            self.target = SCENE_PROHIBITED;
            return Ok(slot);
        }

        let slot = self
            .slots
            .iter()
            .position(|&s| s == SCENE_PROHIBITED)
            .ok_or(SceneError::RegisterFull)?;
        self.slots[slot] = scene;
        self.current = scene;
        self.target = SCENE_PROHIBITED;
        Ok(slot)
    }

    /// Begin recalling `scene`. With a transition the scene is the target
    /// until [`finish_recall`](Self::finish_recall).
    pub fn recall(&mut self, scene: u16, transitioning: bool) -> Result<usize, SceneError> {
        let slot = self.find(scene).ok_or(SceneError::NotFound)?;
        if transitioning {
            self.current = SCENE_PROHIBITED;
            self.target = scene;
        } else {
            self.current = scene;
            self.target = SCENE_PROHIBITED;
        }
        Ok(slot)
    }

    /// The recall transition reached its target
    pub fn finish_recall(&mut self) {
        if self.target != SCENE_PROHIBITED {
            self.current = self.target;
            self.target = SCENE_PROHIBITED;
        }
    }

    /// Remove `scene`; returns the freed slot
    pub fn delete(&mut self, scene: u16) -> Option<usize> {
        let slot = self.find(scene)?;
        self.slots[slot] = SCENE_PROHIBITED;
        if self.current == scene {
            self.current = SCENE_PROHIBITED;
        }
        if self.target == scene {
            self.target = SCENE_PROHIBITED;
        }
        Some(slot)
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    pub fn target(&self) -> u16 {
        self.target
    }

    /// A scene-participating state changed outside a recall
    pub fn invalidate(&mut self) {
        self.current = SCENE_PROHIBITED;
        self.target = SCENE_PROHIBITED;
    }

    /// Stored scene numbers, ascending
    pub fn scenes(&self) -> Vec<u16> {
        let mut scenes: Vec<u16> = self
            .slots
            .iter()
            .copied()
            .filter(|&s| s != SCENE_PROHIBITED)
            .collect();
        scenes.sort_unstable();
        scenes
    }

    /// Persistent form: one little-endian u16 per slot
    pub fn to_bytes(&self) -> Vec<u8> {
        self.slots.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Restore slots saved by [`to_bytes`](Self::to_bytes)
    pub fn load(&mut self, data: &[u8]) -> MeshResult<()> {
        if data.len() != self.slots.len() * 2 {
            return Err(MeshError::CorruptDataset(format!(
                "scene register: {} bytes for {} slots",
                data.len(),
                self.slots.len()
            )));
        }
        for (slot, chunk) in self.slots.iter_mut().zip(data.chunks_exact(2)) {
            *slot = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        self.invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_store_and_recall() {
        let mut reg = SceneRegister::new(2);
        assert_eq!(reg.store(7), Ok(0));
        assert_eq!(reg.store(3), Ok(1));
        assert_eq!(reg.current(), 3);
        assert_eq!(reg.recall(7, false), Ok(0));
        assert_eq!(reg.current(), 7);
        assert_eq!(reg.scenes(), vec![3, 7]);
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut reg = SceneRegister::new(2);
        reg.store(7).unwrap();
        reg.store(8).unwrap();
        assert_eq!(reg.store(7), Ok(0));
    }

    #[test]
    fn test_register_full() {
        let mut reg = SceneRegister::new(1);
        reg.store(1).unwrap();
        assert_eq!(reg.store(2), Err(SceneError::RegisterFull));
        assert_eq!(reg.scenes(), vec![1]);
        assert_eq!(reg.current(), 1);
    }

    #[test]
    fn test_recall_unknown() {
        let mut reg = SceneRegister::new(4);
        assert_eq!(reg.recall(9, false), Err(SceneError::NotFound));
        assert_eq!(reg.recall(SCENE_PROHIBITED, false), Err(SceneError::NotFound));
    }

    #[test]
    fn test_transitioning_recall() {
        let mut reg = SceneRegister::new(4);
        reg.store(5).unwrap();
        reg.invalidate();
        reg.recall(5, true).unwrap();
        assert_eq!(reg.current(), 0);
        assert_eq!(reg.target(), 5);
        reg.finish_recall();
        assert_eq!(reg.current(), 5);
        assert_eq!(reg.target(), 0);
    }

    #[test]
    fn test_delete_frees_slot() {
        let mut reg = SceneRegister::new(1);
        reg.store(4).unwrap();
        assert_eq!(reg.delete(4), Some(0));
        assert_eq!(reg.current(), 0);
        assert_eq!(reg.delete(4), None);
        assert_eq!(reg.store(5), Ok(0));
    }

    #[test]
    fn test_persistence() {
        let mut reg = SceneRegister::new(3);
        reg.store(0x1234).unwrap();
        reg.store(2).unwrap();

        let mut restored = SceneRegister::new(3);
        restored.load(&reg.to_bytes()).unwrap();
        assert_eq!(restored.scenes(), vec![2, 0x1234]);
        assert_eq!(restored.find(0x1234), Some(0));

        assert!(matches!(restored.load(&[1, 2, 3]), Err(MeshError::CorruptDataset(_))));
    }

    proptest! {
        #[test]
        fn prop_register_stays_within_capacity(
            capacity in 1usize..=16,
            ops in proptest::collection::vec((any::<bool>(), 1u16..24), 1..64),
        ) {
            let mut reg = SceneRegister::new(capacity);
            for (store, scene) in ops {
                if store {
                    let full = reg.scenes().len() == capacity && reg.find(scene).is_none();
                    prop_assert_eq!(reg.store(scene).is_err(), full);
                } else {
                    reg.delete(scene);
                    prop_assert!(reg.find(scene).is_none());
                }
                let scenes = reg.scenes();
                prop_assert!(scenes.len() <= capacity);
                prop_assert!(!scenes.contains(&0));
                prop_assert!(scenes.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
