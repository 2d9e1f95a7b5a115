//! Model state store
//!
//! A descriptor holds a fixed array of values: the present value in slot 0,
//! the target in slot 1 and one snapshot per scene register slot after that.
//! Writes are unconditional; range checks belong to the owning model.

use meshlight_core::{StateValue, UpdateSource};

pub const PRESENT_SLOT: usize = 0;
pub const TARGET_SLOT: usize = 1;
pub const SCENE_BASE: usize = 2;

/// Stored values of one state variable
#[derive(Clone, Debug)]
pub struct StateDescriptor<T> {
    stored: Vec<T>,
    update_source: UpdateSource,
}

impl<T: StateValue> StateDescriptor<T> {
    /// Create a descriptor with `scene_count` snapshot slots
    pub fn new(initial: T, scene_count: usize) -> Self {
        StateDescriptor {
            stored: vec![initial; SCENE_BASE + scene_count],
            update_source: UpdateSource::Local,
        }
    }

    /// Get the present value
    #[inline]
    pub fn get_state(&self) -> T {
        self.stored[PRESENT_SLOT]
    }

    /// Write the present value
    pub fn set_state(&mut self, value: T, source: UpdateSource) {
        self.stored[PRESENT_SLOT] = value;
        self.update_source = source;
    }

    /// Get the target value
    #[inline]
    pub fn target(&self) -> T {
        self.stored[TARGET_SLOT]
    }

    pub fn set_target(&mut self, value: T) {
        self.stored[TARGET_SLOT] = value;
    }

    /// Provenance of the last present write
    pub fn update_source(&self) -> UpdateSource {
        self.update_source
    }

    pub fn scene_count(&self) -> usize {
        self.stored.len() - SCENE_BASE
    }

    /// Copy present into scene slot `index`
    pub fn store_scene(&mut self, index: usize) -> bool {
        let present = self.stored[PRESENT_SLOT];
        match self.stored.get_mut(SCENE_BASE + index) {
            Some(slot) => {
                *slot = present;
                true
            }
            None => false,
        }
    }

    /// Get the snapshot in scene slot `index`
    pub fn scene(&self, index: usize) -> Option<T> {
        self.stored.get(SCENE_BASE + index).copied()
    }

    /// Overwrite a scene slot (restore from NVM)
    pub fn set_scene(&mut self, index: usize, value: T) -> bool {
        match self.stored.get_mut(SCENE_BASE + index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// All scene snapshots in slot order
    pub fn scenes(&self) -> &[T] {
        &self.stored[SCENE_BASE..]
    }
}
