//! Non-volatile storage collaborator
//!
//! Models persist small datasets (settings, last values, scene registers)
//! under a [`DatasetId`]. The engine never depends on a particular backend;
//! [`MemoryNvm`] is a shared in-memory store that survives a simulated
//! reboot when the handle is cloned into the new node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meshlight_core::{ElementId, MeshError, MeshResult};
use parking_lot::Mutex;
use tracing::trace;

/// What a dataset holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetGroup {
    DefaultTransition,
    OnPowerUp,
    OnOffState,
    LevelState,
    PowerLevel,
    Lightness,
    Hsl,
    SceneRegister,
    Scheduler,
    TimeRole,
}

/// Dataset key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId {
    pub group: DatasetGroup,
    pub element: ElementId,
}

impl DatasetId {
    pub fn new(group: DatasetGroup, element: ElementId) -> Self {
        DatasetId { group, element }
    }
}

/// Storage backend
pub trait Nvm {
    fn save(&mut self, id: DatasetId, data: &[u8]);
    fn load(&self, id: DatasetId) -> Option<Vec<u8>>;
    fn erase(&mut self, id: DatasetId);
}

/// In-memory backend, cloneable handle
#[derive(Clone, Debug, Default)]
pub struct MemoryNvm {
    datasets: Arc<Mutex<HashMap<DatasetId, Vec<u8>>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryNvm {
    pub fn new() -> Self {
        MemoryNvm::default()
    }

    pub fn len(&self) -> usize {
        self.datasets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.lock().is_empty()
    }

    /// Number of saves through any handle
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Nvm for MemoryNvm {
    fn save(&mut self, id: DatasetId, data: &[u8]) {
        trace!(?id, len = data.len(), "nvm save");
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.datasets.lock().insert(id, data.to_vec());
    }

    fn load(&self, id: DatasetId) -> Option<Vec<u8>> {
        self.datasets.lock().get(&id).cloned()
    }

    fn erase(&mut self, id: DatasetId) {
        self.datasets.lock().remove(&id);
    }
}

/// Little-endian cursor over a loaded dataset
pub struct DatasetReader<'a> {
    id: DatasetId,
    data: &'a [u8],
}

impl<'a> DatasetReader<'a> {
    pub fn new(id: DatasetId, data: &'a [u8]) -> Self {
        DatasetReader { id, data }
    }

    fn take(&mut self, n: usize) -> MeshResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(MeshError::CorruptDataset(format!(
                "{:?}: needs {} more bytes, {} left",
                self.id,
                n,
                self.data.len()
            )));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    pub fn u8(&mut self) -> MeshResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> MeshResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_handle() {
        let mut nvm = MemoryNvm::new();
        let other = nvm.clone();
        let id = DatasetId::new(DatasetGroup::OnPowerUp, ElementId(1));

        nvm.save(id, &[2]);
        assert_eq!(other.load(id), Some(vec![2]));
        assert_eq!(other.writes(), 1);

        nvm.erase(id);
        assert!(other.is_empty());
    }

    #[test]
    fn test_reader() {
        let id = DatasetId::new(DatasetGroup::Lightness, ElementId(0));
        let data = [0x01, 0x34, 0x12];
        let mut reader = DatasetReader::new(id, &data);
        assert_eq!(reader.u8().unwrap(), 1);
        assert_eq!(reader.u16().unwrap(), 0x1234);
        assert_eq!(reader.remaining(), 0);
        assert!(matches!(reader.u8(), Err(MeshError::CorruptDataset(_))));
    }
}
