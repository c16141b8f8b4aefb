use parking_lot::RwLock;

use super::{raise_entry, ReadStateStore};
use crate::types::ReadStateMap;

/// Read state that lives only as long as the process.
#[derive(Default)]
pub struct MemoryReadStateStore {
    entries: RwLock<ReadStateMap>,
}

impl MemoryReadStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: ReadStateMap) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl ReadStateStore for MemoryReadStateStore {
    fn get(&self, channel_id: &str) -> u64 {
        self.entries.read().get(channel_id).copied().unwrap_or(0)
    }

    fn set(&self, channel_id: &str, count: u64) {
        raise_entry(&mut self.entries.write(), channel_id, count);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn snapshot(&self) -> ReadStateMap {
        self.entries.read().clone()
    }
}
