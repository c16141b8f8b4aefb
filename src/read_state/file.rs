//! JSON-document backend for the read-state map.
//!
//! The document may hold other client settings next to the read-state key;
//! those are preserved on every write. Writes go to a temp file that is then
//! renamed over the existing file so a crash mid-write leaves the old document.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{parse_read_state, raise_entry, ReadStateStore, READ_STATE_KEY};
use crate::error::FeedError;
use crate::types::ReadStateMap;

pub struct FileReadStateStore {
    path: PathBuf,
    entries: RwLock<ReadStateMap>,
}

impl FileReadStateStore {
    /// Load the store at `path`. A missing or corrupted file yields an empty map.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_document(&path)
            .get(READ_STATE_KEY)
            .map(parse_read_state)
            .unwrap_or_default();
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: Option<&ReadStateMap>) -> Result<(), FeedError> {
        let mut document = load_document(&self.path);
        match entries {
            Some(entries) => {
                let value = serde_json::to_value(entries)
                    .map_err(|e| FeedError::Io(format!("Serialize error: {}", e)))?;
                document.insert(READ_STATE_KEY.to_string(), value);
            }
            None => {
                document.remove(READ_STATE_KEY);
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|e| FeedError::Io(format!("Serialize error: {}", e)))?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, content)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

fn load_document(path: &Path) -> Map<String, Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Map::new(),
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(document)) => document,
        Ok(_) | Err(_) => {
            log::warn!(
                "Read state: {} is not a JSON object, starting empty",
                path.display()
            );
            Map::new()
        }
    }
}

impl ReadStateStore for FileReadStateStore {
    fn get(&self, channel_id: &str) -> u64 {
        self.entries.read().get(channel_id).copied().unwrap_or(0)
    }

    fn set(&self, channel_id: &str, count: u64) {
        let mut entries = self.entries.write();
        if !raise_entry(&mut entries, channel_id, count) {
            return;
        }
        if let Err(e) = self.persist(Some(&*entries)) {
            log::warn!("Read state: failed to save {}: {}", self.path.display(), e);
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        if let Err(e) = self.persist(None) {
            log::warn!("Read state: failed to clear {}: {}", self.path.display(), e);
        }
    }

    fn snapshot(&self) -> ReadStateMap {
        self.entries.read().clone()
    }
}
