//! Persisted chat read-state: channel id → last-seen message count.
//!
//! The map lives under one namespaced key so it can share a document (or a
//! key/value table) with other client-local settings. Readers are lenient:
//! a missing, non-numeric or corrupted value reads as 0 / empty, never as an
//! error. Writers never lower a stored count.

pub mod file;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use crate::types::{ReadStateBackend, ReadStateConfig, ReadStateMap};

pub use file::FileReadStateStore;
pub use memory::MemoryReadStateStore;
pub use sqlite::SqliteReadStateStore;

/// Namespaced key holding the whole map.
pub const READ_STATE_KEY: &str = "leadpulse.chat.readCounts";

pub trait ReadStateStore: Send + Sync {
    /// Last-seen count for a channel; 0 when never seen.
    fn get(&self, channel_id: &str) -> u64;

    /// Record that the operator has seen `count` messages in a channel.
    fn set(&self, channel_id: &str, count: u64);

    fn clear(&self);

    fn snapshot(&self) -> ReadStateMap;
}

/// Lenient decode of the stored value.
///
/// Accepts the map itself or the map serialized into a JSON string (the shape
/// browser-style storage produces). Entries that are not non-negative
/// integers read as 0.
pub fn parse_read_state(value: &serde_json::Value) -> ReadStateMap {
    match value {
        serde_json::Value::Object(entries) => entries
            .iter()
            .map(|(channel, count)| (channel.clone(), count.as_u64().unwrap_or(0)))
            .collect(),
        serde_json::Value::String(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .filter(|inner| inner.is_object())
            .map(|inner| parse_read_state(&inner))
            .unwrap_or_default(),
        _ => ReadStateMap::new(),
    }
}

/// Raise a channel's entry to `count`. Returns true when the map changed.
pub(crate) fn raise_entry(map: &mut ReadStateMap, channel_id: &str, count: u64) -> bool {
    match map.get_mut(channel_id) {
        Some(existing) if *existing >= count => false,
        Some(existing) => {
            *existing = count;
            true
        }
        None => {
            map.insert(channel_id.to_string(), count);
            true
        }
    }
}

fn default_path(file_name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".leadpulse").join(file_name))
}

/// Open the configured backend, degrading to an in-memory store when the
/// configured one cannot be opened.
pub fn open_read_state_store(config: &ReadStateConfig) -> Arc<dyn ReadStateStore> {
    match config.backend {
        ReadStateBackend::Memory => Arc::new(MemoryReadStateStore::new()),
        ReadStateBackend::File => {
            let path = config
                .path
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| default_path("read-state.json"));
            match path {
                Some(path) => Arc::new(FileReadStateStore::open(path)),
                None => {
                    log::warn!("Read state: home directory not found, keeping read state in memory");
                    Arc::new(MemoryReadStateStore::new())
                }
            }
        }
        ReadStateBackend::Sqlite => {
            let path = config
                .path
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| default_path("read-state.db"));
            let opened = match path {
                Some(path) => SqliteReadStateStore::open(&path),
                None => Err(crate::error::FeedError::Config(
                    "home directory not found".to_string(),
                )),
            };
            match opened {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    log::warn!("Read state: failed to open SQLite store ({}), keeping read state in memory", e);
                    Arc::new(MemoryReadStateStore::new())
                }
            }
        }
    }
}
