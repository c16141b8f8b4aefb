//! SQLite key/value backend for the read-state map.

use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_read_state, raise_entry, ReadStateStore, READ_STATE_KEY};
use crate::error::FeedError;
use crate::types::ReadStateMap;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS client_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

pub struct SqliteReadStateStore {
    conn: Mutex<Connection>,
    entries: RwLock<ReadStateMap>,
}

impl SqliteReadStateStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, FeedError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, FeedError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, FeedError> {
        conn.execute_batch(SCHEMA)?;
        let entries = load_entries(&conn);
        Ok(Self {
            conn: Mutex::new(conn),
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &ReadStateMap) -> Result<(), FeedError> {
        let value = serde_json::to_string(entries)
            .map_err(|e| FeedError::Io(format!("Serialize error: {}", e)))?;
        self.conn.lock().execute(
            "INSERT INTO client_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![READ_STATE_KEY, value],
        )?;
        Ok(())
    }
}

fn load_entries(conn: &Connection) -> ReadStateMap {
    let raw: Option<String> = match conn
        .query_row(
            "SELECT value FROM client_state WHERE key = ?1",
            [READ_STATE_KEY],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("Read state: failed to read SQLite store: {}", e);
            None
        }
    };

    match raw.map(|raw| serde_json::from_str::<serde_json::Value>(&raw)) {
        Some(Ok(value)) => parse_read_state(&value),
        Some(Err(e)) => {
            log::warn!("Read state: stored value is not JSON ({}), starting empty", e);
            ReadStateMap::new()
        }
        None => ReadStateMap::new(),
    }
}

impl ReadStateStore for SqliteReadStateStore {
    fn get(&self, channel_id: &str) -> u64 {
        self.entries.read().get(channel_id).copied().unwrap_or(0)
    }

    fn set(&self, channel_id: &str, count: u64) {
        let mut entries = self.entries.write();
        if !raise_entry(&mut entries, channel_id, count) {
            return;
        }
        if let Err(e) = self.persist(&entries) {
            log::warn!("Read state: failed to save to SQLite: {}", e);
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        if let Err(e) = self
            .conn
            .lock()
            .execute("DELETE FROM client_state WHERE key = ?1", [READ_STATE_KEY])
        {
            log::warn!("Read state: failed to clear SQLite store: {}", e);
        }
    }

    fn snapshot(&self) -> ReadStateMap {
        self.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("read-state.db");

        let store = SqliteReadStateStore::open(&path).expect("open");
        store.set("c1", 5);
        drop(store);

        let reopened = SqliteReadStateStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("c1"), 5);
    }

    #[test]
    fn corrupted_value_degrades_to_empty() {
        let store = SqliteReadStateStore::open_in_memory().expect("open");
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO client_state (key, value) VALUES (?1, 'garbage')",
                [READ_STATE_KEY],
            )
            .unwrap();

        let entries = load_entries(&store.conn.lock());
        assert!(entries.is_empty());
    }

    #[test]
    fn foreign_rows_are_untouched() {
        let store = SqliteReadStateStore::open_in_memory().expect("open");
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO client_state (key, value) VALUES ('leadpulse.locale', '\"de\"')",
                [],
            )
            .unwrap();

        store.set("c1", 1);
        store.clear();

        let count: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM client_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.get("c1"), 0);
    }

    #[test]
    fn set_is_monotonic() {
        let store = SqliteReadStateStore::open_in_memory().expect("open");
        store.set("c1", 7);
        store.set("c1", 2);
        assert_eq!(store.get("c1"), 7);
        assert_eq!(store.snapshot().len(), 1);
    }
}
