//! Per-group cursor persistence.
//!
//! Cursors record the last acknowledged message and event id per group.
//! Saves are monotonic: a value below the stored one is ignored, so an
//! observer never sees a cursor move backward.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Abstract cursor persistence used by the group client and sync loop.
pub trait CursorStore: Send + Sync {
    /// Record an acked message id. Monotonic.
    fn save_msg_cursor(&self, group_id: &str, msg_id: i64);
    /// Record an acked event id. Monotonic.
    fn save_event_cursor(&self, group_id: &str, event_id: i64);
    /// Load `(msg_cursor, event_cursor)` for a group, zeros when absent.
    fn load_cursor(&self, group_id: &str) -> (i64, i64);
    /// Forget a group entirely.
    fn remove_cursor(&self, group_id: &str);
    /// Write pending changes out, if any.
    fn flush(&self);
    /// Flush and shut down. Idempotent.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct CursorEntry {
    #[serde(default)]
    msg_cursor: i64,
    #[serde(default)]
    event_cursor: i64,
}

#[derive(Default)]
struct Inner {
    cursors: BTreeMap<String, CursorEntry>,
    dirty: bool,
}

/// [`CursorStore`] backed by a flat JSON file
/// `{"<gid>": {"msg_cursor": n, "event_cursor": m}, ...}`.
pub struct JsonCursorStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonCursorStore {
    /// Open the store, loading any existing file. A missing or unreadable
    /// file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut inner = Inner::default();
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.is_empty() => {
                match serde_json::from_str::<BTreeMap<String, CursorEntry>>(&content) {
                    Ok(cursors) => inner.cursors = cursors,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cursor file unreadable, starting empty")
                    }
                }
            }
            _ => {}
        }
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    fn write_locked(&self, inner: &mut Inner) {
        match serde_json::to_string_pretty(&inner.cursors) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "cursor flush failed");
                } else {
                    inner.dirty = false;
                }
            }
            Err(e) => warn!(error = %e, "cursor serialization failed"),
        }
    }
}

impl CursorStore for JsonCursorStore {
    fn save_msg_cursor(&self, group_id: &str, msg_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.cursors.entry(group_id.to_string()).or_default();
        if msg_id > entry.msg_cursor {
            entry.msg_cursor = msg_id;
            inner.dirty = true;
        }
    }

    fn save_event_cursor(&self, group_id: &str, event_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.cursors.entry(group_id.to_string()).or_default();
        if event_id > entry.event_cursor {
            entry.event_cursor = event_id;
            inner.dirty = true;
        }
    }

    fn load_cursor(&self, group_id: &str) -> (i64, i64) {
        let inner = self.inner.lock().unwrap();
        inner
            .cursors
            .get(group_id)
            .map(|e| (e.msg_cursor, e.event_cursor))
            .unwrap_or((0, 0))
    }

    fn remove_cursor(&self, group_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.cursors.remove(group_id).is_some() {
            inner.dirty = true;
        }
    }

    fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.dirty {
            self.write_locked(&mut inner);
        }
    }

    fn close(&self) {
        self.flush();
    }
}

impl Drop for JsonCursorStore {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCursorStore::open(dir.path().join("cursors.json"));

        for v in [3, 7, 5, 7, 1] {
            store.save_msg_cursor("g1", v);
        }
        store.save_event_cursor("g1", 2);
        store.save_event_cursor("g1", 1);

        assert_eq!(store.load_cursor("g1"), (7, 2));
        assert_eq!(store.load_cursor("unknown"), (0, 0));
    }

    #[test]
    fn reopen_reports_same_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        {
            let store = JsonCursorStore::open(&path);
            store.save_msg_cursor("g1", 42);
            store.save_event_cursor("g2", 9);
            store.close();
            store.close(); // idempotent
        }
        let store = JsonCursorStore::open(&path);
        assert_eq!(store.load_cursor("g1"), (42, 0));
        assert_eq!(store.load_cursor("g2"), (0, 9));
    }

    #[test]
    fn remove_forgets_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        {
            let store = JsonCursorStore::open(&path);
            store.save_msg_cursor("g1", 5);
            store.remove_cursor("g1");
            store.close();
        }
        let store = JsonCursorStore::open(&path);
        assert_eq!(store.load_cursor("g1"), (0, 0));
    }

    #[test]
    fn flush_without_changes_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        let store = JsonCursorStore::open(&path);
        store.flush();
        // Nothing was dirty, nothing was written.
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        std::fs::write(&path, "not json").unwrap();
        let store = JsonCursorStore::open(&path);
        assert_eq!(store.load_cursor("g1"), (0, 0));
    }
}
