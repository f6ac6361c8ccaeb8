//! In-memory content store: `FileHash -> FileRecord`, with TTL eviction.
//!
//! No persistence, by design (see spec Non-goals). All access goes through
//! a single [`std::sync::Mutex`] around the map — the spec calls out that
//! "a single mutex suffices" and nothing here ever awaits while holding the
//! lock, so a std mutex (not `tokio::sync::Mutex`) is the right tool, the
//! same call the teacher makes for its own in-process maps.

use std::collections::HashMap;
use std::sync::Mutex;

use dvm_core::chunker::Chunk;

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub size: u64,
    pub chunks: Vec<Chunk>,
    pub filename: Option<String>,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyPresent,
}

pub struct ContentStore {
    records: Mutex<HashMap<String, FileRecord>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Total size in bytes of every live (non-expired) record. Used for the
    /// server's capacity policy.
    pub fn live_bytes(&self) -> u64 {
        let now = dvm_core::now_secs();
        let guard = self.records.lock().expect("content store mutex poisoned");
        guard
            .values()
            .filter(|r| r.expires_at > now)
            .map(|r| r.size)
            .sum()
    }

    /// Inserts `record` under `hash`. If a live record already exists for
    /// `hash`, it is left untouched (content addressing makes re-storing
    /// identical bytes a no-op) and [`PutOutcome::AlreadyPresent`] is
    /// returned. An expired record is evicted first.
    pub fn put(&self, hash: String, record: FileRecord) -> PutOutcome {
        let now = dvm_core::now_secs();
        let mut guard = self.records.lock().expect("content store mutex poisoned");
        if let Some(existing) = guard.get(&hash) {
            if existing.expires_at > now {
                return PutOutcome::AlreadyPresent;
            }
        }
        guard.insert(hash, record);
        PutOutcome::Inserted
    }

    /// Returns the record for `hash` if it exists and has not expired;
    /// otherwise evicts it (if present) and returns `None`.
    pub fn get(&self, hash: &str) -> Option<FileRecord> {
        let now = dvm_core::now_secs();
        let mut guard = self.records.lock().expect("content store mutex poisoned");
        match guard.get(hash) {
            Some(record) if record.expires_at > now => Some(record.clone()),
            Some(_) => {
                guard.remove(hash);
                None
            }
            None => None,
        }
    }

    /// Unconditionally removes `hash`. Returns whether a record was present.
    pub fn delete(&self, hash: &str) -> bool {
        let mut guard = self.records.lock().expect("content store mutex poisoned");
        guard.remove(hash).is_some()
    }

    /// Removes every record whose `expires_at <= now`. Returns how many
    /// were evicted.
    pub fn sweep(&self) -> usize {
        let now = dvm_core::now_secs();
        let mut guard = self.records.lock().expect("content store mutex poisoned");
        let before = guard.len();
        guard.retain(|_, record| record.expires_at > now);
        before - guard.len()
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs [`ContentStore::sweep`] on a fixed interval until the process exits.
/// Intended to be spawned as its own Tokio task alongside the request
/// worker pool.
pub async fn run_sweeper(store: std::sync::Arc<ContentStore>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let evicted = store.sweep();
        if evicted > 0 {
            tracing::debug!(evicted, "content store sweep evicted expired records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: u64) -> FileRecord {
        FileRecord {
            size: 10,
            chunks: vec![],
            filename: None,
            expires_at,
        }
    }

    #[test]
    fn get_returns_none_for_missing_hash() {
        let store = ContentStore::new();
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = ContentStore::new();
        let far_future = dvm_core::now_secs() + 3600;
        store.put("h1".into(), record(far_future));
        assert!(store.get("h1").is_some());
    }

    #[test]
    fn put_is_idempotent_while_live() {
        let store = ContentStore::new();
        let far_future = dvm_core::now_secs() + 3600;
        assert_eq!(store.put("h1".into(), record(far_future)), PutOutcome::Inserted);
        assert_eq!(store.put("h1".into(), record(far_future)), PutOutcome::AlreadyPresent);
    }

    #[test]
    fn expired_record_is_unreachable_via_get() {
        let store = ContentStore::new();
        let already_past = dvm_core::now_secs().saturating_sub(1);
        store.put("h1".into(), record(already_past));
        assert!(store.get("h1").is_none());
    }

    #[test]
    fn put_evicts_expired_before_inserting() {
        let store = ContentStore::new();
        let already_past = dvm_core::now_secs().saturating_sub(1);
        store.put("h1".into(), record(already_past));
        let far_future = dvm_core::now_secs() + 3600;
        assert_eq!(store.put("h1".into(), record(far_future)), PutOutcome::Inserted);
        assert!(store.get("h1").is_some());
    }

    #[test]
    fn delete_reports_presence() {
        let store = ContentStore::new();
        let far_future = dvm_core::now_secs() + 3600;
        assert!(!store.delete("h1"));
        store.put("h1".into(), record(far_future));
        assert!(store.delete("h1"));
        assert!(store.get("h1").is_none());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let store = ContentStore::new();
        let far_future = dvm_core::now_secs() + 3600;
        let already_past = dvm_core::now_secs().saturating_sub(1);
        store.records.lock().unwrap().insert("live".into(), record(far_future));
        store.records.lock().unwrap().insert("dead".into(), record(already_past));
        let evicted = store.sweep();
        assert_eq!(evicted, 1);
        assert!(store.get("live").is_some());
    }
}
