//! Request de-duplication by event id.
//!
//! The same 24210 request can arrive more than once (multiple relays, relay
//! replays). [`Dedup::claim`] is the single gate a worker checks before
//! doing any work; a second claim of the same id is dropped silently.

use std::collections::HashSet;
use std::sync::Mutex;

/// Bound on how many request ids are remembered. Without a cap a
/// long-running server would leak memory for every request it ever saw;
/// this is far larger than any plausible in-flight window, so legitimate
/// retries are never mistaken for duplicates.
const MAX_TRACKED_IDS: usize = 100_000;

pub struct Dedup {
    seen: Mutex<HashSet<String>>,
}

impl Dedup {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` the first time `request_id` is claimed, `false` on
    /// every subsequent claim.
    pub fn claim(&self, request_id: &str) -> bool {
        let mut guard = self.seen.lock().expect("dedup mutex poisoned");
        if guard.contains(request_id) {
            return false;
        }
        if guard.len() >= MAX_TRACKED_IDS {
            guard.clear();
            tracing::warn!("dedup cache hit its cap and was reset");
        }
        guard.insert(request_id.to_string());
        true
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_succeeds_second_fails() {
        let dedup = Dedup::new();
        assert!(dedup.claim("a"));
        assert!(!dedup.claim("a"));
    }

    #[test]
    fn distinct_ids_both_succeed() {
        let dedup = Dedup::new();
        assert!(dedup.claim("a"));
        assert!(dedup.claim("b"));
    }
}
