//! Retransmit cache (spec.md §4.4): `cookie -> (reply_bytes, insert_time)`
//! for at-most-once semantics over the unreliable datagram control
//! transport. Grounded on `original_source/src/rtpp_command.c`'s
//! `rtpp_command_guard_retrans`/`rtpc_doreply` cookie handling.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default retransmit-cache TTL (spec.md §9 Open Question: not exposed in
/// the original source fragments retained here; adopt a conservative 60s
/// default and make it configurable — see [`crate::config::RelayConfig`]).
pub const DEFAULT_RCACHE_TTL: Duration = Duration::from_secs(60);

struct Entry {
    reply: Vec<u8>,
    inserted: Instant,
}

/// Cookie-indexed reply cache with time-based eviction.
///
/// `lookup` and `insert` are the only operations the command parser and
/// reply path need; eviction is driven externally by a periodic
/// [`crate::concurrency::TimedScheduler`] task calling [`evict_expired`](Self::evict_expired).
pub struct RetransmitCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl RetransmitCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_RCACHE_TTL)
    }

    /// Look up the cached reply for `cookie`. Returns `None` if absent or
    /// stale — staleness is checked here so a not-yet-evicted expired entry
    /// is treated as a miss (spec.md §4.4 "if present and fresh").
    pub fn lookup(&self, cookie: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read();
        let entry = entries.get(cookie)?;
        if entry.inserted.elapsed() > self.ttl {
            return None;
        }
        Some(entry.reply.clone())
    }

    /// Record the reply last sent for `cookie`, replacing any prior entry.
    pub fn insert(&self, cookie: impl Into<String>, reply: Vec<u8>) {
        self.entries.write().insert(
            cookie.into(),
            Entry {
                reply,
                inserted: Instant::now(),
            },
        );
    }

    /// Evict every entry older than the configured TTL. Returns the number
    /// of entries removed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.inserted.elapsed() <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn insert_then_lookup_hits() {
        let cache = RetransmitCache::new(Duration::from_secs(5));
        cache.insert("c1", b"12345 0\n".to_vec());
        assert_eq!(cache.lookup("c1"), Some(b"12345 0\n".to_vec()));
    }

    #[test]
    fn lookup_miss_for_unknown_cookie() {
        let cache = RetransmitCache::with_default_ttl();
        assert_eq!(cache.lookup("nope"), None);
    }

    #[test]
    fn expired_entry_is_a_miss_even_before_eviction() {
        let cache = RetransmitCache::new(Duration::from_millis(10));
        cache.insert("c1", b"reply".to_vec());
        sleep(Duration::from_millis(30));
        assert_eq!(cache.lookup("c1"), None);
    }

    #[test]
    fn evict_expired_removes_stale_entries_only() {
        let cache = RetransmitCache::new(Duration::from_millis(20));
        cache.insert("stale", b"a".to_vec());
        sleep(Duration::from_millis(40));
        cache.insert("fresh", b"b".to_vec());
        let removed = cache.evict_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("fresh").is_some());
    }

    #[test]
    fn reinsert_under_same_cookie_replaces_reply() {
        let cache = RetransmitCache::with_default_ttl();
        cache.insert("c1", b"first".to_vec());
        cache.insert("c1", b"second".to_vec());
        assert_eq!(cache.lookup("c1"), Some(b"second".to_vec()));
    }
}
