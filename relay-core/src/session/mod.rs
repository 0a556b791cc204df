//! Session model and store (spec.md §3, §4.6).
//!
//! Grounded on the teacher's `session::SessionManager`
//! (`parking_lot::RwLock<HashMap<...>>` keyed by session id, `Arc<Session>`,
//! atomic port counter), generalized from that one-`HashMap` model to the
//! two-index (call-id hash table, weak session-id table) model this
//! specification requires, and on `original_source/src/rtpp_command.c`'s
//! `find_stream_session`/`get_rtpp_session` for the triple-resolution and
//! weak-delete semantics.

pub mod stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use crate::concurrency::refcount::{next_generation, RefCounted, WeakHandle};
use crate::error::{RelayError, Result};
pub use stream::StreamPair;

/// Stream index within a [`Session`]: which leg of the call a resolved
/// `(call_id, from_tag, to_tag)` triple refers to (spec.md §4.6
/// `find_stream`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// The side that sent the tag matching the session's `from_tag`.
    FromCaller = 0,
    /// The side that sent the tag matching the session's `to_tag`.
    FromCallee = 1,
}

impl Leg {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One bidirectional call (spec.md §3). Exactly one `Session` exists per
/// `(call_id, from_tag, to_tag)` triple; a session with no `to_tag` yet is
/// "weak" in the sense of being half-open, not yet looked up by the callee
/// leg.
pub struct Session {
    id: u64,
    call_id: String,
    from_tag: String,
    to_tag: RwLock<Option<String>>,
    streams: RwLock<[Option<StreamPair>; 2]>,
    /// Decremented by weak `DELETE`s; the session is destroyed when this
    /// reaches zero (spec.md §9 Open Question resolution — see `DESIGN.md`).
    weak_refs: AtomicU32,
    created: Instant,
    last_activity: RwLock<Instant>,
}

impl Session {
    fn new(id: u64, call_id: String, from_tag: String, caller_stream: StreamPair) -> Self {
        Self {
            id,
            call_id,
            from_tag,
            to_tag: RwLock::new(None),
            streams: RwLock::new([Some(caller_stream), None]),
            weak_refs: AtomicU32::new(1),
            created: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn from_tag(&self) -> &str {
        &self.from_tag
    }

    pub fn to_tag(&self) -> Option<String> {
        self.to_tag.read().clone()
    }

    pub fn created_at(&self) -> Instant {
        self.created
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Resolve which leg `tag` names: `from_tag` maps to
    /// [`Leg::FromCaller`], a matching `to_tag` maps to [`Leg::FromCallee`].
    pub fn leg_for_tag(&self, tag: &str) -> Option<Leg> {
        if tag == self.from_tag {
            return Some(Leg::FromCaller);
        }
        if self.to_tag.read().as_deref() == Some(tag) {
            return Some(Leg::FromCallee);
        }
        None
    }

    /// Run `f` with the stream for `leg`, if it has been allocated.
    pub fn with_stream<R>(&self, leg: Leg, f: impl FnOnce(&StreamPair) -> R) -> Option<R> {
        self.streams.read()[leg.index()].as_ref().map(f)
    }

    /// Run `f` against both legs that have an allocated stream (used by
    /// `RECORD`/`COPY`, which engage the recorder on every stream of the
    /// session).
    pub fn for_each_stream(&self, mut f: impl FnMut(Leg, &StreamPair)) {
        let streams = self.streams.read();
        for (idx, slot) in streams.iter().enumerate() {
            if let Some(stream) = slot {
                let leg = if idx == 0 { Leg::FromCaller } else { Leg::FromCallee };
                f(leg, stream);
            }
        }
    }

    fn promote(&self, to_tag: String, callee_stream: StreamPair) {
        *self.to_tag.write() = Some(to_tag);
        self.streams.write()[Leg::FromCallee.index()] = Some(callee_stream);
    }

    /// Decrement the weak-reference counter, returning `true` when it has
    /// reached zero and the session should be destroyed.
    fn release_weak(&self) -> bool {
        loop {
            let current = self.weak_refs.load(Ordering::SeqCst);
            if current == 0 {
                return true;
            }
            if self
                .weak_refs
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current - 1 == 0;
            }
        }
    }
}

/// Two indices into the same logical set of sessions (spec.md §4.6): a
/// call-id hash table holding strong references (many-to-one — a call-id may
/// hold several sessions during transient states, e.g. forking), and a weak
/// table keyed by opaque session id, validated at access time.
pub struct SessionStore {
    by_call_id: RwLock<HashMap<String, Vec<RefCounted<Session>>>>,
    weak_table: RwLock<HashMap<u64, WeakHandle<Session>>>,
    next_id: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            by_call_id: RwLock::new(HashMap::new()),
            weak_table: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// `UPDATE`'s session-creation path: the only way a new session enters
    /// the store (spec.md §4.8 "`UPDATE` is the only opcode that may create a
    /// session").
    pub fn create_session(
        &self,
        call_id: impl Into<String>,
        from_tag: impl Into<String>,
        caller_stream: StreamPair,
    ) -> RefCounted<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let call_id = call_id.into();
        let session = RefCounted::new(Session::new(id, call_id.clone(), from_tag.into(), caller_stream));

        let generation = next_generation();
        self.weak_table
            .write()
            .insert(id, session.downgrade(generation));
        self.by_call_id
            .write()
            .entry(call_id)
            .or_default()
            .push(session.clone());
        session
    }

    /// `LOOKUP`'s promotion path: adds the callee leg to an existing
    /// half-open session. Never creates (spec.md §4.8 "`LOOKUP` never
    /// creates").
    pub fn promote_session(
        &self,
        call_id: &str,
        from_tag: &str,
        to_tag: impl Into<String>,
        callee_stream: StreamPair,
    ) -> Result<RefCounted<Session>> {
        let session = self.lookup_by_from_tag(call_id, from_tag)?;
        session.promote(to_tag.into(), callee_stream);
        session.touch();
        Ok(session)
    }

    fn lookup_by_from_tag(&self, call_id: &str, from_tag: &str) -> Result<RefCounted<Session>> {
        let table = self.by_call_id.read();
        table
            .get(call_id)
            .and_then(|sessions| sessions.iter().find(|s| s.from_tag() == from_tag))
            .cloned()
            .ok_or_else(|| RelayError::SessionNotFound {
                call_id: call_id.to_string(),
                from_tag: from_tag.to_string(),
            })
    }

    /// Resolve `(call_id, from_tag, to_tag)` to a session and the leg the
    /// triple names (spec.md §4.6 `find_stream`). `to_tag` is `None` for
    /// commands (like `UPDATE`) issued before the callee side is known; in
    /// that case only `from_tag` needs to match.
    pub fn find_stream(
        &self,
        call_id: &str,
        from_tag: &str,
        to_tag: Option<&str>,
    ) -> Result<(RefCounted<Session>, Leg)> {
        let table = self.by_call_id.read();
        let candidates = table.get(call_id).ok_or_else(|| RelayError::SessionNotFound {
            call_id: call_id.to_string(),
            from_tag: from_tag.to_string(),
        })?;

        for session in candidates {
            if let Some(leg) = session.leg_for_tag(from_tag) {
                if let Some(to_tag) = to_tag {
                    if session.to_tag().as_deref() != Some(to_tag) {
                        continue;
                    }
                }
                session.touch();
                return Ok((session.clone(), leg));
            }
        }
        Err(RelayError::SessionNotFound {
            call_id: call_id.to_string(),
            from_tag: from_tag.to_string(),
        })
    }

    /// `DELETE`: full delete removes the session outright; weak delete
    /// decrements the session's weak-reference count and only removes it
    /// once that reaches zero (spec.md §9 Open Question resolution).
    pub fn delete(&self, call_id: &str, from_tag: &str, weak: bool) -> Result<()> {
        let mut table = self.by_call_id.write();
        let Some(sessions) = table.get_mut(call_id) else {
            return Err(RelayError::SessionNotFound {
                call_id: call_id.to_string(),
                from_tag: from_tag.to_string(),
            });
        };
        let pos = sessions
            .iter()
            .position(|s| s.from_tag() == from_tag)
            .ok_or_else(|| RelayError::SessionNotFound {
                call_id: call_id.to_string(),
                from_tag: from_tag.to_string(),
            })?;

        let should_destroy = if weak {
            sessions[pos].release_weak()
        } else {
            true
        };

        if should_destroy {
            let session = sessions.remove(pos);
            self.weak_table.write().remove(&session.id());
            if sessions.is_empty() {
                table.remove(call_id);
            }
        }
        Ok(())
    }

    /// `DELETE_ALL`: purge every session in both indices. Returns the number
    /// of sessions removed.
    pub fn purge(&self) -> usize {
        let mut table = self.by_call_id.write();
        let mut weak = self.weak_table.write();
        let count: usize = table.values().map(|v| v.len()).sum();
        table.clear();
        weak.clear();
        count
    }

    /// Total number of active sessions, for `INFO`/`GET_STATS`.
    pub fn len(&self) -> usize {
        self.by_call_id.read().values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of allocated [`StreamPair`]s across every active session
    /// (spec.md §4.8 `INFO` "streams active"; `original_source`'s
    /// `handle_info` reports this as `rtp_streams_wrt->get_length`). A
    /// half-open session contributes one stream, a promoted one contributes
    /// two.
    pub fn active_streams(&self) -> usize {
        self.by_call_id
            .read()
            .values()
            .flatten()
            .map(|session| session.streams.read().iter().flatten().count())
            .sum()
    }

    /// Remove every session whose streams have all gone quiet past their TTL
    /// (spec.md §5 "sessions have per-direction TTLs"). Returns the number of
    /// sessions removed; intended as a periodic scheduler task body.
    pub fn purge_expired(&self) -> usize {
        let mut table = self.by_call_id.write();
        let mut weak = self.weak_table.write();
        let mut removed = 0;
        table.retain(|_, sessions| {
            sessions.retain(|session| {
                let expired = {
                    let streams = session.streams.read();
                    streams.iter().flatten().all(|s| s.is_expired())
                };
                if expired {
                    weak.remove(&session.id());
                    removed += 1;
                }
                !expired
            });
            !sessions.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn stream(port: u16) -> StreamPair {
        let rtp = UdpSocket::bind(("127.0.0.1", port)).unwrap();
        let rtcp = UdpSocket::bind(("127.0.0.1", port + 1)).unwrap();
        StreamPair::new(rtp, rtcp, port)
    }

    #[test]
    fn create_then_find_by_from_tag_only() {
        let store = SessionStore::new();
        store.create_session("call-A", "ft", stream(48100));
        let (session, leg) = store.find_stream("call-A", "ft", None).unwrap();
        assert_eq!(session.call_id(), "call-A");
        assert_eq!(leg, Leg::FromCaller);
    }

    #[test]
    fn promote_adds_callee_leg_and_never_creates() {
        let store = SessionStore::new();
        store.create_session("call-B", "ft", stream(48110));
        let err = store.promote_session("call-B", "wrong-tag", "tt", stream(48112));
        assert!(err.is_err());

        store.promote_session("call-B", "ft", "tt", stream(48114)).unwrap();
        let (session, leg) = store.find_stream("call-B", "tt", None).unwrap();
        assert_eq!(leg, Leg::FromCallee);
        assert_eq!(session.to_tag(), Some("tt".to_string()));
    }

    #[test]
    fn at_most_one_session_per_triple() {
        let store = SessionStore::new();
        store.create_session("call-C", "ft", stream(48120));
        store.promote_session("call-C", "ft", "tt", stream(48122)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn full_delete_removes_session_and_second_delete_fails() {
        let store = SessionStore::new();
        store.create_session("call-D", "ft", stream(48130));
        store.delete("call-D", "ft", false).unwrap();
        assert!(store.find_stream("call-D", "ft", None).is_err());
        assert!(store.delete("call-D", "ft", false).is_err());
    }

    #[test]
    fn weak_delete_decrements_and_destroys_at_zero() {
        let store = SessionStore::new();
        store.create_session("call-E", "ft", stream(48140));
        // weak_refs starts at 1, so a single weak delete destroys it.
        store.delete("call-E", "ft", true).unwrap();
        assert!(store.find_stream("call-E", "ft", None).is_err());
    }

    #[test]
    fn purge_clears_every_session() {
        let store = SessionStore::new();
        store.create_session("call-F", "ft1", stream(48150));
        store.create_session("call-G", "ft2", stream(48152));
        assert_eq!(store.purge(), 2);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn active_streams_counts_one_per_leg() {
        let store = SessionStore::new();
        store.create_session("call-I", "ft", stream(48170));
        assert_eq!(store.active_streams(), 1);
        store.promote_session("call-I", "ft", "tt", stream(48172)).unwrap();
        assert_eq!(store.active_streams(), 2);
    }

    #[test]
    fn delete_all_then_lookup_is_session_not_found() {
        let store = SessionStore::new();
        store.create_session("call-H", "ft", stream(48160));
        store.purge();
        assert!(store.promote_session("call-H", "ft", "tt", stream(48162)).is_err());
    }
}
