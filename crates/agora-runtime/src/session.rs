//! Conversation sessions: which session id to reuse for a peer.

use agora_wire::unix_now;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

type ConversationKey = (String, Option<String>);

#[derive(Debug, Clone, Copy)]
struct Entry {
    session: Uuid,
    last_used: u64,
}

/// Session ids keyed by (peer address, protocol digest).
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<ConversationKey, Entry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session to use for the next envelope to `peer`: the explicit one if
    /// given, else the conversation's existing one, else a fresh id.
    pub fn select(&self, peer: &str, protocol: Option<&str>, explicit: Option<Uuid>) -> Uuid {
        if let Some(session) = explicit {
            return session;
        }
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&(peer.to_string(), protocol.map(str::to_string)))
            .map_or_else(Uuid::new_v4, |entry| entry.session)
    }

    pub fn get(&self, peer: &str, protocol: Option<&str>) -> Option<Uuid> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&(peer.to_string(), protocol.map(str::to_string)))
            .map(|entry| entry.session)
    }

    pub fn remember(&self, peer: &str, protocol: Option<&str>, session: Uuid) {
        self.remember_at(peer, protocol, session, unix_now());
    }

    /// Like [`SessionTable::remember`], with an explicit activity time.
    pub fn remember_at(&self, peer: &str, protocol: Option<&str>, session: Uuid, now: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            (peer.to_string(), protocol.map(str::to_string)),
            Entry {
                session,
                last_used: now,
            },
        );
    }

    /// Forget the conversation, but only if it still uses `session`.
    pub fn end(&self, peer: &str, protocol: Option<&str>, session: Uuid) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let key = (peer.to_string(), protocol.map(str::to_string));
        if sessions.get(&key).map(|entry| entry.session) == Some(session) {
            sessions.remove(&key);
        }
    }

    /// Forget conversations with no traffic for more than `max_idle_secs`.
    pub fn prune_idle(&self, now: u64, max_idle_secs: u64) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.saturating_add(max_idle_secs) >= now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_wins() {
        let table = SessionTable::new();
        let existing = Uuid::new_v4();
        let explicit = Uuid::new_v4();
        table.remember("bob", None, existing);
        assert_eq!(table.select("bob", None, Some(explicit)), explicit);
    }

    #[test]
    fn test_existing_reused_per_protocol() {
        let table = SessionTable::new();
        let s = Uuid::new_v4();
        table.remember("bob", Some("proto:a"), s);
        assert_eq!(table.select("bob", Some("proto:a"), None), s);
        assert_ne!(table.select("bob", Some("proto:b"), None), s);
        assert_ne!(table.select("carol", Some("proto:a"), None), s);
    }

    #[test]
    fn test_fresh_sessions_differ() {
        let table = SessionTable::new();
        assert_ne!(table.select("bob", None, None), table.select("bob", None, None));
        assert!(table.is_empty());
    }

    #[test]
    fn test_end_only_matching_session() {
        let table = SessionTable::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        table.remember("bob", None, s2);
        table.end("bob", None, s1);
        assert_eq!(table.get("bob", None), Some(s2));
        table.end("bob", None, s2);
        assert!(table.get("bob", None).is_none());
    }

    #[test]
    fn test_prune_idle_conversations() {
        let table = SessionTable::new();
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();
        table.remember_at("bob", None, stale, 100);
        table.remember_at("carol", None, live, 500);

        assert_eq!(table.prune_idle(400, 300), 0);
        assert_eq!(table.prune_idle(600, 300), 1);
        assert!(table.get("bob", None).is_none());
        assert_eq!(table.get("carol", None), Some(live));

        // Fresh activity resets the idle clock.
        table.remember_at("carol", None, live, 900);
        assert_eq!(table.prune_idle(1000, 300), 0);
        assert_eq!(table.len(), 1);
    }
}
