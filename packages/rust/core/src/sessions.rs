//! In-memory conversation history keyed by session id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::generation::{Role, Turn};

#[derive(Debug)]
struct Session {
    turns: Vec<Turn>,
    last_activity: Instant,
}

/// Conversation turns per session. Sessions idle for longer than the TTL
/// are dropped by [`ConversationStore::purge_expired`].
#[derive(Debug)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, session_id: &str, role: Role, content: impl Into<String>) {
        let mut sessions = self.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                turns: Vec::new(),
                last_activity: Instant::now(),
            });
        session.turns.push(Turn::new(role, content));
        session.last_activity = Instant::now();
    }

    /// The last `limit` turns of a session, oldest first.
    pub fn history(&self, session_id: &str, limit: usize) -> Vec<Turn> {
        self.lock()
            .get(session_id)
            .map(|s| {
                let skip = s.turns.len().saturating_sub(limit);
                s.turns[skip..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    /// Drop idle sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_activity) <= self.ttl);
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, remaining = sessions.len(), "expired sessions purged");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_and_ordered() {
        let store = ConversationStore::new(Duration::from_secs(60));
        for i in 0..5 {
            store.add("s1", Role::User, format!("q{i}"));
            store.add("s1", Role::Assistant, format!("a{i}"));
        }

        let history = store.history("s1", 3);
        let contents: Vec<_> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["a3", "q4", "a4"]);
        assert!(store.history("unknown", 3).is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = ConversationStore::new(Duration::from_secs(60));
        store.add("a", Role::User, "hola");
        store.add("b", Role::User, "chau");
        assert_eq!(store.history("a", 10), vec![Turn::new(Role::User, "hola")]);
        store.clear("a");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn idle_sessions_purged() {
        let store = ConversationStore::new(Duration::from_secs(60 * 60));
        store.add("old", Role::User, "hola");
        store.add("fresh", Role::User, "hola");

        assert_eq!(store.purge_expired(), 0);

        let later = Instant::now() + Duration::from_secs(61 * 60);
        {
            let mut sessions = store.lock();
            if let Some(fresh) = sessions.get_mut("fresh") {
                fresh.last_activity = later;
            }
        }
        assert_eq!(store.purge_expired_at(later), 1);
        assert_eq!(store.history("fresh", 5).len(), 1);
        assert!(store.history("old", 5).is_empty());
    }
}
