//! In-memory session store
//!
//! Session state lives behind an injected store object so tests can
//! substitute their own without process-wide globals. Mutations are single
//! lock-scoped assignments with no await points inside, which is what makes
//! concurrent worker writes safe.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::types::{CollaborationSession, Phase, SessionStatus};

/// Store interface for collaboration session state
pub trait SessionStore: Send + Sync {
    /// Insert a new session, replacing any previous entry with the same id
    fn insert(&self, session: CollaborationSession);

    /// Fetch a session snapshot by id
    fn get(&self, id: &str) -> Option<CollaborationSession>;

    /// All sessions, unordered
    fn list(&self) -> Vec<CollaborationSession>;

    /// Record one agent's phase output; returns false for unknown sessions
    fn record_phase(&self, id: &str, agent: &str, phase: Phase, content: String) -> bool;

    /// Update a session's lifecycle status; returns false for unknown sessions
    fn set_status(&self, id: &str, status: SessionStatus) -> bool;
}

/// Shared reference to a session store
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Default in-memory store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, CollaborationSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedSessionStore {
        Arc::new(self)
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: CollaborationSession) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.id.clone(), session);
    }

    fn get(&self, id: &str) -> Option<CollaborationSession> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(id).cloned()
    }

    fn list(&self) -> Vec<CollaborationSession> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.values().cloned().collect()
    }

    fn record_phase(&self, id: &str, agent: &str, phase: Phase, content: String) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        let map = match phase {
            Phase::Proposal => &mut session.proposals,
            Phase::Refinement => &mut session.refinements,
            Phase::Vote => &mut session.votes,
            Phase::Error => &mut session.errors,
        };
        map.insert(agent.to_string(), content);
        true
    }

    fn set_status(&self, id: &str, status: SessionStatus) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get_mut(id) {
            Some(session) => {
                session.status = status;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> InMemorySessionStore {
        let store = InMemorySessionStore::new();
        store.insert(CollaborationSession::new(
            "s1".to_string(),
            "request".to_string(),
            vec!["alpha".to_string()],
        ));
        store
    }

    #[test]
    fn test_record_phase_routing() {
        let store = seeded_store();

        assert!(store.record_phase("s1", "alpha", Phase::Proposal, "p".to_string()));
        assert!(store.record_phase("s1", "alpha", Phase::Refinement, "r".to_string()));
        assert!(store.record_phase("s1", "alpha", Phase::Vote, "VOTE: alpha".to_string()));

        let session = store.get("s1").unwrap();
        assert_eq!(session.proposals["alpha"], "p");
        assert_eq!(session.refinements["alpha"], "r");
        assert_eq!(session.votes["alpha"], "VOTE: alpha");
    }

    #[test]
    fn test_unknown_session_is_rejected() {
        let store = seeded_store();
        assert!(!store.record_phase("missing", "alpha", Phase::Proposal, "p".to_string()));
        assert!(!store.set_status("missing", SessionStatus::Completed));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_status_transition() {
        let store = seeded_store();
        assert!(store.set_status("s1", SessionStatus::TimedOut));
        assert_eq!(store.get("s1").unwrap().status, SessionStatus::TimedOut);
    }
}
