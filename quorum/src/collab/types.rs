//! Core types for collaboration sessions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for collaboration sessions
pub type SessionId = String;

/// Lifecycle status of a collaboration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Workers are still producing phase output
    Active,
    /// Every participant reached a terminal phase (vote or error)
    Completed,
    /// The completion wait gave up and the worker set was cancelled
    TimedOut,
}

/// Protocol phase an agent output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Proposal,
    Refinement,
    Vote,
    /// Worker failure captured as session-local output
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposal => write!(f, "proposal"),
            Self::Refinement => write!(f, "refinement"),
            Self::Vote => write!(f, "vote"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One round of proposal/refinement/voting across agents for a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    /// Unique session identifier
    pub id: SessionId,

    /// The originating request text
    pub user_input: String,

    /// Session creation timestamp
    pub created_at: DateTime<Utc>,

    /// Current lifecycle status
    pub status: SessionStatus,

    /// Participating agent names in configuration order
    pub participants: Vec<String>,

    /// Proposal text per agent
    pub proposals: BTreeMap<String, String>,

    /// Refinement text per agent
    pub refinements: BTreeMap<String, String>,

    /// Vote text per agent
    pub votes: BTreeMap<String, String>,

    /// Worker failures per agent
    pub errors: BTreeMap<String, String>,
}

impl CollaborationSession {
    /// Create a new active session
    pub fn new(id: SessionId, user_input: String, participants: Vec<String>) -> Self {
        Self {
            id,
            user_input,
            created_at: Utc::now(),
            status: SessionStatus::Active,
            participants,
            proposals: BTreeMap::new(),
            refinements: BTreeMap::new(),
            votes: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Union of proposals and refinements; refinements shadow proposals
    pub fn solutions(&self) -> BTreeMap<String, String> {
        let mut solutions = self.proposals.clone();
        for (agent, refinement) in &self.refinements {
            solutions.insert(agent.clone(), refinement.clone());
        }
        solutions
    }

    /// Best available solution text for one agent
    pub fn best_solution(&self, agent: &str) -> Option<&String> {
        self.refinements.get(agent).or_else(|| self.proposals.get(agent))
    }

    /// Whether every participant reached a terminal phase (vote or error)
    pub fn all_terminal(&self) -> bool {
        self.participants
            .iter()
            .all(|name| self.votes.contains_key(name) || self.errors.contains_key(name))
    }

    /// Seconds elapsed since creation
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

/// Winner of a session's vote tally with its best solution text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinningSolution {
    /// Winning agent name
    pub winner: String,
    /// Votes received by the winner
    pub vote_count: u32,
    /// Total parsed votes in the session
    pub total_votes: u32,
    /// The winner's solution (refinement preferred over proposal)
    pub solution: String,
    /// Full tally per candidate
    pub tallies: BTreeMap<String, u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CollaborationSession {
        CollaborationSession::new(
            "s1".to_string(),
            "do the thing".to_string(),
            vec!["alpha".to_string(), "beta".to_string()],
        )
    }

    #[test]
    fn test_refinements_shadow_proposals() {
        let mut s = session();
        s.proposals.insert("alpha".to_string(), "draft".to_string());
        s.proposals.insert("beta".to_string(), "plan".to_string());
        s.refinements.insert("alpha".to_string(), "polished".to_string());

        let solutions = s.solutions();
        assert_eq!(solutions["alpha"], "polished");
        assert_eq!(solutions["beta"], "plan");
        assert_eq!(s.best_solution("alpha").unwrap(), "polished");
        assert_eq!(s.best_solution("beta").unwrap(), "plan");
    }

    #[test]
    fn test_terminal_counts_errors() {
        let mut s = session();
        assert!(!s.all_terminal());

        s.votes.insert("alpha".to_string(), "VOTE: beta".to_string());
        assert!(!s.all_terminal());

        s.errors.insert("beta".to_string(), "provider unreachable".to_string());
        assert!(s.all_terminal());
    }
}
