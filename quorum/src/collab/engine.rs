//! Collaboration engine — broadcast, per-agent workers, winner resolution
//!
//! `broadcast` creates a session and starts one worker per enabled agent.
//! Workers run the three-phase protocol (proposal, refinement, vote)
//! independently; phases are pipelined across agents and separated by
//! settling delays so peer output has a chance to land. Worker failures are
//! recorded as session-local error entries and never abort the session.
//!
//! Each session's workers are owned by a `JoinSet`, so a timed-out session
//! is cancelled as a unit instead of leaking in-flight agent calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, CollabSettings, QuorumConfig};
use crate::invoker::{AgentInvoker as _, SharedInvoker};

use super::store::{SessionStore as _, SharedSessionStore};
use super::types::{
    CollaborationSession, Phase, SessionId, SessionStatus, WinningSolution,
};

/// Poll interval for the completion wait
const COMPLETION_POLL: Duration = Duration::from_millis(250);

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Orchestrates the proposal/refinement/voting protocol across agents
pub struct CollabEngine {
    store: SharedSessionStore,
    invoker: SharedInvoker,
    agents: BTreeMap<String, AgentConfig>,
    orchestrator: String,
    settings: CollabSettings,
    vote_pattern: Regex,
    workers: Mutex<HashMap<SessionId, JoinSet<()>>>,
}

impl CollabEngine {
    /// Create an engine over an injected store and invoker
    pub fn new(
        store: SharedSessionStore,
        invoker: SharedInvoker,
        agents: BTreeMap<String, AgentConfig>,
        orchestrator: String,
        settings: CollabSettings,
    ) -> Self {
        Self {
            store,
            invoker,
            agents,
            orchestrator,
            settings,
            vote_pattern: Regex::new(r"(?i)vote:\s*([A-Za-z0-9_\-]+)")
                .expect("vote pattern compiles"),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Convenience constructor from runtime configuration
    pub fn from_config(
        config: &QuorumConfig,
        store: SharedSessionStore,
        invoker: SharedInvoker,
    ) -> Self {
        Self::new(
            store,
            invoker,
            config.agents.clone(),
            config.orchestrator.clone(),
            config.collaboration.clone(),
        )
    }

    /// Access the underlying session store
    pub fn store(&self) -> &SharedSessionStore {
        &self.store
    }

    /// Broadcast a request to all enabled agents and return immediately.
    ///
    /// Zero enabled agents yields a session with no participants, not an
    /// error; callers observe completion (trivially) and fall back.
    pub fn broadcast(&self, user_input: &str, session_id: Option<String>) -> SessionId {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let participants: Vec<String> = self
            .agents
            .iter()
            .filter(|(name, agent)| agent.enabled && *name != &self.orchestrator)
            .map(|(name, _)| name.clone())
            .collect();

        let session = CollaborationSession::new(
            session_id.clone(),
            user_input.to_string(),
            participants.clone(),
        );
        self.store.insert(session);

        info!(
            session_id = %session_id,
            participants = participants.len(),
            "Collaboration session broadcast"
        );

        let mut set = JoinSet::new();
        for name in participants {
            let agent = self.agents[&name].clone();
            let ctx = WorkerContext {
                store: self.store.clone(),
                invoker: self.invoker.clone(),
                session_id: session_id.clone(),
                agent_name: name,
                agent,
                user_input: user_input.to_string(),
                settle_proposals: self.settings.settle_proposals(),
                settle_refinements: self.settings.settle_refinements(),
            };
            set.spawn(run_agent_worker(ctx));
        }

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.insert(session_id.clone(), set);

        session_id
    }

    /// Poll until every participant reached a terminal phase or the timeout
    /// elapses. On timeout the session's worker set is aborted as a unit and
    /// the session is marked timed out; callers treat the incomplete session
    /// as a soft failure.
    pub async fn wait_for_completion(&self, session_id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let Some(session) = self.store.get(session_id) else {
                return false;
            };

            if session.all_terminal() {
                self.store.set_status(session_id, SessionStatus::Completed);
                self.drop_workers(session_id, false);
                return true;
            }

            if Instant::now() >= deadline {
                warn!(session_id, "Collaboration wait timed out; cancelling workers");
                self.drop_workers(session_id, true);
                self.store.set_status(session_id, SessionStatus::TimedOut);
                return false;
            }

            tokio::time::sleep(COMPLETION_POLL).await;
        }
    }

    /// Cancel a session's workers as a unit
    pub fn cancel_session(&self, session_id: &str) {
        self.drop_workers(session_id, true);
        self.store.set_status(session_id, SessionStatus::TimedOut);
    }

    fn drop_workers(&self, session_id: &str, abort: bool) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut set) = workers.remove(session_id) {
            if abort {
                set.abort_all();
            }
        }
    }

    /// Parse the `VOTE: <name>` pattern, case-insensitive
    pub fn parse_vote(&self, text: &str) -> Option<String> {
        self.vote_pattern
            .captures(text)
            .map(|c| c[1].to_ascii_lowercase())
    }

    /// Tally parsed votes for a session
    pub fn tally_votes(&self, session_id: &str) -> EngineResult<BTreeMap<String, u32>> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let mut tallies = BTreeMap::new();
        for vote_text in session.votes.values() {
            if let Some(candidate) = self.parse_vote(vote_text) {
                *tallies.entry(candidate).or_insert(0) += 1;
            }
        }
        Ok(tallies)
    }

    /// Resolve the winning solution for a session.
    ///
    /// Candidates are tallied in name order; the winner is taken with a
    /// strict comparison, so ties resolve to the lexicographically smallest
    /// agent name. Returns `None` when no vote parsed.
    pub fn winning_solution(&self, session_id: &str) -> EngineResult<Option<WinningSolution>> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let tallies = self.tally_votes(session_id)?;
        if tallies.is_empty() {
            return Ok(None);
        }

        let total_votes: u32 = tallies.values().sum();
        let mut winner = String::new();
        let mut best = 0;
        for (candidate, count) in &tallies {
            if *count > best {
                best = *count;
                winner = candidate.clone();
            }
        }

        let solution = session.best_solution(&winner).cloned().unwrap_or_default();

        debug!(session_id, winner = %winner, votes = best, "Winner resolved");

        Ok(Some(WinningSolution {
            winner,
            vote_count: best,
            total_votes,
            solution,
            tallies,
        }))
    }

    /// Sessions created within the active window, newest first
    pub fn active_sessions(&self) -> Vec<CollaborationSession> {
        let window = self.settings.active_window().as_secs() as i64;
        let mut sessions: Vec<CollaborationSession> = self
            .store
            .list()
            .into_iter()
            .filter(|s| s.age_secs() < window)
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }
}

/// Everything one worker needs, cloned out of the engine so the task is
/// `'static`
struct WorkerContext {
    store: SharedSessionStore,
    invoker: SharedInvoker,
    session_id: String,
    agent_name: String,
    agent: AgentConfig,
    user_input: String,
    settle_proposals: Duration,
    settle_refinements: Duration,
}

/// Run one agent through proposal, refinement, and vote. Failures at any
/// phase are recorded as error entries; the session never observes a panic
/// or propagated error from a worker.
async fn run_agent_worker(ctx: WorkerContext) {
    // Phase 1: proposal
    let proposal = match ctx
        .invoker
        .invoke(&ctx.agent, &proposal_prompt(&ctx.user_input, &ctx.session_id))
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(
                session_id = %ctx.session_id,
                agent = %ctx.agent_name,
                "Proposal phase failed: {}", e
            );
            ctx.store
                .record_phase(&ctx.session_id, &ctx.agent_name, Phase::Error, e.to_string());
            return;
        }
    };
    ctx.store.record_phase(
        &ctx.session_id,
        &ctx.agent_name,
        Phase::Proposal,
        proposal.clone(),
    );

    // Phase 2: refinement, once peers had a chance to write proposals.
    // Skipped when no peer proposal landed yet.
    tokio::time::sleep(ctx.settle_proposals).await;

    let peers = peer_proposals(&ctx);
    if !peers.is_empty() {
        let prompt = refinement_prompt(&ctx.user_input, &proposal, &peers);
        match ctx.invoker.invoke(&ctx.agent, &prompt).await {
            Ok(text) => {
                ctx.store
                    .record_phase(&ctx.session_id, &ctx.agent_name, Phase::Refinement, text);
            }
            Err(e) => {
                warn!(
                    session_id = %ctx.session_id,
                    agent = %ctx.agent_name,
                    "Refinement phase failed: {}", e
                );
                ctx.store
                    .record_phase(&ctx.session_id, &ctx.agent_name, Phase::Error, e.to_string());
                return;
            }
        }
    }

    // Phase 3: vote over the union of proposals and refinements
    tokio::time::sleep(ctx.settle_refinements).await;

    let solutions = match ctx.store.get(&ctx.session_id) {
        Some(session) => session.solutions(),
        None => return,
    };

    let prompt = vote_prompt(&ctx.user_input, &solutions);
    match ctx.invoker.invoke(&ctx.agent, &prompt).await {
        Ok(text) => {
            ctx.store
                .record_phase(&ctx.session_id, &ctx.agent_name, Phase::Vote, text);
            debug!(session_id = %ctx.session_id, agent = %ctx.agent_name, "Vote recorded");
        }
        Err(e) => {
            warn!(
                session_id = %ctx.session_id,
                agent = %ctx.agent_name,
                "Vote phase failed: {}", e
            );
            ctx.store
                .record_phase(&ctx.session_id, &ctx.agent_name, Phase::Error, e.to_string());
        }
    }
}

fn peer_proposals(ctx: &WorkerContext) -> BTreeMap<String, String> {
    match ctx.store.get(&ctx.session_id) {
        Some(session) => session
            .proposals
            .iter()
            .filter(|(name, _)| *name != &ctx.agent_name)
            .map(|(name, text)| (name.clone(), text.clone()))
            .collect(),
        None => BTreeMap::new(),
    }
}

fn proposal_prompt(user_input: &str, session_id: &str) -> String {
    format!(
        "User request: {user_input}\n\n\
         Collaboration session: {session_id}\n\n\
         You are working with a team of agents on this request. Produce your \
         initial proposal:\n\
         1. Analyze the request\n\
         2. Propose a solution approach\n\
         3. If a new skill is required, include a code implementation\n\n\
         Structure your response with Analysis, Approach, and Implementation \
         sections."
    )
}

fn refinement_prompt(
    user_input: &str,
    own_proposal: &str,
    peers: &BTreeMap<String, String>,
) -> String {
    let peer_text: Vec<String> = peers
        .iter()
        .map(|(name, text)| format!("=== {name} ===\n{text}"))
        .collect();

    format!(
        "User request: {user_input}\n\n\
         Your original proposal:\n{own_proposal}\n\n\
         Peer proposals:\n{}\n\n\
         Refine your solution in light of the peer proposals. Incorporate \
         good ideas, address weaknesses you see in other approaches, and \
         improve on your original. Provide the refined solution:",
        peer_text.join("\n\n")
    )
}

fn vote_prompt(user_input: &str, solutions: &BTreeMap<String, String>) -> String {
    let solutions_text: Vec<String> = solutions
        .iter()
        .map(|(name, text)| format!("=== {name} ===\n{text}"))
        .collect();

    format!(
        "User request: {user_input}\n\n\
         All team solutions (refinements included):\n{}\n\n\
         Vote for the single best solution, including your own if warranted. \
         Weigh correctness, safety, completeness, and likelihood of success.\n\n\
         Respond with exactly: VOTE: <agent_name>",
        solutions_text.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::store::{InMemorySessionStore, SessionStore};
    use crate::config::AgentParams;
    use crate::invoker::{AgentInvoker, InvokerError, InvokerResult};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct RefusingInvoker;

    #[async_trait]
    impl AgentInvoker for RefusingInvoker {
        async fn invoke(&self, _agent: &AgentConfig, _prompt: &str) -> InvokerResult<String> {
            Err(InvokerError::Http("unreachable".to_string()))
        }
    }

    fn agent(enabled: bool) -> AgentConfig {
        AgentConfig {
            enabled,
            provider: "openai".to_string(),
            model: "test".to_string(),
            endpoint: String::new(),
            api_key_env: None,
            identity: String::new(),
            role: String::new(),
            params: AgentParams::default(),
        }
    }

    fn engine_with(agents: BTreeMap<String, AgentConfig>) -> CollabEngine {
        CollabEngine::new(
            InMemorySessionStore::new().shared(),
            Arc::new(RefusingInvoker),
            agents,
            "conductor".to_string(),
            CollabSettings {
                settle_proposals_secs: 0,
                settle_refinements_secs: 0,
                completion_timeout_secs: 5,
                active_window_secs: 300,
            },
        )
    }

    fn seeded_session(engine: &CollabEngine, votes: &[(&str, &str)]) -> String {
        let mut session = CollaborationSession::new(
            "s1".to_string(),
            "request".to_string(),
            votes.iter().map(|(n, _)| n.to_string()).collect(),
        );
        for (name, vote) in votes {
            session
                .proposals
                .insert(name.to_string(), format!("{name} proposal"));
            session.votes.insert(name.to_string(), vote.to_string());
        }
        engine.store.insert(session);
        "s1".to_string()
    }

    #[test]
    fn test_parse_vote_case_insensitive() {
        let engine = engine_with(BTreeMap::new());
        assert_eq!(engine.parse_vote("VOTE: beta"), Some("beta".to_string()));
        assert_eq!(engine.parse_vote("vote:alpha"), Some("alpha".to_string()));
        assert_eq!(
            engine.parse_vote("After review...\nVote: Gamma-2\nbecause..."),
            Some("gamma-2".to_string())
        );
        assert_eq!(engine.parse_vote("no vote here"), None);
    }

    #[test]
    fn test_tally_and_winner() {
        let engine = engine_with(BTreeMap::new());
        let id = seeded_session(
            &engine,
            &[("a", "VOTE: b"), ("b", "VOTE: b"), ("c", "VOTE: a")],
        );

        let winning = engine.winning_solution(&id).unwrap().unwrap();
        assert_eq!(winning.winner, "b");
        assert_eq!(winning.vote_count, 2);
        assert_eq!(winning.total_votes, 3);
        assert_eq!(winning.solution, "b proposal");
        assert_eq!(winning.tallies["a"], 1);
        assert_eq!(winning.tallies["b"], 2);
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let engine = engine_with(BTreeMap::new());
        let id = seeded_session(&engine, &[("a", "VOTE: b"), ("b", "VOTE: a")]);

        let winning = engine.winning_solution(&id).unwrap().unwrap();
        assert_eq!(winning.winner, "a");
        assert_eq!(winning.vote_count, 1);
    }

    #[test]
    fn test_no_parsable_votes_yields_none() {
        let engine = engine_with(BTreeMap::new());
        let id = seeded_session(&engine, &[("a", "I abstain"), ("b", "unclear")]);
        assert!(engine.winning_solution(&id).unwrap().is_none());
    }

    #[test]
    fn test_unknown_session_errors() {
        let engine = engine_with(BTreeMap::new());
        assert!(matches!(
            engine.winning_solution("nope"),
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_agents_completes_empty() {
        let engine = engine_with(BTreeMap::new());
        let id = engine.broadcast("anything", None);

        let session = engine.store.get(&id).unwrap();
        assert!(session.participants.is_empty());

        // Trivially complete: every (zero) participant is terminal
        assert!(engine.wait_for_completion(&id, Duration::from_secs(1)).await);
        assert_eq!(
            engine.store.get(&id).unwrap().status,
            SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failing_agents_end_session_with_errors() {
        let mut agents = BTreeMap::new();
        agents.insert("alpha".to_string(), agent(true));
        agents.insert("beta".to_string(), agent(true));
        agents.insert("conductor".to_string(), agent(true));

        let engine = engine_with(agents);
        let id = engine.broadcast("do something", None);

        assert!(engine.wait_for_completion(&id, Duration::from_secs(5)).await);

        let session = engine.store.get(&id).unwrap();
        // The orchestrator identity never participates
        assert_eq!(session.participants.len(), 2);
        assert_eq!(session.errors.len(), 2);
        assert!(session.votes.is_empty());
        assert!(engine.winning_solution(&id).unwrap().is_none());
    }
}
