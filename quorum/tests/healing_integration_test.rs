//! Integration tests for the error healer
//!
//! Drives full healing sessions over scripted agents and checks the
//! eligibility predicate, the LOW-risk safe-action gate, and the
//! never-silently-dropped guarantee for recommendations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use quorum::collab::{CollabEngine, InMemorySessionStore};
use quorum::config::{
    AgentConfig, AgentParams, CollabSettings, ErrorSettings, HealerSettings,
};
use quorum::errors::{ErrorHealer, ErrorSeverity, ErrorTracker};
use quorum::invoker::{AgentInvoker, InvokerResult};

const VOTE_MARKER: &str = "Respond with exactly: VOTE:";

/// Agents answer healing prompts with a fixed structured solution and
/// vote for alpha
struct HealingInvoker {
    solution: &'static str,
}

#[async_trait]
impl AgentInvoker for HealingInvoker {
    async fn invoke(&self, _agent: &AgentConfig, prompt: &str) -> InvokerResult<String> {
        if prompt.contains(VOTE_MARKER) {
            return Ok("VOTE: alpha".to_string());
        }
        Ok(self.solution.to_string())
    }
}

/// Agents that never produce a parsable vote
struct AbstainingInvoker;

#[async_trait]
impl AgentInvoker for AbstainingInvoker {
    async fn invoke(&self, _agent: &AgentConfig, _prompt: &str) -> InvokerResult<String> {
        Ok("I would rather not commit to any of these.".to_string())
    }
}

fn agents(names: &[&str]) -> BTreeMap<String, AgentConfig> {
    names
        .iter()
        .map(|n| {
            (
                n.to_string(),
                AgentConfig {
                    enabled: true,
                    provider: "openai".to_string(),
                    model: "scripted".to_string(),
                    endpoint: String::new(),
                    api_key_env: None,
                    identity: n.to_string(),
                    role: String::new(),
                    params: AgentParams::default(),
                },
            )
        })
        .collect()
}

fn healer_with(invoker: Arc<dyn AgentInvoker>) -> (ErrorHealer, Arc<ErrorTracker>) {
    let engine = Arc::new(CollabEngine::new(
        InMemorySessionStore::new().shared(),
        invoker,
        agents(&["alpha", "beta"]),
        "conductor".to_string(),
        CollabSettings {
            settle_proposals_secs: 0,
            settle_refinements_secs: 0,
            completion_timeout_secs: 10,
            active_window_secs: 300,
        },
    ));
    let tracker = Arc::new(ErrorTracker::new(&ErrorSettings::default()));
    let healer = ErrorHealer::new(
        tracker.clone(),
        engine,
        HealerSettings {
            monitor_interval_secs: 1,
            cooldown_secs: 300,
            max_attempts: 3,
            recent_window_secs: 120,
            session_timeout_secs: 10,
        },
    );
    (healer, tracker)
}

fn log_critical(tracker: &ErrorTracker) -> String {
    tracker.log_error(
        "DATABASE_UNREACHABLE",
        "connection pool exhausted",
        ErrorSeverity::Critical,
        "storage",
        BTreeMap::new(),
        Some("trace: pool.acquire".to_string()),
    )
}

/// A LOW-risk recommendation naming an unimplemented safe action is
/// attempted and lands in actions_skipped, never silently dropped.
#[tokio::test]
async fn test_low_risk_unmatched_action_recorded() {
    const SOLUTION: &str = "\
Analysis: cache bloat is starving the pool
Immediate_Action: clear_cache to release memory
Permanent_Fix: bound the cache
Prevention: add cache-size alerts
Risk_Level: LOW
Confidence: HIGH";

    let (healer, tracker) = healer_with(Arc::new(HealingInvoker { solution: SOLUTION }));
    let id = log_critical(&tracker);

    healer.tick().await;

    // Attempt is counted even though nothing executed
    let error = tracker.get(&id).unwrap();
    assert_eq!(error.resolution_attempts, 1);
    assert!(!error.resolved);

    // The completed-session record carries the skipped action
    let completed = tracker.errors_by_type("HEALING_COMPLETED", true);
    assert_eq!(completed.len(), 1);
    let skipped = completed[0].context["actions_skipped"].as_array().unwrap();
    assert!(
        skipped
            .iter()
            .any(|s| s.as_str().unwrap().contains("clear_cache")),
        "clear_cache must be recorded: {skipped:?}"
    );
    assert!(completed[0].context["actions_executed"]
        .as_array()
        .unwrap()
        .is_empty());
}

/// A LOW-risk cleanup_temp recommendation executes and resolves the
/// original error, linking the healing session.
#[tokio::test]
async fn test_low_risk_cleanup_resolves_error() {
    const SOLUTION: &str = "\
Analysis: stale scratch directories are filling the disk
Immediate_Action: cleanup_temp to reclaim space
Permanent_Fix: rotate scratch dirs on startup
Prevention: disk usage alerts
Risk_Level: LOW
Confidence: HIGH";

    let (healer, tracker) = healer_with(Arc::new(HealingInvoker { solution: SOLUTION }));
    let id = log_critical(&tracker);

    healer.tick().await;

    let error = tracker.get(&id).unwrap();
    assert!(error.resolved);
    let session = error.healing_session_id.unwrap();
    assert!(session.starts_with(&format!("heal_{id}")));

    let completed = tracker.errors_by_type("HEALING_COMPLETED", true);
    let executed = completed[0].context["actions_executed"].as_array().unwrap();
    assert!(executed
        .iter()
        .any(|s| s.as_str().unwrap() == "cleanup_temp"));
}

/// Non-LOW recommendations are recorded but never auto-executed.
#[tokio::test]
async fn test_high_risk_never_executes() {
    const SOLUTION: &str = "\
Analysis: the schema is corrupted
Immediate_Action: cleanup_temp and restart_service immediately
Permanent_Fix: restore from backup
Prevention: checksums
Risk_Level: HIGH
Confidence: MEDIUM";

    let (healer, tracker) = healer_with(Arc::new(HealingInvoker { solution: SOLUTION }));
    let id = log_critical(&tracker);

    healer.tick().await;

    let error = tracker.get(&id).unwrap();
    assert!(!error.resolved);

    let completed = tracker.errors_by_type("HEALING_COMPLETED", true);
    assert!(completed[0].context["actions_executed"]
        .as_array()
        .unwrap()
        .is_empty());
    let skipped = completed[0].context["actions_skipped"].as_array().unwrap();
    assert!(skipped
        .iter()
        .any(|s| s.as_str().unwrap().contains("HIGH risk")));
}

/// A session with no parsable votes logs a distinct no-consensus
/// meta-error and still consumes a retry attempt.
#[tokio::test]
async fn test_no_consensus_logs_meta_error() {
    let (healer, tracker) = healer_with(Arc::new(AbstainingInvoker));
    let id = log_critical(&tracker);

    healer.tick().await;

    let error = tracker.get(&id).unwrap();
    assert!(!error.resolved);
    assert_eq!(error.resolution_attempts, 1);

    let meta = tracker.errors_by_type("HEALING_NO_CONSENSUS", true);
    assert_eq!(meta.len(), 1);
    assert_eq!(meta[0].severity, ErrorSeverity::Medium);
    assert_eq!(
        meta[0].context["original_error_id"],
        serde_json::json!(id)
    );
}

/// Cooldown and the attempt cap stop re-triggering.
#[tokio::test]
async fn test_cooldown_blocks_immediate_retry() {
    const SOLUTION: &str = "\
Analysis: transient network blip
Immediate_Action: reset_connection
Permanent_Fix: retry with backoff
Prevention: connection health checks
Risk_Level: LOW
Confidence: LOW";

    let (healer, tracker) = healer_with(Arc::new(HealingInvoker { solution: SOLUTION }));
    let id = log_critical(&tracker);

    healer.tick().await;
    assert_eq!(tracker.get(&id).unwrap().resolution_attempts, 1);

    // Within the cooldown window the same error is not re-healed
    healer.tick().await;
    assert_eq!(tracker.get(&id).unwrap().resolution_attempts, 1);
}

/// Resolved errors and exhausted budgets are ineligible.
#[tokio::test]
async fn test_eligibility_predicate() {
    let (healer, tracker) = healer_with(Arc::new(AbstainingInvoker));

    let resolved_id = log_critical(&tracker);
    tracker.mark_resolved(&resolved_id, None);
    let resolved = tracker.get(&resolved_id).unwrap();
    assert!(!healer.should_heal(&resolved));

    let exhausted_id = log_critical(&tracker);
    for _ in 0..3 {
        tracker.increment_attempts(&exhausted_id);
    }
    let exhausted = tracker.get(&exhausted_id).unwrap();
    assert!(!healer.should_heal(&exhausted));

    let fresh_id = log_critical(&tracker);
    let fresh = tracker.get(&fresh_id).unwrap();
    assert!(healer.should_heal(&fresh));
}
