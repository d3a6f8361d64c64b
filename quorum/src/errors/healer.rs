//! Error healer — collaboration-driven remediation of tracked errors
//!
//! A monitoring loop picks up unresolved errors, opens a collaboration
//! session whose prompt is the error context, parses the winning solution
//! into labeled sections, and executes only LOW-risk recommendations that
//! match a fixed table of idempotent remediation routines. Everything else
//! is recorded, never auto-executed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collab::CollabEngine;
use crate::config::HealerSettings;

use super::tracker::{ErrorSeverity, ErrorTracker, SystemError};

/// Labeled sections a healing response must carry
const SECTION_MARKERS: &[&str] = &[
    "analysis",
    "immediate_action",
    "permanent_fix",
    "prevention",
    "risk_level",
    "confidence",
];

/// Remediation routines safe to run without a human
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeAction {
    RestartService,
    ClearCache,
    ResetConnection,
    IncreaseTimeout,
    CleanupTemp,
    LogRotation,
}

impl SafeAction {
    /// All safe actions, matched in this order
    pub fn all() -> &'static [SafeAction] {
        &[
            Self::RestartService,
            Self::ClearCache,
            Self::ResetConnection,
            Self::IncreaseTimeout,
            Self::CleanupTemp,
            Self::LogRotation,
        ]
    }

    /// Keyword that must appear in the recommended immediate action
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::RestartService => "restart_service",
            Self::ClearCache => "clear_cache",
            Self::ResetConnection => "reset_connection",
            Self::IncreaseTimeout => "increase_timeout",
            Self::CleanupTemp => "cleanup_temp",
            Self::LogRotation => "log_rotation",
        }
    }
}

/// Result of the safe-action pass over one healing recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether at least one action ran successfully
    pub success: bool,
    /// Risk level the recommendation carried
    pub risk_level: String,
    /// Actions that ran
    pub actions_executed: Vec<String>,
    /// Actions that matched but were skipped, with reasons
    pub actions_skipped: Vec<String>,
}

/// Healing subsystem statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingStatistics {
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub healer_errors: usize,
    pub errors_in_cooldown: usize,
    pub average_attempts: f64,
}

struct HealerState {
    active: HashSet<String>,
    cooldowns: HashMap<String, Instant>,
    sessions: HashMap<String, String>,
}

/// Monitors the error tracker and drives healing sessions
pub struct ErrorHealer {
    tracker: Arc<ErrorTracker>,
    engine: Arc<CollabEngine>,
    settings: HealerSettings,
    state: Mutex<HealerState>,
}

impl ErrorHealer {
    pub fn new(
        tracker: Arc<ErrorTracker>,
        engine: Arc<CollabEngine>,
        settings: HealerSettings,
    ) -> Self {
        Self {
            tracker,
            engine,
            settings,
            state: Mutex::new(HealerState {
                active: HashSet::new(),
                cooldowns: HashMap::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Continuous monitoring loop; never returns
    pub async fn run(&self) {
        info!(
            interval_secs = self.settings.monitor_interval_secs,
            "Error healing monitor started"
        );
        loop {
            self.tick().await;
            tokio::time::sleep(self.settings.monitor_interval()).await;
        }
    }

    /// One monitoring pass: find eligible errors and heal them
    pub async fn tick(&self) {
        let mut candidates: Vec<SystemError> = self.tracker.critical_errors();
        for error in self.tracker.recent_errors(self.settings.recent_window()) {
            if matches!(error.severity, ErrorSeverity::High | ErrorSeverity::Medium) {
                candidates.push(error);
            }
        }

        let mut seen = HashSet::new();
        for error in candidates {
            if !seen.insert(error.id.clone()) {
                continue;
            }
            if self.should_heal(&error) {
                self.heal(error).await;
            }
        }
    }

    /// Eligibility predicate for one error
    pub fn should_heal(&self, error: &SystemError) -> bool {
        if error.resolved {
            return false;
        }
        if error.resolution_attempts >= self.settings.max_attempts {
            return false;
        }

        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active.contains(&error.id) {
            return false;
        }
        if let Some(last) = state.cooldowns.get(&error.id) {
            if last.elapsed() < self.settings.cooldown() {
                return false;
            }
        }
        true
    }

    /// Run one healing session for an error
    pub async fn heal(&self, error: SystemError) {
        let session_id = format!(
            "heal_{}_{}",
            error.id,
            chrono::Utc::now().timestamp_millis()
        );

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active.insert(error.id.clone());
            state.cooldowns.insert(error.id.clone(), Instant::now());
            state.sessions.insert(error.id.clone(), session_id.clone());
        }
        // Attempts count even when the session produces nothing, so the
        // retry budget always exhausts
        self.tracker.increment_attempts(&error.id);

        info!(
            error_id = %error.id,
            session_id = %session_id,
            error_type = %error.error_type,
            severity = %error.severity,
            "Initiating healing session"
        );

        let prompt = self.healing_prompt(&error);
        let session = self.engine.broadcast(&prompt, Some(session_id.clone()));
        let complete = self
            .engine
            .wait_for_completion(&session, self.settings.session_timeout())
            .await;

        if complete {
            self.process_results(&error, &session).await;
        } else {
            warn!(error_id = %error.id, "Healing session timed out");
            let mut context = BTreeMap::new();
            context.insert(
                "original_error_id".to_string(),
                serde_json::json!(error.id),
            );
            context.insert("session_id".to_string(), serde_json::json!(session));
            self.tracker.log_error(
                "HEALING_TIMEOUT",
                format!("Healing session timed out for error {}", error.id),
                ErrorSeverity::Medium,
                "error_healer",
                context,
                None,
            );
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active.remove(&error.id);
    }

    async fn process_results(&self, error: &SystemError, session_id: &str) {
        let winning = match self.engine.winning_solution(session_id) {
            Ok(Some(winning)) => winning,
            _ => {
                let mut context = BTreeMap::new();
                context.insert(
                    "original_error_id".to_string(),
                    serde_json::json!(error.id),
                );
                context.insert("session_id".to_string(), serde_json::json!(session_id));
                self.tracker.log_error(
                    "HEALING_NO_CONSENSUS",
                    format!("No healing consensus reached for error {}", error.id),
                    ErrorSeverity::Medium,
                    "error_healer",
                    context,
                    None,
                );
                return;
            }
        };

        info!(
            error_id = %error.id,
            winner = %winning.winner,
            votes = winning.vote_count,
            "Healing solution identified"
        );

        let sections = parse_solution_sections(&winning.solution);
        let outcome = self.execute_safe_actions(&sections).await;

        let mut context = BTreeMap::new();
        context.insert(
            "original_error_id".to_string(),
            serde_json::json!(error.id),
        );
        context.insert("session_id".to_string(), serde_json::json!(session_id));
        context.insert("winner".to_string(), serde_json::json!(winning.winner));
        context.insert(
            "vote_count".to_string(),
            serde_json::json!(winning.vote_count),
        );
        context.insert(
            "actions_executed".to_string(),
            serde_json::json!(outcome.actions_executed),
        );
        context.insert(
            "actions_skipped".to_string(),
            serde_json::json!(outcome.actions_skipped),
        );
        self.tracker.log_error(
            "HEALING_COMPLETED",
            format!("Healing session completed for {}", error.error_type),
            ErrorSeverity::Low,
            "error_healer",
            context,
            None,
        );

        if outcome.success {
            self.tracker
                .mark_resolved(&error.id, Some(session_id.to_string()));
            info!(error_id = %error.id, "Error marked resolved by healing");
        }
    }

    /// Execute safe actions matched from the recommendation. Only LOW-risk
    /// recommendations run; every match lands in either `actions_executed`
    /// or `actions_skipped`, never silently dropped.
    pub async fn execute_safe_actions(&self, sections: &BTreeMap<String, String>) -> ActionOutcome {
        let immediate = sections
            .get("immediate_action")
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        let risk_level = sections
            .get("risk_level")
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or_else(|| "HIGH".to_string());

        let mut outcome = ActionOutcome {
            success: false,
            risk_level: risk_level.clone(),
            actions_executed: Vec::new(),
            actions_skipped: Vec::new(),
        };

        if risk_level != "LOW" {
            outcome
                .actions_skipped
                .push(format!("skipped: {risk_level} risk level"));
            warn!(risk_level = %risk_level, "Skipping automatic healing");
            return outcome;
        }

        for action in SafeAction::all() {
            if !immediate.contains(action.keyword()) {
                continue;
            }
            match self.run_action(*action).await {
                Ok(()) => {
                    info!(action = action.keyword(), "Executed healing action");
                    outcome.actions_executed.push(action.keyword().to_string());
                }
                Err(reason) => {
                    outcome
                        .actions_skipped
                        .push(format!("{}: {}", action.keyword(), reason));
                }
            }
        }

        outcome.success = !outcome.actions_executed.is_empty();
        outcome
    }

    async fn run_action(&self, action: SafeAction) -> Result<(), String> {
        match action {
            SafeAction::CleanupTemp => cleanup_temp_files(),
            // Placeholders until a concrete, idempotent routine exists for
            // the deployment; skipped entries keep the audit trail honest
            SafeAction::RestartService => Err("service restart not implemented".to_string()),
            SafeAction::ClearCache => Err("cache clearing not implemented".to_string()),
            SafeAction::ResetConnection => Err("connection reset not implemented".to_string()),
            SafeAction::IncreaseTimeout => Err("timeout adjustment not implemented".to_string()),
            SafeAction::LogRotation => Err("log rotation not implemented".to_string()),
        }
    }

    /// Structured error dump used as the healing session prompt
    fn healing_prompt(&self, error: &SystemError) -> String {
        let context = serde_json::to_string_pretty(&error.context)
            .unwrap_or_else(|_| "{}".to_string());
        let related = self.tracker.errors_by_type(&error.error_type, true).len();
        let stats = self.tracker.statistics();

        format!(
            "SYSTEM ERROR DETECTED - HEALING MODE\n\n\
             === ERROR DETAILS ===\n\
             ID: {id}\n\
             Type: {error_type}\n\
             Severity: {severity}\n\
             Source: {source}\n\
             Attempts: {attempts}/{max_attempts}\n\n\
             === ERROR MESSAGE ===\n{message}\n\n\
             === CONTEXT ===\n{context}\n\n\
             === STACK TRACE ===\n{stack_trace}\n\n\
             === SYSTEM STATUS ===\n\
             Recent errors: {recent}\n\
             Critical errors: {critical}\n\
             Related '{error_type}' errors: {related}\n\n\
             === MISSION ===\n\
             Collaborate to diagnose this error. Provide root-cause analysis, \
             an immediate low-risk mitigation, and a permanent fix.\n\n\
             === RESPONSE FORMAT ===\n\
             Analysis: [root-cause diagnosis]\n\
             Immediate_Action: [concrete steps to take right now]\n\
             Permanent_Fix: [long-term solution]\n\
             Prevention: [monitoring or changes preventing recurrence]\n\
             Risk_Level: [LOW/MEDIUM/HIGH - risk of applying your solution]\n\
             Confidence: [LOW/MEDIUM/HIGH]\n\n\
             Prioritize solutions that do not disrupt ongoing operations. \
             Vote for the solution that best balances effectiveness and safety.",
            id = error.id,
            error_type = error.error_type,
            severity = error.severity,
            source = error.source,
            attempts = error.resolution_attempts,
            max_attempts = self.settings.max_attempts,
            message = error.message,
            context = context,
            stack_trace = error.stack_trace.as_deref().unwrap_or("Not available"),
            recent = stats.recent_errors,
            critical = stats.critical_errors,
            related = related,
        )
    }

    /// Healing subsystem statistics
    pub fn statistics(&self) -> HealingStatistics {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let healer_errors = self.tracker.errors_by_source("error_healer", false).len();

        let attempted: Vec<u32> = self
            .tracker
            .statistics()
            .errors_by_type
            .keys()
            .filter_map(|t| {
                self.tracker
                    .errors_by_type(t, false)
                    .into_iter()
                    .map(|e| e.resolution_attempts)
                    .max()
            })
            .filter(|a| *a > 0)
            .collect();
        let average_attempts = if attempted.is_empty() {
            0.0
        } else {
            attempted.iter().sum::<u32>() as f64 / attempted.len() as f64
        };

        HealingStatistics {
            active_sessions: state.active.len(),
            total_sessions: state.sessions.len(),
            healer_errors,
            errors_in_cooldown: state.cooldowns.len(),
            average_attempts,
        }
    }
}

/// Parse a healing response into its labeled sections. Markers are matched
/// at line starts, case-insensitive; content accumulates until the next
/// marker.
pub fn parse_solution_sections(solution: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut content: Vec<String> = Vec::new();

    for line in solution.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();

        let marker = SECTION_MARKERS
            .iter()
            .find(|m| lower.starts_with(&format!("{m}:")));

        if let Some(marker) = marker {
            if let Some(section) = current.take() {
                sections.insert(section, content.join(" ").trim().to_string());
            }
            current = Some(marker.to_string());
            content = vec![trimmed[marker.len() + 1..].trim().to_string()];
        } else if current.is_some() && !trimmed.is_empty() {
            content.push(trimmed.to_string());
        }
    }

    if let Some(section) = current {
        sections.insert(section, content.join(" ").trim().to_string());
    }
    sections
}

/// Remove stale sandbox scratch directories from the system temp dir
fn cleanup_temp_files() -> Result<(), String> {
    let temp = std::env::temp_dir();
    let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
    let entries = std::fs::read_dir(&temp).map_err(|e| e.to_string())?;

    let mut cleaned = 0usize;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("quorum_") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified > cutoff {
            continue;
        }
        let removed = if metadata.is_dir() {
            std::fs::remove_dir_all(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        if removed.is_ok() {
            cleaned += 1;
        }
    }

    info!(cleaned, "Temp cleanup finished");
    Ok(())
}
