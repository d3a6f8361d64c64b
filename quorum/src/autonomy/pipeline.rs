//! Autonomy pipeline — user intent to promoted, executed skill
//!
//! One invocation runs the full state machine: intent detection, existing
//! capability scan, collaborative generation, safety validation, sandbox
//! testing with a bounded healing loop, promotion, and optional immediate
//! execution. The pipeline always returns a response; failures come back
//! as structured results, never as propagated errors.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collab::CollabEngine;
use crate::config::AutonomySettings;
use crate::errors::{ErrorSeverity, ErrorTracker};
use crate::safety::SafetyValidator;
use crate::sandbox::{SandboxExecutor as _, SharedSandbox};
use crate::skills::{
    execution_harness, extract_capabilities, SharedSkillRegistry, SkillOutcome,
};

use super::audit::{content_hash, AuditEvent, AuditLog};
use super::extract::extract_code;
use super::intent::IntentDetector;

/// One sandbox attempt inside the healing loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed attempt number
    pub attempt: u32,
    pub success: bool,
    pub exit_code: i32,
    /// Execution output, truncated for the audit record
    pub output: String,
    pub execution_time: f64,
    pub backend: String,
}

/// A skill matched during the existing-capability scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMatch {
    pub name: String,
    pub capabilities: Vec<String>,
    pub match_score: usize,
}

/// Terminal response of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineResponse {
    /// The request needs no autonomous action
    NoAction,

    /// Essential information is missing
    Clarification {
        question: String,
        missing_params: Vec<String>,
    },

    /// An existing skill covered the request
    ExecutedExisting {
        skill_name: String,
        result: SkillOutcome,
    },

    /// A new skill was generated, tested, and promoted
    Promoted {
        skill_name: String,
        code_hash: String,
        attempts: u32,
        healing_sessions: u32,
        execution: Option<SkillOutcome>,
    },

    /// Generated code failed the safety gate
    Rejected { violations: Vec<String> },

    /// The pipeline exhausted its attempts or hit a hard failure
    Failed {
        error: String,
        attempt_results: Vec<AttemptRecord>,
        healing_sessions: u32,
    },
}

struct HealingRun {
    passed: bool,
    code: String,
    attempts: Vec<AttemptRecord>,
    healing_sessions: Vec<String>,
    violations: Option<Vec<String>>,
}

/// End-to-end controller from detected intent to promoted skill
pub struct AutonomyPipeline {
    engine: Arc<CollabEngine>,
    registry: SharedSkillRegistry,
    validator: SafetyValidator,
    sandbox: SharedSandbox,
    audit: AuditLog,
    tracker: Arc<ErrorTracker>,
    detector: IntentDetector,
    settings: AutonomySettings,
}

impl AutonomyPipeline {
    pub fn new(
        engine: Arc<CollabEngine>,
        registry: SharedSkillRegistry,
        sandbox: SharedSandbox,
        tracker: Arc<ErrorTracker>,
        settings: AutonomySettings,
    ) -> Self {
        Self {
            engine,
            registry,
            validator: SafetyValidator::new(),
            sandbox,
            audit: AuditLog::new(&settings.audit_log_path),
            tracker,
            detector: IntentDetector::new(),
            settings,
        }
    }

    /// Run the full pipeline for one user request
    pub async fn process_request(
        &self,
        user_input: &str,
        history: &[String],
    ) -> PipelineResponse {
        // Intent gate
        let report = self.detector.detect(user_input);
        if !report.actionable {
            return PipelineResponse::NoAction;
        }
        if !report.missing_params.is_empty() {
            return PipelineResponse::Clarification {
                question: self.detector.clarifying_question(&report.missing_params),
                missing_params: report.missing_params,
            };
        }

        // Reuse before regeneration
        if let Some(matched) = self.scan_existing(user_input).into_iter().next() {
            info!(skill = %matched.name, score = matched.match_score, "Trying existing skill");
            let result = self.registry.execute_by_name(&matched.name, user_input).await;
            if result.success {
                return PipelineResponse::ExecutedExisting {
                    skill_name: matched.name,
                    result,
                };
            }
            warn!(skill = %matched.name, "Existing skill failed; generating a new one");
        }

        // Generate, then test with healing
        let code = self.generate_skill_code(user_input, history).await;
        let mut run = self.test_with_healing(user_input, code).await;

        if let Some(violations) = run.violations.take() {
            return PipelineResponse::Rejected { violations };
        }

        if !run.passed {
            return PipelineResponse::Failed {
                error: "Skill creation failed after all healing attempts".to_string(),
                attempt_results: run.attempts,
                healing_sessions: run.healing_sessions.len() as u32,
            };
        }

        // Promote and optionally execute
        self.promote(user_input, run).await
    }

    /// Rank registered skills by capability overlap with the request
    pub fn scan_existing(&self, user_intent: &str) -> Vec<CapabilityMatch> {
        let intent_keywords: HashSet<String> = tokenize(user_intent);

        let mut matches: Vec<CapabilityMatch> = self
            .registry
            .skills()
            .into_iter()
            .filter_map(|skill| {
                let mut capabilities = skill.tags.clone();
                capabilities.extend(extract_capabilities(&skill.code));

                let capability_keywords: HashSet<String> = capabilities
                    .iter()
                    .flat_map(|c| tokenize(c))
                    .collect();

                let score = intent_keywords.intersection(&capability_keywords).count();
                if score == 0 {
                    return None;
                }
                Some(CapabilityMatch {
                    name: skill.name,
                    capabilities,
                    match_score: score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.match_score.cmp(&a.match_score).then(a.name.cmp(&b.name)));
        matches
    }

    /// Generate skill code via collaboration, with a templated stub as the
    /// consensus-failure fallback so the pipeline always moves forward
    pub async fn generate_skill_code(&self, user_intent: &str, history: &[String]) -> String {
        let prompt = self.generation_prompt(user_intent, history);
        let session_id = self.engine.broadcast(&prompt, None);

        self.engine
            .wait_for_completion(&session_id, self.settings.generation_timeout())
            .await;

        if let Ok(Some(winning)) = self.engine.winning_solution(&session_id) {
            if let Some(code) = extract_code(&winning.solution) {
                return code;
            }
        }

        warn!("No usable consensus; falling back to the skill template");
        basic_skill_template(user_intent)
    }

    /// Validate and sandbox-test code, healing on failure up to the attempt
    /// budget. Healing runs only between attempts, never after the last.
    async fn test_with_healing(&self, user_request: &str, code: String) -> HealingRun {
        let mut run = HealingRun {
            passed: false,
            code,
            attempts: Vec::new(),
            healing_sessions: Vec::new(),
            violations: None,
        };

        for attempt in 1..=self.settings.max_attempts {
            let verdict = self.validator.validate(&run.code);
            if !verdict.is_safe {
                warn!(violations = ?verdict.violations, "Safety gate rejected generated code");
                run.violations = Some(verdict.violations);
                return run;
            }

            let context = serde_json::json!({
                "safe_paths": self.registry.safe_paths_json(),
                "test_mode": true,
            });
            let harness = execution_harness(user_request, &context);

            let record = match self.sandbox.execute(&run.code, Some(&harness)).await {
                Ok(report) => AttemptRecord {
                    attempt,
                    success: report.success,
                    exit_code: report.exit_code,
                    output: truncate(&report.output, 2000),
                    execution_time: report.execution_time,
                    backend: report.backend,
                },
                Err(e) => AttemptRecord {
                    attempt,
                    success: false,
                    exit_code: -1,
                    output: e.to_string(),
                    execution_time: 0.0,
                    backend: "unavailable".to_string(),
                },
            };

            let success = record.success;
            info!(attempt, success, "Sandbox attempt finished");
            run.attempts.push(record);

            if success {
                run.passed = true;
                return run;
            }

            let last = run
                .attempts
                .last()
                .map(|r| r.output.clone())
                .unwrap_or_default();
            let mut err_context = BTreeMap::new();
            err_context.insert("user_request".to_string(), serde_json::json!(user_request));
            err_context.insert("attempt".to_string(), serde_json::json!(attempt));
            err_context.insert("sandbox_output".to_string(), serde_json::json!(last));
            self.tracker.log_error(
                "SKILL_EXECUTION_FAILED",
                format!("Sandbox attempt {attempt} failed"),
                ErrorSeverity::Medium,
                "skill_testing",
                err_context,
                None,
            );

            if attempt < self.settings.max_attempts {
                if let Some((session, corrected)) =
                    self.heal_failed_skill(user_request, &run).await
                {
                    run.healing_sessions.push(session);
                    if let Some(corrected) = corrected {
                        if corrected != run.code {
                            run.code = corrected;
                        }
                    }
                }
            }
        }

        run
    }

    /// Open a healing session for the failed code; returns the session id
    /// and the corrected code when one could be extracted
    async fn heal_failed_skill(
        &self,
        user_request: &str,
        run: &HealingRun,
    ) -> Option<(String, Option<String>)> {
        let last = run.attempts.last()?;
        let prompt = healing_prompt(user_request, &run.code, last);

        let session_id = self.engine.broadcast(&prompt, None);
        let complete = self
            .engine
            .wait_for_completion(&session_id, self.settings.healing_timeout())
            .await;

        if !complete {
            warn!(session_id = %session_id, "Skill healing session timed out");
            return Some((session_id, None));
        }

        let corrected = match self.engine.winning_solution(&session_id) {
            Ok(Some(winning)) => extract_code(&winning.solution),
            _ => None,
        };
        if corrected.is_none() {
            warn!(session_id = %session_id, "No corrected code extracted from healing session");
        }
        Some((session_id, corrected))
    }

    /// Promote tested code into the registry and audit the event
    async fn promote(&self, user_input: &str, run: HealingRun) -> PipelineResponse {
        let skill_name = format!("auto_skill_{}", Utc::now().timestamp());
        let code_hash = content_hash(&run.code);

        let artifact = format!(
            "\"\"\"\nSkill: {skill_name}\nGenerated: {generated}\nIntent: {intent}\nCode Hash: {code_hash}\n\"\"\"\n\n{code}",
            generated = Utc::now().format("%Y-%m-%d %H:%M:%S"),
            intent = user_input,
            code = run.code,
        );

        let test_results = serde_json::to_value(&run.attempts).ok();
        let promoted = self
            .registry
            .add(&skill_name, &artifact)
            .and_then(|_| self.registry.promote(&skill_name, test_results))
            .and_then(|skill| self.registry.reload().map(|_| skill));

        if let Err(e) = promoted {
            // Persistence failures surface directly; no retry
            return PipelineResponse::Failed {
                error: format!("Promotion failed: {e}"),
                attempt_results: run.attempts,
                healing_sessions: run.healing_sessions.len() as u32,
            };
        }

        let execution = if self.settings.execute_on_promote {
            Some(self.registry.execute_by_name(&skill_name, user_input).await)
        } else {
            None
        };

        let files_written = execution
            .as_ref()
            .and_then(|o| o.result.as_ref())
            .and_then(|r| r.get("files_created"))
            .and_then(|v| v.as_array())
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let event = AuditEvent {
            timestamp: Utc::now(),
            event_type: if execution.is_some() {
                "skill_promoted_and_executed".to_string()
            } else {
                "skill_promoted".to_string()
            },
            user_prompt_hash: content_hash(user_input),
            skill_name: skill_name.clone(),
            code_hash: code_hash.clone(),
            files_written,
            execution_result: execution
                .as_ref()
                .and_then(|o| serde_json::to_value(o).ok())
                .unwrap_or(serde_json::Value::Null),
            safe_paths_used: self.registry.safe_path_names(),
        };
        if let Err(e) = self.audit.append(&event) {
            warn!("Failed to append audit event: {}", e);
        }

        info!(skill = %skill_name, attempts = run.attempts.len(), "Skill promoted");

        PipelineResponse::Promoted {
            skill_name,
            code_hash,
            attempts: run.attempts.len() as u32,
            healing_sessions: run.healing_sessions.len() as u32,
            execution,
        }
    }

    /// Audit log handle for read-back
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn generation_prompt(&self, user_intent: &str, history: &[String]) -> String {
        let recent: Vec<&str> = history
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(String::as_str)
            .collect();
        let safe_paths = serde_json::to_string_pretty(&self.registry.safe_paths_json())
            .unwrap_or_else(|_| "{}".to_string());

        format!(
            "Generate a Python skill that accomplishes this task: {user_intent}\n\n\
             Conversation context:\n{context}\n\n\
             Requirements:\n\
             1. Define a run(message: str, context: dict) -> dict function\n\
             2. Use context['safe_paths'] for every file operation\n\
             3. Return a dict with 'success': bool, 'result': str, 'files_created': list\n\
             4. Handle errors gracefully and return error details\n\
             5. Add capability comments like: # capability: poem_generation, file_write\n\n\
             Safe paths available:\n{safe_paths}\n\n\
             Provide the complete skill code in a fenced python block.",
            context = recent.join("\n"),
        )
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// Minimal templated stub used when consensus fails; keeps the pipeline
/// moving instead of hanging on generation
pub fn basic_skill_template(user_intent: &str) -> String {
    let summary: String = user_intent.chars().take(100).collect();
    format!(
        "# capability: {summary}\n\n\
         def run(message, context):\n    \
         safe_paths = context.get('safe_paths', {{}})\n    \
         return {{\n        \
         'success': True,\n        \
         'result': 'Basic skill template - needs implementation',\n        \
         'files_created': []\n    \
         }}\n"
    )
}

/// Healing prompt embedding the failed code and its execution evidence
fn healing_prompt(user_request: &str, failed_code: &str, last: &AttemptRecord) -> String {
    format!(
        "SKILL EXECUTION FAILED - HEALING REQUIRED\n\n\
         === ORIGINAL REQUEST ===\n{user_request}\n\n\
         === FAILED SOLUTION ===\n```python\n{failed_code}\n```\n\n\
         === EXECUTION RESULTS ===\n\
         Success: {success}\n\
         Exit code: {exit_code}\n\
         Backend: {backend}\n\n\
         === ERROR OUTPUT ===\n{output}\n\n\
         === TASK ===\n\
         Analyze the failure and provide a CORRECTED version of the skill \
         code. Fix syntax errors, logic errors, missing imports, and \
         unhandled runtime exceptions. The corrected code will be tested \
         immediately in the sandbox.\n\n\
         === RESPONSE FORMAT ===\n\
         Analysis: [what went wrong]\n\
         Corrected_Code: [the complete corrected Python code]\n\
         Key_Changes: [list of changes made]\n\
         Confidence: [HIGH/MEDIUM/LOW]",
        success = last.success,
        exit_code = last.exit_code,
        backend = last.backend,
        output = last.output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_on_non_word() {
        let tokens = tokenize("Add two numbers, then save-to desktop!");
        assert!(tokens.contains("add"));
        assert!(tokens.contains("numbers"));
        assert!(tokens.contains("save"));
        assert!(tokens.contains("desktop"));
    }

    #[test]
    fn test_template_is_safe_and_runnable_shape() {
        let template = basic_skill_template("write a poem about rust");
        assert!(template.contains("def run(message, context):"));
        assert!(template.contains("safe_paths"));
        assert!(template.contains("# capability:"));

        let verdict = crate::safety::SafetyValidator::new().validate(&template);
        assert!(verdict.is_safe, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 100), "short");
        let truncated = truncate(&"é".repeat(100), 9);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_healing_prompt_embeds_evidence() {
        let record = AttemptRecord {
            attempt: 1,
            success: false,
            exit_code: 1,
            output: "NameError: name 'requests' is not defined".to_string(),
            execution_time: 0.2,
            backend: "docker".to_string(),
        };
        let prompt = healing_prompt("fetch a page", "def run(m, c): pass", &record);
        assert!(prompt.contains("fetch a page"));
        assert!(prompt.contains("NameError"));
        assert!(prompt.contains("Corrected_Code:"));
    }
}
