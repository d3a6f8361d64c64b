//! Skill registry — persistent catalog of promoted skill artifacts
//!
//! Artifacts live as `.py` files under the registry root; metadata lives in
//! `index.json`, rewritten atomically (temp file + rename) so the catalog
//! survives restarts and crashed writers. Execution goes through the
//! sandbox executor with the production context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sandbox::{SandboxExecutor as _, SharedSandbox};

use super::types::{extract_capabilities, Skill, SkillStatus, SkillSummary};

const INDEX_FILE: &str = "index.json";

/// Name reserved for the built-in host-info skill
pub const BUILTIN_SYSTEM_INFO: &str = "system_info";

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid skill name '{0}'")]
    InvalidName(String),

    #[error("Skill not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Shared reference to a skill registry
pub type SharedSkillRegistry = Arc<SkillRegistry>;

/// Outcome of executing a skill by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub skill_name: String,
    pub success: bool,
    /// Structured result parsed from the skill's output, when present
    pub result: Option<serde_json::Value>,
    /// Error description on failure
    pub error: Option<String>,
}

/// Persistent catalog of named, versioned skill artifacts
pub struct SkillRegistry {
    root: PathBuf,
    sandbox: SharedSandbox,
    safe_paths: BTreeMap<String, PathBuf>,
    index: RwLock<BTreeMap<String, Skill>>,
}

impl SkillRegistry {
    /// Open (or create) a registry rooted at `root`
    pub fn open(
        root: impl Into<PathBuf>,
        sandbox: SharedSandbox,
        safe_paths: BTreeMap<String, PathBuf>,
    ) -> RegistryResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let registry = Self {
            root,
            sandbox,
            safe_paths,
            index: RwLock::new(BTreeMap::new()),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedSkillRegistry {
        Arc::new(self)
    }

    /// Registry root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reload the in-memory index: merge the persisted index with the
    /// artifacts actually on disk, drop entries whose artifact vanished,
    /// and register the built-in skill.
    pub fn reload(&self) -> RegistryResult<()> {
        let mut merged: BTreeMap<String, Skill> = BTreeMap::new();

        let index_path = self.root.join(INDEX_FILE);
        if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            match serde_json::from_str::<BTreeMap<String, Skill>>(&raw) {
                Ok(persisted) => merged = persisted,
                Err(e) => warn!("Discarding unreadable skill index: {}", e),
            }
        }

        // Artifacts on disk not present in the index get catalogued as
        // active skills (manually dropped-in files)
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if merged.contains_key(stem) {
                continue;
            }
            let code = std::fs::read_to_string(&path)?;
            let tags = extract_capabilities(&code);
            let mut skill = Skill::new(stem.to_string(), code, String::new(), tags);
            skill.status = SkillStatus::Active;
            merged.insert(stem.to_string(), skill);
        }

        // Drop index entries whose artifact vanished
        merged.retain(|name, _| self.skill_path(name).map(|p| p.exists()).unwrap_or(false));

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        *index = merged;
        Ok(())
    }

    /// Add (or replace) a skill artifact as a draft. Replacement bumps the
    /// version and carries usage statistics forward; at most one entry per
    /// name ever exists.
    pub fn add(&self, name: &str, code: &str) -> RegistryResult<Skill> {
        let path = self.skill_path(name)?;
        std::fs::write(&path, code)?;

        let tags = extract_capabilities(code);
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let skill = match index.remove(name) {
            Some(mut existing) => {
                existing.code = code.to_string();
                existing.version += 1;
                existing.status = SkillStatus::Draft;
                existing.tags = tags;
                existing.updated_at = chrono::Utc::now();
                existing
            }
            None => Skill::new(name.to_string(), code.to_string(), String::new(), tags),
        };
        index.insert(name.to_string(), skill.clone());
        drop(index);

        self.persist_index()?;
        info!(skill = name, version = skill.version, "Skill artifact written");
        Ok(skill)
    }

    /// Promote a draft skill to active, attaching test results from the
    /// qualifying run
    pub fn promote(
        &self,
        name: &str,
        test_results: Option<serde_json::Value>,
    ) -> RegistryResult<Skill> {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let skill = index
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        skill.status = SkillStatus::Active;
        skill.test_results = test_results;
        skill.updated_at = chrono::Utc::now();
        let promoted = skill.clone();
        drop(index);

        self.persist_index()?;
        info!(skill = name, "Skill promoted to active");
        Ok(promoted)
    }

    /// Transition a skill to deprecated or failed
    pub fn set_status(&self, name: &str, status: SkillStatus) -> RegistryResult<()> {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let skill = index
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        skill.status = status;
        skill.updated_at = chrono::Utc::now();
        drop(index);
        self.persist_index()
    }

    /// Whether a skill is registered
    pub fn exists(&self, name: &str) -> bool {
        if name == BUILTIN_SYSTEM_INFO {
            return true;
        }
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.contains_key(name)
    }

    /// Fetch a skill snapshot
    pub fn get(&self, name: &str) -> Option<Skill> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.get(name).cloned()
    }

    /// All registered skills (snapshots)
    pub fn skills(&self) -> Vec<Skill> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.values().cloned().collect()
    }

    /// Listing of name/path pairs, built-in included
    pub fn list(&self) -> Vec<SkillSummary> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<SkillSummary> = index
            .keys()
            .map(|name| SkillSummary {
                name: name.clone(),
                path: self.root.join(format!("{name}.py")).display().to_string(),
            })
            .collect();
        summaries.push(SkillSummary {
            name: BUILTIN_SYSTEM_INFO.to_string(),
            path: "builtin".to_string(),
        });
        summaries
    }

    /// Execute a registered skill against an input message through the
    /// sandbox with the production context. Outcome statistics are folded
    /// into the skill record.
    pub async fn execute_by_name(&self, name: &str, input: &str) -> SkillOutcome {
        if name == BUILTIN_SYSTEM_INFO {
            return SkillOutcome {
                skill_name: name.to_string(),
                success: true,
                result: Some(serde_json::json!({
                    "platform": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                    "cwd": std::env::current_dir()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                })),
                error: None,
            };
        }

        let Some(skill) = self.get(name) else {
            return SkillOutcome {
                skill_name: name.to_string(),
                success: false,
                result: None,
                error: Some(format!("Skill '{name}' not found")),
            };
        };

        let context = serde_json::json!({
            "safe_paths": self.safe_paths_json(),
            "production_mode": true,
        });
        let harness = execution_harness(input, &context);

        let outcome = match self.sandbox.execute(&skill.code, Some(&harness)).await {
            Ok(report) => {
                let parsed = parse_result_line(&report.output);
                let success = report.success
                    && parsed
                        .as_ref()
                        .and_then(|v| v.get("success"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(report.success);
                SkillOutcome {
                    skill_name: name.to_string(),
                    success,
                    result: parsed,
                    error: if success { None } else { Some(report.output) },
                }
            }
            Err(e) => SkillOutcome {
                skill_name: name.to_string(),
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        };

        if let Err(e) = self.record_outcome(name, outcome.success) {
            warn!(skill = name, "Failed to record outcome: {}", e);
        }
        outcome
    }

    /// Fold one execution outcome into a skill's usage statistics
    pub fn record_outcome(&self, name: &str, success: bool) -> RegistryResult<()> {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let skill = index
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        skill.record_outcome(success);
        drop(index);
        self.persist_index()
    }

    /// Safe paths as a JSON object of display strings
    pub fn safe_paths_json(&self) -> serde_json::Value {
        let map: BTreeMap<&str, String> = self
            .safe_paths
            .iter()
            .map(|(k, v)| (k.as_str(), v.display().to_string()))
            .collect();
        serde_json::json!(map)
    }

    /// Names of the configured safe paths
    pub fn safe_path_names(&self) -> Vec<String> {
        self.safe_paths.keys().cloned().collect()
    }

    /// Resolve and validate the artifact path for a skill name. Rejects
    /// path separators, traversal components, and anything resolving
    /// outside the registry root.
    fn skill_path(&self, name: &str) -> RegistryResult<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(RegistryError::InvalidName(name.to_string()));
        }

        let path = self.root.join(format!("{name}.py"));
        if path.parent() != Some(self.root.as_path()) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        Ok(path)
    }

    fn persist_index(&self) -> RegistryResult<()> {
        let snapshot = {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*index)?
        };
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        std::fs::write(&tmp, snapshot)?;
        std::fs::rename(&tmp, self.root.join(INDEX_FILE))?;
        Ok(())
    }
}

/// Build the execution harness appended to skill code. The payload travels
/// hex-encoded so arbitrary message content cannot break out of the
/// generated Python source.
pub fn execution_harness(message: &str, context: &serde_json::Value) -> String {
    let payload = serde_json::json!({ "message": message, "context": context });
    let encoded = hex::encode(payload.to_string());
    format!(
        "if __name__ == '__main__':\n    \
         import json\n    \
         _payload = json.loads(bytes.fromhex(\"{encoded}\").decode(\"utf-8\"))\n    \
         result = run(_payload[\"message\"], _payload[\"context\"])\n    \
         print(json.dumps(result))\n"
    )
}

/// Parse the last non-empty output line as the skill's structured result
pub fn parse_result_line(output: &str) -> Option<serde_json::Value> {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecutionReport, SandboxError, SandboxExecutor};
    use async_trait::async_trait;

    struct EchoSandbox;

    #[async_trait]
    impl SandboxExecutor for EchoSandbox {
        async fn execute(
            &self,
            _code: &str,
            _test_code: Option<&str>,
        ) -> Result<ExecutionReport, SandboxError> {
            Ok(ExecutionReport {
                success: true,
                exit_code: 0,
                output: "{\"success\": true, \"result\": \"ok\"}".to_string(),
                execution_time: 0.01,
                backend: "echo".to_string(),
            })
        }
    }

    fn open_registry(dir: &Path) -> SkillRegistry {
        SkillRegistry::open(dir, Arc::new(EchoSandbox), BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_name_validation() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open_registry(dir.path());

        for bad in ["../escape", "a/b", "a\\b", "", "name with spaces", "x;y"] {
            assert!(
                matches!(registry.add(bad, "code"), Err(RegistryError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(registry.add("good_name-1", "def run(m, c): pass").is_ok());
    }

    #[test]
    fn test_add_promote_replace() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open_registry(dir.path());

        let draft = registry.add("greet", "def run(m, c): return {}").unwrap();
        assert_eq!(draft.status, SkillStatus::Draft);
        assert_eq!(draft.version, 1);

        let active = registry.promote("greet", None).unwrap();
        assert_eq!(active.status, SkillStatus::Active);

        // Promoting the same name again replaces deterministically:
        // still a single entry, version bumped
        let replaced = registry.add("greet", "def run(m, c): return {'v': 2}").unwrap();
        assert_eq!(replaced.version, 2);
        registry.promote("greet", None).unwrap();

        let actives: Vec<_> = registry
            .skills()
            .into_iter()
            .filter(|s| s.name == "greet" && s.status == SkillStatus::Active)
            .collect();
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].version, 2);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = open_registry(dir.path());
            registry.add("persist_me", "def run(m, c): return {}").unwrap();
            registry.promote("persist_me", None).unwrap();
        }

        let reopened = open_registry(dir.path());
        let skill = reopened.get("persist_me").unwrap();
        assert_eq!(skill.status, SkillStatus::Active);
        assert!(reopened.exists("persist_me"));
    }

    #[test]
    fn test_dropped_in_artifact_catalogued_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("manual.py"),
            "# capability: manual_work\ndef run(m, c): return {}",
        )
        .unwrap();

        let registry = open_registry(dir.path());
        let skill = registry.get("manual").unwrap();
        assert_eq!(skill.status, SkillStatus::Active);
        assert!(skill.tags.contains(&"manual_work".to_string()));
    }

    #[test]
    fn test_listing_includes_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open_registry(dir.path());
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&BUILTIN_SYSTEM_INFO.to_string()));
        assert!(registry.exists(BUILTIN_SYSTEM_INFO));
    }

    #[tokio::test]
    async fn test_execute_by_name_records_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open_registry(dir.path());
        registry.add("echoer", "def run(m, c): return {}").unwrap();
        registry.promote("echoer", None).unwrap();

        let outcome = registry.execute_by_name("echoer", "hello").await;
        assert!(outcome.success);
        assert_eq!(
            outcome.result.unwrap()["result"],
            serde_json::json!("ok")
        );

        let skill = registry.get("echoer").unwrap();
        assert_eq!(skill.usage_count, 1);
        assert!((skill.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_execute_unknown_skill() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open_registry(dir.path());
        let outcome = registry.execute_by_name("ghost", "hello").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not found"));
    }

    #[test]
    fn test_parse_result_line() {
        let output = "some log noise\n{\"success\": true, \"result\": \"done\"}\n";
        let parsed = parse_result_line(output).unwrap();
        assert_eq!(parsed["success"], serde_json::json!(true));

        assert!(parse_result_line("no json here").is_none());
        assert!(parse_result_line("").is_none());
    }

    #[test]
    fn test_execution_harness_is_hex_encoded() {
        let harness = execution_harness(
            "tricky '''message\"\n",
            &serde_json::json!({"safe_paths": {}}),
        );
        assert!(harness.contains("bytes.fromhex"));
        // No raw message content leaks into the generated source
        assert!(!harness.contains("tricky"));
    }
}
