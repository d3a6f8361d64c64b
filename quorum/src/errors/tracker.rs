//! Error tracking with pattern detection and bounded retention
//!
//! Every caught failure in the system lands here as a `SystemError`.
//! Retention is a ring: oldest entries are evicted past the configured
//! maximum. Errors are optionally persisted as an append-only JSONL log
//! (one object per line, severity serialized as its string label).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ErrorSettings;

/// Recurring-pattern alert threshold: occurrences within the window
const PATTERN_THRESHOLD: usize = 3;
/// Recurring-pattern detection window
const PATTERN_WINDOW_SECS: i64 = 600;

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One tracked system error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemError {
    /// Unique identifier
    pub id: String,

    /// When the error was logged
    pub timestamp: DateTime<Utc>,

    /// Free-text category, e.g. "SKILL_EXECUTION_FAILED"
    pub error_type: String,

    /// Severity level
    pub severity: ErrorSeverity,

    /// Human-readable message
    pub message: String,

    /// Originating subsystem tag
    pub source: String,

    /// Optional captured stack trace
    #[serde(default)]
    pub stack_trace: Option<String>,

    /// Structured context
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,

    /// One-way resolution flag
    #[serde(default)]
    pub resolved: bool,

    /// Monotonically non-decreasing healing attempt counter
    #[serde(default)]
    pub resolution_attempts: u32,

    /// Healing session that resolved this error, when any
    #[serde(default)]
    pub healing_session_id: Option<String>,
}

/// Aggregate error statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub recent_errors: usize,
    pub critical_errors: usize,
    pub errors_by_severity: BTreeMap<String, usize>,
    pub errors_by_source: BTreeMap<String, usize>,
    pub errors_by_type: BTreeMap<String, usize>,
    pub resolution_rate: f64,
}

struct TrackerInner {
    errors: Vec<SystemError>,
    patterns: HashMap<String, Vec<DateTime<Utc>>>,
    seq: u64,
}

/// Central error log shared across subsystems
pub struct ErrorTracker {
    inner: RwLock<TrackerInner>,
    max_errors: usize,
    persist_path: Option<PathBuf>,
}

impl ErrorTracker {
    pub fn new(settings: &ErrorSettings) -> Self {
        let tracker = Self {
            inner: RwLock::new(TrackerInner {
                errors: Vec::new(),
                patterns: HashMap::new(),
                seq: 0,
            }),
            max_errors: settings.max_errors,
            persist_path: settings.persist_path.clone(),
        };
        tracker.load_persisted();
        tracker
    }

    /// Log a new error and return its id. Recurring patterns (3+
    /// occurrences of the same type/source pair inside ten minutes) raise a
    /// high-severity meta-error.
    pub fn log_error(
        &self,
        error_type: &str,
        message: impl Into<String>,
        severity: ErrorSeverity,
        source: &str,
        context: BTreeMap<String, serde_json::Value>,
        stack_trace: Option<String>,
    ) -> String {
        let mut persisted = Vec::with_capacity(2);
        let id;
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.seq += 1;
            id = format!("err_{}_{}", Utc::now().timestamp_millis(), inner.seq);

            let error = SystemError {
                id: id.clone(),
                timestamp: Utc::now(),
                error_type: error_type.to_string(),
                severity,
                message: message.into(),
                source: source.to_string(),
                stack_trace,
                context,
                resolved: false,
                resolution_attempts: 0,
                healing_session_id: None,
            };
            persisted.push(error.clone());

            if let Some(alert) = detect_pattern(&mut inner, &error) {
                persisted.push(alert.clone());
                inner.errors.push(alert);
            }
            inner.errors.push(error);

            let len = inner.errors.len();
            if len > self.max_errors {
                inner.errors.drain(0..len - self.max_errors);
            }
        }

        for error in &persisted {
            self.persist(error);
        }
        id
    }

    /// Fetch an error snapshot by id
    pub fn get(&self, id: &str) -> Option<SystemError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.errors.iter().find(|e| e.id == id).cloned()
    }

    /// Mark an error resolved (one-way) and link its healing session
    pub fn mark_resolved(&self, id: &str, healing_session_id: Option<String>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.errors.iter_mut().find(|e| e.id == id) {
            Some(error) => {
                error.resolved = true;
                if healing_session_id.is_some() {
                    error.healing_session_id = healing_session_id;
                }
                true
            }
            None => false,
        }
    }

    /// Increment an error's healing attempt counter
    pub fn increment_attempts(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.errors.iter_mut().find(|e| e.id == id) {
            Some(error) => {
                error.resolution_attempts += 1;
                true
            }
            None => false,
        }
    }

    /// Unresolved errors newer than the window
    pub fn recent_errors(&self, window: std::time::Duration) -> Vec<SystemError> {
        let cutoff = Utc::now() - Duration::seconds(window.as_secs() as i64);
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .errors
            .iter()
            .filter(|e| e.timestamp > cutoff && !e.resolved)
            .cloned()
            .collect()
    }

    /// All unresolved critical errors
    pub fn critical_errors(&self) -> Vec<SystemError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .errors
            .iter()
            .filter(|e| e.severity == ErrorSeverity::Critical && !e.resolved)
            .cloned()
            .collect()
    }

    /// Errors of one type, optionally unresolved only
    pub fn errors_by_type(&self, error_type: &str, unresolved_only: bool) -> Vec<SystemError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .errors
            .iter()
            .filter(|e| e.error_type == error_type && (!unresolved_only || !e.resolved))
            .cloned()
            .collect()
    }

    /// Errors from one source, optionally unresolved only
    pub fn errors_by_source(&self, source: &str, unresolved_only: bool) -> Vec<SystemError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .errors
            .iter()
            .filter(|e| e.source == source && (!unresolved_only || !e.resolved))
            .cloned()
            .collect()
    }

    /// Aggregate statistics snapshot
    pub fn statistics(&self) -> ErrorStatistics {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let errors = &inner.errors;

        let hour_ago = Utc::now() - Duration::hours(1);
        let mut by_severity = BTreeMap::new();
        let mut by_source = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for error in errors {
            *by_severity.entry(error.severity.to_string()).or_insert(0) += 1;
            *by_source.entry(error.source.clone()).or_insert(0) += 1;
            *by_type.entry(error.error_type.clone()).or_insert(0) += 1;
        }

        let resolved = errors.iter().filter(|e| e.resolved).count();
        ErrorStatistics {
            total_errors: errors.len(),
            recent_errors: errors
                .iter()
                .filter(|e| e.timestamp > hour_ago && !e.resolved)
                .count(),
            critical_errors: errors
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Critical && !e.resolved)
                .count(),
            errors_by_severity: by_severity,
            errors_by_source: by_source,
            errors_by_type: by_type,
            resolution_rate: if errors.is_empty() {
                0.0
            } else {
                resolved as f64 / errors.len() as f64
            },
        }
    }

    fn persist(&self, error: &SystemError) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = match serde_json::to_string(error) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize error for persistence: {}", e);
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                writeln!(f, "{line}")
            });
        if let Err(e) = result {
            // Never log errors about logging errors
            warn!("Failed to persist error: {}", e);
        }
    }

    fn load_persisted(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let Ok(raw) = std::fs::read_to_string(path) else {
            return;
        };
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<SystemError>(line) {
                Ok(error) => inner.errors.push(error),
                Err(e) => warn!("Skipping unreadable persisted error: {}", e),
            }
        }
        let len = inner.errors.len();
        if len > self.max_errors {
            inner.errors.drain(0..len - self.max_errors);
        }
    }
}

/// Track the type/source pair and produce a meta-error when it recurs.
/// Runs inside the tracker's write lock; meta-errors are exempt from
/// detection to avoid alert cascades.
fn detect_pattern(inner: &mut TrackerInner, error: &SystemError) -> Option<SystemError> {
    if error.error_type == "PATTERN_DETECTED" {
        return None;
    }

    let key = format!("{}:{}", error.error_type, error.source);
    let now = Utc::now();
    let window_start = now - Duration::seconds(PATTERN_WINDOW_SECS);

    let timestamps = inner.patterns.entry(key.clone()).or_default();
    timestamps.push(error.timestamp);
    timestamps.retain(|ts| *ts > now - Duration::hours(1));

    let recent = timestamps.iter().filter(|ts| **ts > window_start).count();
    if recent < PATTERN_THRESHOLD {
        return None;
    }

    inner.seq += 1;
    let mut context = BTreeMap::new();
    context.insert("pattern".to_string(), serde_json::json!(key));
    context.insert("count".to_string(), serde_json::json!(recent));
    context.insert(
        "original_error_id".to_string(),
        serde_json::json!(error.id),
    );

    Some(SystemError {
        id: format!("err_{}_{}", now.timestamp_millis(), inner.seq),
        timestamp: now,
        error_type: "PATTERN_DETECTED".to_string(),
        severity: ErrorSeverity::High,
        message: format!("Recurring error pattern: {key} ({recent} occurrences in 10 minutes)"),
        source: "error_tracker".to_string(),
        stack_trace: None,
        context,
        resolved: false,
        resolution_attempts: 0,
        healing_session_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ErrorTracker {
        ErrorTracker::new(&ErrorSettings {
            max_errors: 10,
            persist_path: None,
        })
    }

    #[test]
    fn test_log_and_lookup() {
        let t = tracker();
        let id = t.log_error(
            "SANDBOX_FAILED",
            "exit 1",
            ErrorSeverity::Medium,
            "sandbox",
            BTreeMap::new(),
            None,
        );
        let error = t.get(&id).unwrap();
        assert_eq!(error.error_type, "SANDBOX_FAILED");
        assert!(!error.resolved);
        assert_eq!(error.resolution_attempts, 0);
    }

    #[test]
    fn test_resolution_is_one_way() {
        let t = tracker();
        let id = t.log_error(
            "X",
            "m",
            ErrorSeverity::Low,
            "test",
            BTreeMap::new(),
            None,
        );
        assert!(t.mark_resolved(&id, Some("heal-1".to_string())));
        let error = t.get(&id).unwrap();
        assert!(error.resolved);
        assert_eq!(error.healing_session_id.as_deref(), Some("heal-1"));

        // A second resolution never clears the flag or the link
        assert!(t.mark_resolved(&id, None));
        let error = t.get(&id).unwrap();
        assert!(error.resolved);
        assert_eq!(error.healing_session_id.as_deref(), Some("heal-1"));
    }

    #[test]
    fn test_attempts_monotone() {
        let t = tracker();
        let id = t.log_error(
            "X",
            "m",
            ErrorSeverity::Low,
            "test",
            BTreeMap::new(),
            None,
        );
        t.increment_attempts(&id);
        t.increment_attempts(&id);
        assert_eq!(t.get(&id).unwrap().resolution_attempts, 2);
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let t = tracker();
        let mut last = String::new();
        for i in 0..15 {
            // Distinct sources keep pattern detection out of this test
            last = t.log_error(
                "FLOOD",
                format!("msg {i}"),
                ErrorSeverity::Low,
                &format!("source_{i}"),
                BTreeMap::new(),
                None,
            );
        }
        let stats = t.statistics();
        assert!(stats.total_errors <= 10);
        assert!(t.get(&last).is_some());
    }

    #[test]
    fn test_pattern_detection_raises_meta_error() {
        let t = tracker();
        for _ in 0..3 {
            t.log_error(
                "TIMEOUT",
                "slow",
                ErrorSeverity::Medium,
                "llm",
                BTreeMap::new(),
                None,
            );
        }
        let alerts = t.errors_by_type("PATTERN_DETECTED", true);
        assert!(!alerts.is_empty());
        assert_eq!(alerts[0].severity, ErrorSeverity::High);
        assert_eq!(alerts[0].source, "error_tracker");
    }

    #[test]
    fn test_filters() {
        let t = tracker();
        t.log_error(
            "A",
            "m",
            ErrorSeverity::Critical,
            "pipeline",
            BTreeMap::new(),
            None,
        );
        t.log_error("B", "m", ErrorSeverity::Low, "healer", BTreeMap::new(), None);

        assert_eq!(t.critical_errors().len(), 1);
        assert_eq!(t.errors_by_source("healer", true).len(), 1);
        assert_eq!(
            t.recent_errors(std::time::Duration::from_secs(60)).len(),
            2
        );
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        let settings = ErrorSettings {
            max_errors: 100,
            persist_path: Some(path.clone()),
        };

        let id = {
            let t = ErrorTracker::new(&settings);
            t.log_error(
                "PERSISTED",
                "survives restarts",
                ErrorSeverity::High,
                "test",
                BTreeMap::new(),
                None,
            )
        };

        let reloaded = ErrorTracker::new(&settings);
        let error = reloaded.get(&id).unwrap();
        assert_eq!(error.error_type, "PERSISTED");

        // JSONL format: one object per line, severity as its label
        let raw = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(line["severity"], serde_json::json!("high"));
    }
}
