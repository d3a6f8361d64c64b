//! Safety validator — static deny-list gate for generated skill code
//!
//! Pure pattern matching over the code text. This is a defense-in-depth
//! gate, not a guarantee: the sandbox remains the real enforcement
//! boundary. Rejected code never reaches the sandbox.

use regex::Regex;

/// Deny-listed constructs: (pattern, human-readable violation)
const DENY_RULES: &[(&str, &str)] = &[
    (r"\beval\s*\(", "eval() dynamic evaluation"),
    (r"\bexec\s*\(", "exec() dynamic evaluation"),
    (r"\b__import__\s*\(", "__import__ dynamic import"),
    (r"\bos\.system\s*\(", "os.system() process spawning"),
    (r"\bsubprocess\.", "subprocess module usage"),
    (r"\bshutil\.rmtree\s*\(", "shutil.rmtree() recursive deletion"),
    (r"\bos\.remove\s*\(", "os.remove() without validation"),
    (r"\.\./", "path traversal sequence"),
];

/// Required entry-point signature for every skill
const ENTRY_POINT: &str = "def run(";

/// Token that must accompany any file-open call
const SAFE_PATHS_TOKEN: &str = "safe_paths";

/// Outcome of a validation pass
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Whether the code passed every rule
    pub is_safe: bool,
    /// Violated rules, empty when safe
    pub violations: Vec<String>,
}

/// Static safety gate over generated code
pub struct SafetyValidator {
    rules: Vec<(Regex, &'static str)>,
}

impl SafetyValidator {
    pub fn new() -> Self {
        let rules = DENY_RULES
            .iter()
            .map(|(pattern, description)| {
                (
                    Regex::new(pattern).expect("deny rule compiles"),
                    *description,
                )
            })
            .collect();
        Self { rules }
    }

    /// Validate code against the deny list and structural requirements.
    /// Pure and synchronous; no side effects.
    pub fn validate(&self, code: &str) -> Verdict {
        let mut violations = Vec::new();

        for (rule, description) in &self.rules {
            if rule.is_match(code) {
                violations.push(description.to_string());
            }
        }

        if !code.contains(ENTRY_POINT) {
            violations.push("missing required run() entry point".to_string());
        }

        // Heuristic: file writes must reference the caller-provided safe
        // paths; the sandbox enforces the actual boundary
        if code.contains("open(") && !code.contains(SAFE_PATHS_TOKEN) {
            violations.push("file operations must use safe_paths from context".to_string());
        }

        Verdict {
            is_safe: violations.is_empty(),
            violations,
        }
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}
