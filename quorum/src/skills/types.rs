//! Skill catalog types and capability extraction

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    /// Written but not yet promoted
    Draft,
    /// Promoted and available for reuse
    Active,
    /// Retired manually or by automation
    Deprecated,
    /// Marked broken
    Failed,
}

impl std::fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A named, versioned, sandbox-validated code artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Unique name; doubles as the artifact file stem
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Source code text (the artifact file holds the same content)
    pub code: String,

    /// Version counter, bumped on replacement
    pub version: u32,

    /// Lifecycle status
    pub status: SkillStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Serialized test results from the promoting run
    #[serde(default)]
    pub test_results: Option<serde_json::Value>,

    /// Number of executions
    #[serde(default)]
    pub usage_count: u64,

    /// Running success average over executions
    #[serde(default)]
    pub success_rate: f64,

    /// Capability tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Skill {
    /// Create a fresh draft skill
    pub fn new(name: String, code: String, description: String, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            name,
            description,
            code,
            version: 1,
            status: SkillStatus::Draft,
            created_at: now,
            updated_at: now,
            test_results: None,
            usage_count: 0,
            success_rate: 0.0,
            tags,
        }
    }

    /// Record one execution outcome into the running success average
    pub fn record_outcome(&mut self, success: bool) {
        self.usage_count += 1;
        let n = self.usage_count as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = ((self.success_rate * (n - 1.0)) + outcome) / n;
        self.updated_at = Utc::now();
    }
}

/// Listing entry: name plus artifact path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    pub path: String,
}

/// Extract capability tags from skill code: structured `# capability:`
/// comments plus import-based inference.
pub fn extract_capabilities(code: &str) -> Vec<String> {
    let mut capabilities = Vec::new();

    let comment_pattern =
        Regex::new(r"(?m)#\s*capability:\s*(.+)$").expect("capability pattern compiles");
    for capture in comment_pattern.captures_iter(code) {
        for tag in capture[1].split(',') {
            let tag = tag.trim();
            if !tag.is_empty() {
                capabilities.push(tag.to_string());
            }
        }
    }

    // Import-based inference
    if code.contains("import requests") || code.contains("import urllib") || code.contains("import httpx")
    {
        capabilities.push("web_access".to_string());
    }
    if code.contains("open(") && (code.contains("'w'") || code.contains("\"w\"")) {
        capabilities.push("file_write".to_string());
    }
    if code.to_ascii_lowercase().contains("desktop") {
        capabilities.push("desktop_save".to_string());
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_running_average() {
        let mut skill = Skill::new(
            "s".to_string(),
            "def run(m, c): pass".to_string(),
            String::new(),
            vec![],
        );

        skill.record_outcome(true);
        assert!((skill.success_rate - 1.0).abs() < f64::EPSILON);

        skill.record_outcome(false);
        assert!((skill.success_rate - 0.5).abs() < f64::EPSILON);

        skill.record_outcome(true);
        assert!((skill.success_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(skill.usage_count, 3);
    }

    #[test]
    fn test_capability_comments() {
        let code = "# capability: poem_generation, file_write\n# capability: desktop_save\ndef run(m, c): pass\n";
        let caps = extract_capabilities(code);
        assert!(caps.contains(&"poem_generation".to_string()));
        assert!(caps.contains(&"file_write".to_string()));
        assert!(caps.contains(&"desktop_save".to_string()));
    }

    #[test]
    fn test_import_inference() {
        let code = "import requests\ndef run(m, c):\n    with open('x', 'w') as f: pass\n";
        let caps = extract_capabilities(code);
        assert!(caps.contains(&"web_access".to_string()));
        assert!(caps.contains(&"file_write".to_string()));
    }

    #[test]
    fn test_no_capabilities() {
        assert!(extract_capabilities("def run(m, c): return {}").is_empty());
    }
}
