//! Configuration for the quorum runtime
//!
//! Loaded from a TOML file with environment overrides for operational knobs.
//! Credentials are never stored in the config: each agent carries an
//! `api_key_env` reference naming the environment variable to read at call
//! time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Per-agent request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParams {
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum response tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Context window hint (provider-specific, optional)
    #[serde(default)]
    pub context_window: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            context_window: None,
        }
    }
}

/// Configuration for one collaboration agent ("slot")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Whether this agent participates in collaboration
    #[serde(default)]
    pub enabled: bool,

    /// Provider identifier: "openai", "vultr", "nvidia", "custom",
    /// "ollama", or "anthropic"
    pub provider: String,

    /// Model identifier passed to the provider
    pub model: String,

    /// Endpoint URL (providers have sensible defaults when empty)
    #[serde(default)]
    pub endpoint: String,

    /// Name of the environment variable holding the API key.
    /// The raw secret is never placed in config.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Free-text identity prefixed to the system prompt
    #[serde(default)]
    pub identity: String,

    /// Free-text role description appended to the system prompt
    #[serde(default)]
    pub role: String,

    /// Request parameter bag
    #[serde(default)]
    pub params: AgentParams,
}

impl AgentConfig {
    /// System prompt assembled from identity and role
    pub fn system_prompt(&self) -> String {
        format!("{} {}", self.identity, self.role).trim().to_string()
    }
}

/// Settings for the collaboration engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabSettings {
    /// Delay before the refinement phase, letting peer proposals land
    #[serde(default = "default_settle_proposals_secs")]
    pub settle_proposals_secs: u64,

    /// Delay before the voting phase, letting refinements land
    #[serde(default = "default_settle_refinements_secs")]
    pub settle_refinements_secs: u64,

    /// Default wait for session completion
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Sessions older than this are excluded from active listings
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u64,
}

fn default_settle_proposals_secs() -> u64 {
    2
}

fn default_settle_refinements_secs() -> u64 {
    1
}

fn default_completion_timeout_secs() -> u64 {
    30
}

fn default_active_window_secs() -> u64 {
    300
}

impl CollabSettings {
    pub fn settle_proposals(&self) -> Duration {
        Duration::from_secs(self.settle_proposals_secs)
    }

    pub fn settle_refinements(&self) -> Duration {
        Duration::from_secs(self.settle_refinements_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }
}

impl Default for CollabSettings {
    fn default() -> Self {
        Self {
            settle_proposals_secs: default_settle_proposals_secs(),
            settle_refinements_secs: default_settle_refinements_secs(),
            completion_timeout_secs: default_completion_timeout_secs(),
            active_window_secs: default_active_window_secs(),
        }
    }
}

/// Settings for the autonomy pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomySettings {
    /// Maximum sandbox attempts (healing runs between attempts)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait for generation consensus before falling back to a stub
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Wait for a healing session during the retry loop
    #[serde(default = "default_healing_timeout_secs")]
    pub healing_timeout_secs: u64,

    /// Execute a freshly promoted skill against the originating request
    #[serde(default = "default_true")]
    pub execute_on_promote: bool,

    /// Caller-sanctioned write locations handed to skills as `safe_paths`
    #[serde(default)]
    pub safe_paths: BTreeMap<String, PathBuf>,

    /// Skill registry root directory
    #[serde(default = "default_registry_dir")]
    pub registry_dir: PathBuf,

    /// Append-only audit log path
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_healing_timeout_secs() -> u64 {
    45
}

fn default_true() -> bool {
    true
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("./skills")
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("./logs/skills_audit.jsonl")
}

impl AutonomySettings {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn healing_timeout(&self) -> Duration {
        Duration::from_secs(self.healing_timeout_secs)
    }
}

impl Default for AutonomySettings {
    fn default() -> Self {
        let mut safe_paths = BTreeMap::new();
        safe_paths.insert("data".to_string(), PathBuf::from("./data"));
        Self {
            max_attempts: default_max_attempts(),
            generation_timeout_secs: default_generation_timeout_secs(),
            healing_timeout_secs: default_healing_timeout_secs(),
            execute_on_promote: true,
            safe_paths,
            registry_dir: default_registry_dir(),
            audit_log_path: default_audit_log_path(),
        }
    }
}

/// Settings for the error healer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealerSettings {
    /// Monitor tick interval
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Cooldown between healing attempts on the same error
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Maximum healing attempts per error
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// High/medium errors are only healed inside this recency window
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,

    /// Wait for a healing collaboration session
    #[serde(default = "default_healer_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_recent_window_secs() -> u64 {
    120
}

fn default_healer_session_timeout_secs() -> u64 {
    90
}

impl HealerSettings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for HealerSettings {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            max_attempts: default_max_attempts(),
            recent_window_secs: default_recent_window_secs(),
            session_timeout_secs: default_healer_session_timeout_secs(),
        }
    }
}

/// Settings for the sandbox backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Container image used to run skill code
    #[serde(default = "default_sandbox_image")]
    pub image: String,

    /// Memory ceiling passed to the container runtime
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// CPU ceiling passed to the container runtime
    #[serde(default = "default_cpu_limit")]
    pub cpus: f64,

    /// Wall-clock timeout for one execution
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,

    /// Network mode; "none" disables network access
    #[serde(default = "default_network_mode")]
    pub network: String,
}

fn default_sandbox_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_memory_limit() -> String {
    "256m".to_string()
}

fn default_cpu_limit() -> f64 {
    0.5
}

fn default_sandbox_timeout_secs() -> u64 {
    60
}

fn default_network_mode() -> String {
    "none".to_string()
}

impl SandboxSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: default_sandbox_image(),
            memory_limit: default_memory_limit(),
            cpus: default_cpu_limit(),
            timeout_secs: default_sandbox_timeout_secs(),
            network: default_network_mode(),
        }
    }
}

/// Settings for error tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSettings {
    /// Maximum retained errors; oldest evicted first
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    /// Optional append-only JSONL persistence path
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

fn default_max_errors() -> usize {
    1000
}

impl Default for ErrorSettings {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
            persist_path: None,
        }
    }
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Agent name reserved for the orchestrator identity; it never
    /// participates in collaboration
    #[serde(default = "default_orchestrator")]
    pub orchestrator: String,

    /// Configured agents keyed by name
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,

    #[serde(default)]
    pub collaboration: CollabSettings,

    #[serde(default)]
    pub autonomy: AutonomySettings,

    #[serde(default)]
    pub healer: HealerSettings,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub errors: ErrorSettings,
}

fn default_orchestrator() -> String {
    "conductor".to_string()
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            orchestrator: default_orchestrator(),
            agents: BTreeMap::new(),
            collaboration: CollabSettings::default(),
            autonomy: AutonomySettings::default(),
            healer: HealerSettings::default(),
            sandbox: SandboxSettings::default(),
            errors: ErrorSettings::default(),
        }
    }
}

impl QuorumConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(toml::from_str(&raw)?)
    }

    /// Names of agents that participate in collaboration: enabled and not
    /// the orchestrator identity
    pub fn enabled_agents(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(name, agent)| agent.enabled && *name != &self.orchestrator)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let raw = r#"
orchestrator = "conductor"

[agents.analyst]
enabled = true
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
identity = "You are Analyst."
role = "You analyze requests."

[agents.conductor]
enabled = true
provider = "anthropic"
model = "claude-sonnet"
"#;
        let config: QuorumConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.orchestrator, "conductor");
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.collaboration.completion_timeout_secs, 30);
        assert_eq!(config.autonomy.max_attempts, 3);

        // The orchestrator never collaborates, even when enabled
        let enabled = config.enabled_agents();
        assert_eq!(enabled, vec!["analyst".to_string()]);
    }

    #[test]
    fn test_system_prompt_assembly() {
        let agent = AgentConfig {
            enabled: true,
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            endpoint: String::new(),
            api_key_env: None,
            identity: "You are Scout.".to_string(),
            role: "You research.".to_string(),
            params: AgentParams::default(),
        };
        assert_eq!(agent.system_prompt(), "You are Scout. You research.");

        let blank = AgentConfig {
            identity: String::new(),
            role: String::new(),
            ..agent
        };
        assert_eq!(blank.system_prompt(), "");
    }

    #[test]
    fn test_defaults_cover_all_sections() {
        let config: QuorumConfig = toml::from_str("").unwrap();
        assert!(config.agents.is_empty());
        assert_eq!(config.sandbox.network, "none");
        assert_eq!(config.healer.cooldown_secs, 300);
        assert_eq!(config.errors.max_errors, 1000);
        assert!(config.enabled_agents().is_empty());
    }
}
