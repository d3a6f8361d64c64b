//! Agent invoker — one call to one named agent
//!
//! Wraps the remote LLM call behind a single capability interface.
//! Provider dispatch is a closed set of strategy implementations selected
//! from a lookup table built at startup, so no provider string branching
//! leaks into call sites.

mod providers;

pub use providers::{AnthropicMessages, OllamaGenerate, OpenAiChat, ProviderStrategy};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::AgentConfig;

/// Error type for agent invocation
#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    #[error("Agent '{0}' is not enabled")]
    Disabled(String),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Credential env var '{0}' is not set")]
    MissingCredential(String),

    #[error("Model not specified for agent")]
    MissingModel,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider error {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Result type for agent invocation
pub type InvokerResult<T> = Result<T, InvokerError>;

/// Provider family an agent config resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions ("openai", "vultr", "nvidia", "custom")
    OpenAiCompat,
    /// Ollama generate API (local or remote)
    Ollama,
    /// Anthropic messages API
    Anthropic,
}

impl ProviderKind {
    /// Resolve a config provider string to its family
    pub fn parse(provider: &str) -> Option<Self> {
        match provider.to_ascii_lowercase().as_str() {
            "openai" | "vultr" | "nvidia" | "custom" => Some(Self::OpenAiCompat),
            "ollama" => Some(Self::Ollama),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

/// Capability interface consumed by the collaboration engine
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Call the agent with a prompt and return its generated text
    async fn invoke(&self, agent: &AgentConfig, prompt: &str) -> InvokerResult<String>;
}

/// Shared reference to an agent invoker
pub type SharedInvoker = Arc<dyn AgentInvoker>;

/// HTTP-backed invoker with per-provider strategies
pub struct HttpInvoker {
    client: reqwest::Client,
    strategies: HashMap<ProviderKind, Box<dyn ProviderStrategy>>,
}

impl HttpInvoker {
    /// Build the invoker with the full strategy table
    pub fn new() -> InvokerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| InvokerError::Http(e.to_string()))?;

        let mut strategies: HashMap<ProviderKind, Box<dyn ProviderStrategy>> = HashMap::new();
        strategies.insert(ProviderKind::OpenAiCompat, Box::new(OpenAiChat));
        strategies.insert(ProviderKind::Ollama, Box::new(OllamaGenerate));
        strategies.insert(ProviderKind::Anthropic, Box::new(AnthropicMessages));

        Ok(Self { client, strategies })
    }

    /// Create a shared reference to this invoker
    pub fn shared(self) -> SharedInvoker {
        Arc::new(self)
    }
}

#[async_trait]
impl AgentInvoker for HttpInvoker {
    async fn invoke(&self, agent: &AgentConfig, prompt: &str) -> InvokerResult<String> {
        if !agent.enabled {
            return Err(InvokerError::Disabled(agent.model.clone()));
        }
        if agent.model.trim().is_empty() {
            return Err(InvokerError::MissingModel);
        }

        let kind = ProviderKind::parse(&agent.provider)
            .ok_or_else(|| InvokerError::UnknownProvider(agent.provider.clone()))?;

        let strategy = self
            .strategies
            .get(&kind)
            .ok_or_else(|| InvokerError::UnknownProvider(agent.provider.clone()))?;

        debug!(provider = %agent.provider, model = %agent.model, "Invoking agent");
        strategy.send(&self.client, agent, prompt).await
    }
}

/// Resolve an agent's credential reference to the actual key
pub(crate) fn resolve_api_key(agent: &AgentConfig) -> InvokerResult<String> {
    let env_name = agent
        .api_key_env
        .as_deref()
        .ok_or_else(|| InvokerError::MissingCredential("<unset>".to_string()))?;
    std::env::var(env_name).map_err(|_| InvokerError::MissingCredential(env_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentParams;

    fn agent(provider: &str, enabled: bool) -> AgentConfig {
        AgentConfig {
            enabled,
            provider: provider.to_string(),
            model: "test-model".to_string(),
            endpoint: String::new(),
            api_key_env: None,
            identity: String::new(),
            role: String::new(),
            params: AgentParams::default(),
        }
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(ProviderKind::parse("openai"), Some(ProviderKind::OpenAiCompat));
        assert_eq!(ProviderKind::parse("VULTR"), Some(ProviderKind::OpenAiCompat));
        assert_eq!(ProviderKind::parse("ollama"), Some(ProviderKind::Ollama));
        assert_eq!(ProviderKind::parse("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("nemotron"), None);
    }

    #[tokio::test]
    async fn test_disabled_agent_rejected() {
        let invoker = HttpInvoker::new().unwrap();
        let err = invoker.invoke(&agent("openai", false), "hi").await.unwrap_err();
        assert!(matches!(err, InvokerError::Disabled(_)));
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let invoker = HttpInvoker::new().unwrap();
        let err = invoker.invoke(&agent("mystery", true), "hi").await.unwrap_err();
        assert!(matches!(err, InvokerError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_missing_model_rejected() {
        let invoker = HttpInvoker::new().unwrap();
        let mut cfg = agent("openai", true);
        cfg.model = "  ".to_string();
        let err = invoker.invoke(&cfg, "hi").await.unwrap_err();
        assert!(matches!(err, InvokerError::MissingModel));
    }
}
