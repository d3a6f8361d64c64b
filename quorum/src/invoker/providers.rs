//! Provider strategies for the HTTP invoker
//!
//! Each strategy owns one wire format. All of them return the generated
//! text or an [`InvokerError`]; retries and isolation live with the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{resolve_api_key, InvokerError, InvokerResult};
use crate::config::AgentConfig;

/// One provider wire format
#[async_trait]
pub trait ProviderStrategy: Send + Sync {
    /// Send the prompt to the provider and return the generated text
    async fn send(
        &self,
        client: &reqwest::Client,
        agent: &AgentConfig,
        prompt: &str,
    ) -> InvokerResult<String>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn chat_messages(agent: &AgentConfig, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let system = agent.system_prompt();
    if !system.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: prompt.to_string(),
    });
    messages
}

async fn read_error_body(response: reqwest::Response) -> InvokerError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    InvokerError::Provider { status, body }
}

/// OpenAI-compatible chat completions ("openai", "vultr", "nvidia", "custom")
pub struct OpenAiChat;

#[async_trait]
impl ProviderStrategy for OpenAiChat {
    async fn send(
        &self,
        client: &reqwest::Client,
        agent: &AgentConfig,
        prompt: &str,
    ) -> InvokerResult<String> {
        #[derive(Serialize)]
        struct ChatRequest {
            model: String,
            messages: Vec<ChatMessage>,
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: Option<String>,
        }

        let api_key = resolve_api_key(agent)?;
        let endpoint = if agent.endpoint.is_empty() {
            "https://api.openai.com/v1"
        } else {
            agent.endpoint.trim_end_matches('/')
        };
        let url = format!("{}/chat/completions", endpoint);

        let request = ChatRequest {
            model: agent.model.clone(),
            messages: chat_messages(agent, prompt),
            temperature: agent.params.temperature,
            max_tokens: agent.params.max_tokens,
        };

        let response = client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| InvokerError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| InvokerError::MalformedResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InvokerError::MalformedResponse("no choices in response".to_string()))
    }
}

/// Ollama generate API (local by default, remote with a bearer key)
pub struct OllamaGenerate;

#[async_trait]
impl ProviderStrategy for OllamaGenerate {
    async fn send(
        &self,
        client: &reqwest::Client,
        agent: &AgentConfig,
        prompt: &str,
    ) -> InvokerResult<String> {
        #[derive(Serialize)]
        struct GenerateOptions {
            temperature: f32,
            num_ctx: u32,
        }

        #[derive(Serialize)]
        struct GenerateRequest {
            model: String,
            prompt: String,
            stream: bool,
            options: GenerateOptions,
        }

        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let endpoint = if agent.endpoint.is_empty() {
            "http://localhost:11434"
        } else {
            agent.endpoint.trim_end_matches('/')
        };
        let url = format!("{}/api/generate", endpoint);

        let system = agent.system_prompt();
        let full_prompt = if system.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", system, prompt)
        };

        let request = GenerateRequest {
            model: agent.model.clone(),
            prompt: full_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: agent.params.temperature,
                num_ctx: agent.params.context_window.unwrap_or(4096),
            },
        };

        // Local Ollama needs no credential; remote endpoints carry one
        let mut builder = client.post(&url).json(&request);
        if agent.api_key_env.is_some() {
            builder = builder.bearer_auth(resolve_api_key(agent)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| InvokerError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InvokerError::MalformedResponse(e.to_string()))?;

        Ok(generated.response)
    }
}

/// Anthropic messages API
pub struct AnthropicMessages;

#[async_trait]
impl ProviderStrategy for AnthropicMessages {
    async fn send(
        &self,
        client: &reqwest::Client,
        agent: &AgentConfig,
        prompt: &str,
    ) -> InvokerResult<String> {
        #[derive(Serialize)]
        struct MessagesRequest {
            model: String,
            messages: Vec<ChatMessage>,
            max_tokens: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            system: Option<String>,
        }

        #[derive(Deserialize)]
        struct MessagesResponse {
            content: Vec<ContentBlock>,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: String,
        }

        let api_key = resolve_api_key(agent)?;
        let endpoint = if agent.endpoint.is_empty() {
            "https://api.anthropic.com/v1"
        } else {
            agent.endpoint.trim_end_matches('/')
        };
        let url = format!("{}/messages", endpoint);

        let system = agent.system_prompt();
        let request = MessagesRequest {
            model: agent.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: agent.params.max_tokens,
            system: if system.is_empty() { None } else { Some(system) },
        };

        let response = client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| InvokerError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let messages: MessagesResponse = response
            .json()
            .await
            .map_err(|e| InvokerError::MalformedResponse(e.to_string()))?;

        let text: String = messages.content.into_iter().map(|b| b.text).collect();
        if text.is_empty() {
            return Err(InvokerError::MalformedResponse(
                "empty content blocks".to_string(),
            ));
        }
        Ok(text)
    }
}
