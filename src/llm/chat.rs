// src/llm/chat.rs

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::LanguageModel;
use crate::config::{LlmBackend, LlmSection};
use crate::error::LlmError;
use crate::prompt::Prompt;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(
    llm: &LlmSection,
    api_key: Option<String>,
) -> Result<ResolvedEndpoint, LlmError> {
    match llm.backend {
        LlmBackend::Ollama => {
            info!(
                url = %llm.ollama.base_url,
                model = %llm.ollama.model,
                "Using Ollama (local) backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.clone(),
                model: llm.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        LlmBackend::Remote => {
            let api_key = api_key.ok_or(LlmError::MissingApiKey)?;
            info!(
                url = %llm.remote.base_url,
                model = %llm.remote.model,
                "Using remote API backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
        LlmBackend::Heuristics => Err(LlmError::Unavailable(
            "heuristics backend selected, no chat endpoint to resolve".to_string(),
        )),
    }
}

/// OpenAI-compatible `/chat/completions` client (Ollama or a remote API).
pub struct ChatClient {
    client: Client,
    endpoint: ResolvedEndpoint,
    backend: LlmBackend,
    temperature: f64,
}

impl ChatClient {
    /// The remote backend reads its key from `LLM_API_KEY`.
    pub fn from_config(llm: &LlmSection) -> Result<Self, LlmError> {
        let endpoint = resolve_endpoint(llm, std::env::var("LLM_API_KEY").ok())?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            backend: llm.backend,
            temperature: llm.temperature,
        })
    }

    /// Fail early when a local Ollama server is not running. Remote
    /// endpoints are not probed.
    pub async fn ensure_reachable(&self) -> Result<(), LlmError> {
        if self.backend != LlmBackend::Ollama {
            return Ok(());
        }
        if check_ollama_health(&self.client, &self.endpoint.base_url).await {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                self.endpoint.base_url
            )))
        }
    }

    fn request(&self, prompt: &Prompt) -> ChatRequest {
        ChatRequest {
            model: self.endpoint.model.clone(),
            messages: build_messages(prompt),
            temperature: self.temperature,
        }
    }
}

/// system, user; on a retry also the previous answer and the corrections.
fn build_messages(prompt: &Prompt) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::new("system", prompt.system.clone()),
        ChatMessage::new("user", prompt.user_message()),
    ];
    if let (Some(retry), Some(correction)) = (&prompt.retry, prompt.retry_message()) {
        messages.push(ChatMessage::new("assistant", retry.previous_completion.clone()));
        messages.push(ChatMessage::new("user", correction));
    }
    messages
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let request = self.request(prompt);
        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));
        debug!(url = %url, messages = request.messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(chars = content.len(), "Received completion");
        Ok(content)
    }

    fn name(&self) -> &str {
        &self.endpoint.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptOptions;
    use crate::schema::SchemaSpec;

    #[test]
    fn test_resolve_ollama_endpoint() {
        let llm = LlmSection::default();
        let endpoint = resolve_endpoint(&llm, None).unwrap();
        assert_eq!(endpoint.base_url, llm.ollama.base_url);
        assert_eq!(endpoint.api_key, "ollama");
    }

    #[test]
    fn test_remote_endpoint_needs_key() {
        let llm = LlmSection {
            backend: LlmBackend::Remote,
            ..LlmSection::default()
        };
        assert!(matches!(
            resolve_endpoint(&llm, None),
            Err(LlmError::MissingApiKey)
        ));
        let endpoint = resolve_endpoint(&llm, Some("sk-test".into())).unwrap();
        assert_eq!(endpoint.api_key, "sk-test");
        assert_eq!(endpoint.model, llm.remote.model);
    }

    #[test]
    fn test_heuristics_backend_has_no_endpoint() {
        let llm = LlmSection {
            backend: LlmBackend::Heuristics,
            ..LlmSection::default()
        };
        assert!(matches!(
            resolve_endpoint(&llm, None),
            Err(LlmError::Unavailable(_))
        ));
    }

    #[test]
    fn test_retry_messages_carry_previous_answer() {
        let schema = SchemaSpec::invoice_default();
        let prompt = Prompt::initial(&schema, "Invoice 7", &PromptOptions::default());
        let roles: Vec<String> = build_messages(&prompt).into_iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user"]);

        let retry = prompt.with_retry(r#"{"total": 1}"#, "- total [missing]".into());
        let messages = build_messages(&retry);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[2].content, r#"{"total": 1}"#);
        assert!(messages[3].content.contains("- total [missing]"));
    }
}
