//! Language model capability shared by all agents.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::security::SecretValue;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// A single system instruction plus one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one request and return the raw completion text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

pub type DynModel = Arc<dyn LanguageModel>;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatModel {
    client: Client,
    api_key: SecretValue,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(api_key: SecretValue, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_OPENAI_URL.to_string(),
            model: model.into(),
            temperature,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!(model = %self.model, "chat completion request");

        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http(status.as_u16(), text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Decode(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

/// In-memory model for tests and offline runs.
///
/// Each rule pairs a needle with a reply; the first needle found in the
/// system or user prompt wins.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, String)>,
    fallback: Option<String>,
    failure: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model whose every call fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(reason) = &self.failure {
            return Err(LlmError::Unavailable(reason.clone()));
        }

        self.rules
            .iter()
            .find(|(needle, _)| {
                request.system.contains(needle.as_str()) || request.user.contains(needle.as_str())
            })
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.fallback.clone())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_matches_first_rule() {
        let model = ScriptedModel::new()
            .reply_when("extraction", "{}")
            .reply_when("report", "# Report")
            .otherwise("ok");

        let json = model
            .complete(&CompletionRequest::new("You are an extraction engine", "Acme"))
            .await
            .unwrap();
        assert_eq!(json, "{}");

        let other = model
            .complete(&CompletionRequest::new("supervisor", "Acme"))
            .await
            .unwrap();
        assert_eq!(other, "ok");
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn scripted_model_without_match_is_empty() {
        let model = ScriptedModel::new();
        let err = model
            .complete(&CompletionRequest::new("system", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
