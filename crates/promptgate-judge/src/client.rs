//! Completion client seam for the judge
//!
//! The judge talks to backend models only through the `CompletionClient`
//! trait. Production wires in `HttpCompletionClient`; tests inject scripted
//! fakes, which is also how forced verdicts are produced in test
//! environments (there is deliberately no in-band bypass string).

use async_trait::async_trait;
use promptgate_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A candidate backend model with its pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider model identifier, e.g. `meta-llama/llama-3.1-8b-instruct`
    pub name: String,

    /// USD per million tokens
    #[serde(default)]
    pub cost_per_million: f64,

    /// Fallback order; lower tries first
    #[serde(default)]
    pub priority: u8,
}

impl ModelSpec {
    /// Create a model spec
    pub fn new(name: impl Into<String>, cost_per_million: f64, priority: u8) -> Self {
        Self {
            name: name.into(),
            cost_per_million,
            priority,
        }
    }
}

/// One completion call against one model
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,

    /// System instructions (the only instruction channel)
    pub system_prompt: String,

    /// Serialized data payload carrying the untrusted input
    pub user_payload: String,

    /// Sampling temperature (0 for deterministic judging)
    pub temperature: f32,

    /// Completion token budget
    pub max_tokens: u32,

    /// Per-attempt deadline
    pub timeout: Duration,
}

/// Successful completion with bookkeeping
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Raw response content
    pub content: String,

    /// Model that answered
    pub model: String,

    /// Total tokens billed for the call
    pub tokens_used: u64,

    /// Attempt latency
    pub latency_ms: u64,
}

/// Outbound seam to a chat-completion backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Execute one completion call
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome>;
}

/// Wire types for the OpenAI-compatible chat completions API
#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// reqwest-backed client for OpenRouter-compatible endpoints
pub struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpCompletionClient {
    /// Create a client for the given chat-completions endpoint
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome> {
        let start = Instant::now();

        let body = ChatCompletionBody {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_payload,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: 1.0,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Http(format!(
                        "{}: timeout after {}ms",
                        request.model,
                        request.timeout.as_millis()
                    ))
                } else {
                    Error::Http(format!("{}: {}", request.model, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "{}: status {}",
                request.model,
                response.status()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("{}: invalid response body: {}", request.model, e)))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| Error::Http(format!("{}: empty choices", request.model)))?;

        Ok(CompletionOutcome {
            content,
            model: request.model.clone(),
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
