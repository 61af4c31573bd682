//! Minimal chat-completion provider client.
//!
//! This crate provides the [`CompletionProvider`] contract the conversation
//! pipeline depends on, together with a focused HTTP client for an
//! Anthropic-style Messages API. One request, one reply; no streaming,
//! no tool use.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Errors that can occur when requesting a completion.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether this failure signals quota or rate-limit exhaustion.
    ///
    /// Callers downgrade these to local fallback generation instead of
    /// surfacing them; everything else is an ordinary provider failure.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Api { status: 429, .. } => true,
            Error::Api { message, .. } => {
                let message = message.to_lowercase();
                message.contains("rate_limit")
                    || message.contains("quota")
                    || message.contains("overloaded")
            }
            _ => false,
        }
    }
}

/// Per-request generation options.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Model override; the client's default model is used when absent.
    pub model: Option<String>,

    /// Maximum tokens for the reply.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: Some(0.9),
        }
    }
}

/// The contract a completion provider fulfills: one system prompt, one user
/// message, one reply string.
///
/// The pipeline depends only on this trait, never on a vendor wire format.
#[async_trait]
pub trait CompletionProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        options: &CompletionOptions,
    ) -> Result<String, Error>;
}

/// HTTP client for an Anthropic-style Messages API.
#[derive(Clone)]
pub struct Anthropic {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl Anthropic {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::NoApiKey)?;
        Self::new(api_key)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }
}

#[async_trait]
impl CompletionProvider for Anthropic {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        options: &CompletionOptions,
    ) -> Result<String, Error> {
        let request = ApiRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            max_tokens: options.max_tokens,
            system: system_prompt,
            messages: vec![ApiMessage {
                role: "user",
                content: user_message,
            }],
            temperature: options.temperature,
        };

        let headers = self.build_headers()?;

        tracing::debug!(model = request.model, "sending completion request");

        let response = self
            .client
            .post(format!("{API_BASE}/messages"))
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        // Concatenate the text blocks; anything else is ignored.
        let mut reply = String::new();
        for block in api_response.content {
            if let ApiContent::Text { text } = block {
                if !reply.is_empty() {
                    reply.push('\n');
                }
                reply.push_str(&text);
            }
        }

        Ok(reply)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
