//! Outbound calls to the generative-language collaborator.
//!
//! The rest of the application talks to the model only through the
//! [`ChatModel`] trait, so handlers can be exercised against a scripted
//! model in tests.
//!
//! # Implementations
//!
//! - [`GeminiClient`]: Google Gemini `generateContent` API (`/v1beta/models`)

pub mod gemini;
pub mod prompts;

pub use gemini::GeminiClient;

use std::time::Duration;

use serde::Serialize;

use crate::session::ChatTurn;

/// Gemini connection and generation settings.
#[derive(Clone)]
pub struct GeminiSettings {
    /// Base URL for the API (e.g., `https://generativelanguage.googleapis.com`).
    pub base_url: String,
    /// API key; requests fail with [`LlmError::NotConfigured`] without one.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gemini-1.5-flash`).
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A model advertised by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: Option<String>,
    pub supported_methods: Vec<String>,
}

/// Failures talking to the model.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model is not configured: {0}")]
    NotConfigured(String),

    #[error("quota exhausted or rate limited: {0}")]
    RateLimited(String),

    #[error("response blocked by safety filters: {0}")]
    Blocked(String),

    #[error("model returned no text")]
    EmptyResponse,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether retrying later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::NotConfigured(_) | Self::Blocked(_) | Self::EmptyResponse | Self::Decode(_) => {
                false
            }
        }
    }
}

/// Conversational model used by the chat and screening endpoints.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync + std::fmt::Debug {
    /// Generate the therapist's reply to `message`, given the prior turns.
    async fn reply(&self, history: &[ChatTurn], message: &str) -> Result<String, LlmError>;

    /// Classify the emotional sentiment of a transcript.
    ///
    /// Returns the raw model text; see [`crate::sentiment::parse_sentiment`].
    async fn classify_sentiment(&self, transcript: &str) -> Result<String, LlmError>;

    /// List the models available to the configured key.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError>;
}
