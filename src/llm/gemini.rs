//! Google Gemini `generateContent` client.
//!
//! Implements [`ChatModel`] against `/v1beta/models/{model}:generateContent`
//! using plain (non-streaming) requests.

use serde::{Deserialize, Serialize};

use super::prompts::{THERAPIST_INSTRUCTION, sentiment_instruction};
use super::{ChatModel, GeminiSettings, LlmError, ModelInfo};
use crate::session::{ChatTurn, Role};

const API_VERSION: &str = "v1beta";
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const BLOCK_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(ToString::to_string),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    pub(crate) fn into_text(self) -> Result<String, LlmError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::Blocked(reason));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(LlmError::EmptyResponse);
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text);
        }
        match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                Err(LlmError::Blocked(reason.to_string()))
            }
            _ => Err(LlmError::EmptyResponse),
        }
    }
}

/// Client for the Gemini API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    settings: GeminiSettings,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl GeminiClient {
    /// Create a new client with the given settings.
    pub fn new(settings: GeminiSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.settings.api_key.as_deref().ok_or_else(|| {
            LlmError::NotConfigured(format!("{} is not set", crate::config::API_KEY_ENV))
        })
    }

    fn base(&self) -> String {
        format!(
            "{}/{API_VERSION}",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn model_path(&self) -> String {
        let model = self.settings.model.trim();
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{model}:generateContent", self.base())
    }

    fn chat_request(&self, history: &[ChatTurn], message: &str) -> GenerateRequest {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content::text(Some(turn.role.as_str()), turn.content.clone()))
            .collect();
        contents.push(Content::text(Some(Role::User.as_str()), message));

        GenerateRequest {
            system_instruction: Some(Content::text(None, THERAPIST_INSTRUCTION)),
            contents,
            generation_config: Some(GenerationConfig {
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
                top_k: self.settings.top_k,
                max_output_tokens: self.settings.max_output_tokens,
            }),
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: BLOCK_THRESHOLD,
                })
                .collect(),
        }
    }

    fn sentiment_request(transcript: &str) -> GenerateRequest {
        GenerateRequest {
            system_instruction: Some(Content::text(None, sentiment_instruction())),
            contents: vec![Content::text(Some(Role::User.as_str()), transcript)],
            generation_config: None,
            safety_settings: Vec::new(),
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let key = self.api_key()?;
        let resp = self
            .http
            .post(self.model_path())
            .header("x-goog-api-key", key)
            .json(request)
            .send()
            .await?;

        let body = check_status(resp).await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        parsed.into_text()
    }
}

/// Map non-success responses onto [`LlmError`] and return the body otherwise.
async fn check_status(resp: reqwest::Response) -> Result<String, LlmError> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    let (message, api_status) = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| (e.error.message, e.error.status))
        .unwrap_or_else(|_| (body.clone(), String::new()));

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        return Err(LlmError::RateLimited(message));
    }
    Err(LlmError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait::async_trait]
impl ChatModel for GeminiClient {
    async fn reply(&self, history: &[ChatTurn], message: &str) -> Result<String, LlmError> {
        let request = self.chat_request(history, message);
        let text = self.generate(&request).await?;
        tracing::debug!(
            name: "llm.reply",
            model = %self.settings.model,
            history_len = history.len(),
            reply_len = text.len(),
            "Model replied"
        );
        Ok(text)
    }

    async fn classify_sentiment(&self, transcript: &str) -> Result<String, LlmError> {
        self.generate(&Self::sentiment_request(transcript)).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let key = self.api_key()?;
        let url = format!("{}/models", self.base());
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut rb = self.http.get(&url).header("x-goog-api-key", key);
            if let Some(token) = &page_token {
                rb = rb.query(&[("pageToken", token)]);
            }
            let body = check_status(rb.send().await?).await?;
            let page: ModelList = serde_json::from_str(&body)?;

            models.extend(page.models.into_iter().map(|m| ModelInfo {
                name: m.name,
                display_name: m.display_name,
                supported_methods: m.supported_generation_methods,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }
}
