use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;

const RECIPE_SHAPE: &str =
    "return the answer in json format with Title: , Description: Ingredients: and Instructions:";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("API returned error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Conversation asking for a recipe built from `ingredients`.
pub fn ingredient_messages(ingredients: &[String]) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Suggest recipe from the following ingredients: {}. {}",
        ingredients.join(", "),
        capitalize(RECIPE_SHAPE)
    ))]
}

/// Conversation asking for a recipe based on a base64-encoded JPEG.
pub fn image_messages(base64_jpeg: &str, prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You are an AI that generates a recipe based on an image description. {RECIPE_SHAPE}"
        )),
        ChatMessage::user(format!(
            "Analyze this image: data:image/jpeg;base64,{base64_jpeg}\nAdditional prompt: {prompt}"
        )),
    ]
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Pulls `choices[0].message.content` out of a chat-completion response body.
pub fn extract_content(body: &str) -> Result<String, LlmError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::Parse("No message content in response".to_string()))
}

/// Client for an OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    pub fn with_http_client(config: LlmConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Sends one conversation to `model` and returns the assistant's reply untouched.
    pub async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ChatRequest { model, messages };

        log::debug!(
            "Calling {} with model {} ({} messages)",
            self.config.api_url,
            model,
            messages.len()
        );

        let mut builder = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "application/json")
            .header("X-Title", &self.config.app_title);
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        log::debug!("Response: {body}");
        extract_content(&body)
    }
}

/// Source of raw recipe text. `None` signals that the request failed.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn ask_for_ingredients(&self, ingredients: &[String]) -> Option<String>;

    async fn ask_for_image(&self, base64_jpeg: &str, prompt: &str) -> Option<String>;
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn ask_for_ingredients(&self, ingredients: &[String]) -> Option<String> {
        let messages = ingredient_messages(ingredients);
        match self.complete(&self.config.text_model, &messages).await {
            Ok(content) => Some(content),
            Err(e) => {
                log::error!("Ingredient recipe request failed: {e}");
                None
            }
        }
    }

    async fn ask_for_image(&self, base64_jpeg: &str, prompt: &str) -> Option<String> {
        let messages = image_messages(base64_jpeg, prompt);
        match self.complete(&self.config.vision_model, &messages).await {
            Ok(content) => Some(content),
            Err(e) => {
                log::error!("Image recipe request failed: {e}");
                None
            }
        }
    }
}
