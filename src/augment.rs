use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::AiConfig;
use crate::types::{BotError, FeedItem, Result};

#[derive(Debug, Clone)]
pub struct CommentConstraints {
    pub max_chars: usize,
    pub language: String,
}

/// Capability that produces a short comment on a feed item. Failure here is
/// never fatal to dispatch; callers fall back to the raw item text.
#[async_trait]
pub trait Commentator: Send + Sync {
    async fn comment(&self, item: &FeedItem, constraints: &CommentConstraints) -> Result<String>;
}

/// Commentator backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCommentator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiCommentator {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.key.clone(),
            model: config.model.clone(),
        })
    }
}

fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "it" => "Italian",
        other => other,
    }
}

#[async_trait]
impl Commentator for OpenAiCommentator {
    async fn comment(&self, item: &FeedItem, constraints: &CommentConstraints) -> Result<String> {
        let lang = language_name(&constraints.language);
        let system = format!(
            "You are an expert article commentator. Summarize and comment in a \
             colloquial style without advertising. Reply in {lang}, max {} characters.",
            constraints.max_chars
        );
        let user = format!(
            "Read and summarize the following article in a colloquial, natural way \
             in {lang}, then add a personal comment as if you had read it:\n\n\
             {}\n\n{}\n\n{}",
            item.title, item.summary, item.link
        );

        debug!(model = %self.model, item = %item.id, "requesting comment");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }))
            .send()
            .await
            .map_err(|e| BotError::Augment(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Augment(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BotError::Augment(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BotError::Augment("empty completion".to_string()))?;

        Ok(crate::payload::truncate_chars(&content, constraints.max_chars))
    }
}
