use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{PlatformError, Publisher};
use crate::payload::Payload;
use crate::types::PlatformKind;

/// Publishes to a Telegram chat via the Bot API sendMessage endpoint.
pub struct TelegramPublisher {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramPublisher {
    pub fn new(client: reqwest::Client, token: String, chat_id: String) -> Self {
        Self {
            client,
            token,
            chat_id,
        }
    }

    fn api_url(&self) -> String {
        format!("https://api.telegram.org/bot{}/sendMessage", self.token)
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Telegram
    }

    async fn publish(&self, payload: &Payload) -> Result<String, PlatformError> {
        debug!(chat_id = %self.chat_id, "sending telegram message");

        let response = self
            .client
            .post(self.api_url())
            .json(&json!({
                "chat_id": self.chat_id,
                "text": payload.text,
            }))
            .send()
            .await
            .map_err(PlatformError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status, body));
        }

        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;

        if !parsed.ok {
            return Err(PlatformError::Permanent(
                parsed
                    .description
                    .unwrap_or_else(|| "telegram reported failure".to_string()),
            ));
        }

        let message_id = parsed
            .result
            .map(|m| m.message_id.to_string())
            .ok_or_else(|| PlatformError::Permanent("missing message id".to_string()))?;

        Ok(message_id)
    }
}
