use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{PlatformError, Publisher};
use crate::payload::Payload;
use crate::types::PlatformKind;

const API_URL: &str = "https://api.linkedin.com/v2/ugcPosts";

/// Publishes article shares to LinkedIn via the v2 ugcPosts API.
pub struct LinkedInPublisher {
    client: reqwest::Client,
    urn: String,
    access_token: String,
}

#[derive(Deserialize)]
struct UgcPostResponse {
    id: String,
}

impl LinkedInPublisher {
    pub fn new(client: reqwest::Client, urn: String, access_token: String) -> Self {
        Self {
            client,
            urn,
            access_token,
        }
    }

    fn author(&self) -> String {
        if self.urn.starts_with("urn:") {
            self.urn.clone()
        } else {
            format!("urn:li:person:{}", self.urn)
        }
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linkedin
    }

    async fn publish(&self, payload: &Payload) -> Result<String, PlatformError> {
        debug!(author = %self.author(), "posting to linkedin");

        let share_content = match &payload.link {
            Some(link) => json!({
                "shareCommentary": { "text": payload.text },
                "shareMediaCategory": "ARTICLE",
                "media": [{
                    "status": "READY",
                    "originalUrl": link,
                    "title": { "text": payload.link_title.clone().unwrap_or_default() },
                }],
            }),
            None => json!({
                "shareCommentary": { "text": payload.text },
                "shareMediaCategory": "NONE",
            }),
        };

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&json!({
                "author": self.author(),
                "lifecycleState": "PUBLISHED",
                "specificContent": { "com.linkedin.ugc.ShareContent": share_content },
                "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
            }))
            .send()
            .await
            .map_err(PlatformError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status, body));
        }

        // The post id is surfaced both as a header and in the body.
        if let Some(id) = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
        {
            return Ok(id.to_string());
        }

        let parsed: UgcPostResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;

        Ok(parsed.id)
    }
}
