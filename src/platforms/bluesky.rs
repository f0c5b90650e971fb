use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{PlatformError, Publisher};
use crate::payload::Payload;
use crate::types::PlatformKind;

/// Publishes to Bluesky via the XRPC API: a fresh session per post, then a
/// `app.bsky.feed.post` record with an external-link embed when available.
pub struct BlueskyPublisher {
    client: reqwest::Client,
    handle: String,
    password: String,
    service: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

impl BlueskyPublisher {
    pub fn new(client: reqwest::Client, handle: String, password: String, service: String) -> Self {
        Self {
            client,
            handle,
            password,
            service: service.trim_end_matches('/').to_string(),
        }
    }

    async fn create_session(&self) -> Result<Session, PlatformError> {
        let response = self
            .client
            .post(format!(
                "{}/xrpc/com.atproto.server.createSession",
                self.service
            ))
            .json(&json!({
                "identifier": self.handle,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(PlatformError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // A rejected login will not fix itself on retry.
            if status.as_u16() == 401 || status.as_u16() == 400 {
                return Err(PlatformError::Permanent(format!(
                    "bluesky login failed: HTTP {status}: {body}"
                )));
            }
            return Err(PlatformError::from_status(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))
    }
}

#[async_trait]
impl Publisher for BlueskyPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Bluesky
    }

    async fn publish(&self, payload: &Payload) -> Result<String, PlatformError> {
        let session = self.create_session().await?;
        debug!(handle = %self.handle, "authenticated to bluesky");

        let mut record = json!({
            "$type": "app.bsky.feed.post",
            "text": payload.text,
            "createdAt": Utc::now().to_rfc3339(),
        });

        if let Some(link) = &payload.link {
            record["embed"] = json!({
                "$type": "app.bsky.embed.external",
                "external": {
                    "uri": link,
                    "title": payload.link_title.clone().unwrap_or_default(),
                    "description": payload.link_description.clone().unwrap_or_default(),
                },
            });
        }

        let response = self
            .client
            .post(format!("{}/xrpc/com.atproto.repo.createRecord", self.service))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": "app.bsky.feed.post",
                "record": record,
            }))
            .send()
            .await
            .map_err(PlatformError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status, body));
        }

        let parsed: CreateRecordResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;

        Ok(parsed.uri)
    }
}
