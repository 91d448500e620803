//! HTTP webhook relay.
//!
//! Posts rendered messages to `{base_url}/{target_id}/{target_secret}` and
//! deletes origin responses with a plain `DELETE`.

use super::traits::*;
use crate::store::RelayTarget;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default webhook endpoint
pub const DEFAULT_RELAY_BASE_URL: &str = "https://discord.com/api/v10/webhooks";

/// Longest error body kept in `RelayError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Webhook relay backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct WebhookRelay {
    client: Client,
    base_url: String,
}

impl WebhookRelay {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RelayResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn target_url(&self, target: &RelayTarget) -> String {
        format!("{}/{}/{}", self.base_url, target.id, target.secret())
    }
}

async fn status_error(response: reqwest::Response) -> RelayError {
    let code = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    RelayError::Status { code, body }
}

#[async_trait]
impl Relay for WebhookRelay {
    #[instrument(skip_all, fields(target_id = %target.id))]
    async fn deliver(
        &self,
        message: &RenderedMessage,
        target: &RelayTarget,
    ) -> RelayResult<DeliveryReceipt> {
        let response = self
            .client
            .post(self.target_url(target))
            .query(&[("wait", "true")])
            .json(&message.0)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let remote_id = if status == StatusCode::NO_CONTENT {
            None
        } else {
            response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("id").and_then(Value::as_str).map(String::from))
        };

        debug!(status = status.as_u16(), ?remote_id, "Webhook accepted message");
        Ok(DeliveryReceipt {
            status: status.as_u16(),
            remote_id,
        })
    }

    async fn delete_origin(&self, origin: &OriginResponse) -> RelayResult<()> {
        let response = self.client.delete(&origin.url).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}
