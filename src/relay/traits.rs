//! Relay Trait Abstractions
//!
//! `Relay` is the outbound seam of the starboard: one delivery of a rendered
//! message to a community's webhook, and one best-effort delete of the
//! ephemeral star prompt. `MockRelay` replaces it in tests.

use crate::store::RelayTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message body posted to the relay target, rendered by the transport layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderedMessage(pub serde_json::Value);

impl From<serde_json::Value> for RenderedMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Ephemeral response resource holding the star prompt
#[derive(Clone, PartialEq, Eq)]
pub struct OriginResponse {
    /// Carries the interaction token; never logged
    pub url: String,
}

impl OriginResponse {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Acknowledgement of a successful delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// HTTP status returned by the relay target
    pub status: u16,
    /// Id of the posted message, when the target reports one
    pub remote_id: Option<String>,
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Relay target returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Relay unavailable: {0}")]
    Unavailable(String),

    #[error("Relay did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        // The request url embeds the webhook secret
        RelayError::Network(err.without_url())
    }
}

impl RelayError {
    /// Whether the target certainly did not post the message.
    ///
    /// Refused connections and 4xx answers are certain. A timeout, a broken
    /// response or a 5xx may come after the target already posted it.
    pub fn is_undelivered(&self) -> bool {
        match self {
            RelayError::Network(err) => err.is_builder() || err.is_connect(),
            RelayError::Status { code, .. } => *code < 500,
            RelayError::Unavailable(_) => true,
            RelayError::Timeout(_) => false,
        }
    }

    /// Whether sending the message again cannot produce a second post.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Network(err) => err.is_connect(),
            RelayError::Status { code, .. } => *code == 429,
            RelayError::Unavailable(_) => true,
            RelayError::Timeout(_) => false,
        }
    }
}

/// Outbound relay abstraction
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    /// Post a message to the relay target once.
    async fn deliver(
        &self,
        message: &RenderedMessage,
        target: &RelayTarget,
    ) -> RelayResult<DeliveryReceipt>;

    /// Delete the ephemeral origin response.
    async fn delete_origin(&self, origin: &OriginResponse) -> RelayResult<()>;
}
