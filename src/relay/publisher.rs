//! Exactly-once publication.
//!
//! `Publisher::publish` is only called by the holder of a relay claim. Success
//! marks the entry sent. A failure the target certainly never posted releases
//! the claim so a later star can retry. Any other failure keeps the claim: the
//! message may already be on the starboard, and only the lease expiring lets
//! another publisher try again.
//!
//! A whole publish, retries included, is cut off at the publish deadline,
//! which stays below the claim lease.

use super::retry::{retry_with_backoff, RetryPolicy};
use super::traits::*;
use crate::error::{StarError, StarResult};
use crate::ids::MessageId;
use crate::store::{CommunityConfig, Ledger};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default wait before deleting the origin response.
pub const DEFAULT_ORIGIN_DELETE_DELAY: Duration = Duration::from_secs(1);

/// Time a claim holder may spend delivering.
///
/// The last quarter of the lease is left for marking the entry sent.
pub fn publish_deadline(claim_lease: Duration) -> Duration {
    claim_lease * 3 / 4
}

pub struct Publisher<R: Relay, L: Ledger> {
    relay: Arc<R>,
    ledger: Arc<L>,
    retry: RetryPolicy,
    origin_delete_delay: Duration,
    deadline: Duration,
}

impl<R: Relay, L: Ledger> Publisher<R, L> {
    pub fn new(
        relay: Arc<R>,
        ledger: Arc<L>,
        retry: RetryPolicy,
        origin_delete_delay: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            relay,
            ledger,
            retry,
            origin_delete_delay,
            deadline,
        }
    }

    pub fn relay(&self) -> &Arc<R> {
        &self.relay
    }

    /// Deliver a message that just crossed its threshold.
    pub async fn publish(
        &self,
        message_id: MessageId,
        rendered: &RenderedMessage,
        community: &CommunityConfig,
    ) -> StarResult<DeliveryReceipt> {
        let target = &community.relay_target;
        let attempts = retry_with_backoff(
            &self.retry,
            || self.relay.deliver(rendered, target),
            RelayError::is_retryable,
        );
        let delivered = match tokio::time::timeout(self.deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(self.deadline)),
        };

        match delivered {
            Ok(receipt) => {
                if let Err(e) = self.ledger.mark_sent(message_id).await {
                    // Already posted; the claim lease keeps others from reposting meanwhile
                    error!(
                        message_id = %message_id,
                        error = %e,
                        "Message delivered but could not be marked sent"
                    );
                    return Err(e.into());
                }
                info!(
                    message_id = %message_id,
                    community_id = %community.community_id,
                    remote_id = ?receipt.remote_id,
                    "Message relayed to starboard"
                );
                Ok(receipt)
            }
            Err(err) if err.is_undelivered() => {
                warn!(
                    message_id = %message_id,
                    community_id = %community.community_id,
                    error = %err,
                    "Relay delivery failed"
                );
                if let Err(e) = self.ledger.release_claim(message_id).await {
                    warn!(
                        message_id = %message_id,
                        error = %e,
                        "Could not release relay claim, waiting for lease expiry"
                    );
                }
                Err(StarError::DeliveryFailed(err.to_string()))
            }
            Err(err) => {
                warn!(
                    message_id = %message_id,
                    community_id = %community.community_id,
                    error = %err,
                    "Relay outcome unknown, holding claim until the lease expires"
                );
                Err(StarError::DeliveryUnconfirmed(err.to_string()))
            }
        }
    }

    /// Delete the star prompt after a successful relay, if the community asks for it.
    ///
    /// The returned handle can be dropped; the task runs detached and only logs.
    pub fn schedule_origin_cleanup(
        &self,
        community: &CommunityConfig,
        origin: OriginResponse,
    ) -> Option<JoinHandle<()>> {
        if !community.delete_origin_after_relay {
            return None;
        }

        let relay = self.relay.clone();
        let delay = self.origin_delete_delay;
        let community_id = community.community_id;
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match relay.delete_origin(&origin).await {
                Ok(()) => debug!(community_id = %community_id, "Origin response deleted"),
                Err(e) => warn!(
                    community_id = %community_id,
                    error = %e,
                    "Failed to delete origin response"
                ),
            }
        }))
    }
}
