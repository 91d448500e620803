//! Starboard Service
//!
//! Facade called by the transport layer. Resolves community settings, drives
//! the aggregation engine and, when a star crosses the threshold, publishes
//! through the relay. Rendering of messages and replies stays with the caller.

use crate::engine::{AggregationEngine, EngineConfig, Outcome, StarAction};
use crate::error::{StarError, StarResult};
use crate::ids::{CommunityId, MessageId};
use crate::relay::{
    publish_deadline, DeliveryReceipt, OriginResponse, Publisher, Relay, RenderedMessage,
    RetryPolicy, DEFAULT_ORIGIN_DELETE_DELAY,
};
use crate::store::{
    AuthorizeOutcome, CommunityConfig, CommunityStore, Ledger, RelayTarget, SettingsChange,
    StoreError, MIN_STAR_THRESHOLD,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub retry: RetryPolicy,
    /// Wait before deleting the star prompt of a relayed message
    pub origin_delete_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            retry: RetryPolicy::default(),
            origin_delete_delay: DEFAULT_ORIGIN_DELETE_DELAY,
        }
    }
}

/// What happened to the relay on a crossing star
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent(DeliveryReceipt),
    /// The star counted but the relay did not accept the message
    Failed { reason: String },
    /// The relay may or may not have posted it; nobody retries before the claim lease ends
    Unconfirmed { reason: String },
}

/// Result of an accepted star, handed back for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarReport {
    pub outcome: Outcome,
    /// Set only when this star crossed the threshold
    pub delivery: Option<Delivery>,
}

impl StarReport {
    fn counted(outcome: Outcome) -> Self {
        Self {
            outcome,
            delivery: None,
        }
    }

    /// Whether this star put the message on the starboard.
    pub fn relayed(&self) -> bool {
        matches!(self.delivery, Some(Delivery::Sent(_)))
    }
}

pub struct StarboardService<C: CommunityStore, L: Ledger, R: Relay> {
    communities: Arc<C>,
    engine: AggregationEngine<L>,
    publisher: Publisher<R, L>,
}

impl<C: CommunityStore, L: Ledger, R: Relay> StarboardService<C, L, R> {
    pub fn new(communities: Arc<C>, ledger: Arc<L>, relay: Arc<R>, config: ServiceConfig) -> Self {
        let publisher = Publisher::new(
            relay,
            ledger.clone(),
            config.retry,
            config.origin_delete_delay,
            publish_deadline(config.engine.claim_lease),
        );
        Self {
            communities,
            engine: AggregationEngine::new(ledger, config.engine),
            publisher,
        }
    }

    pub fn engine(&self) -> &AggregationEngine<L> {
        &self.engine
    }

    /// Register a community's relay target, or replace it.
    pub async fn authorize(
        &self,
        community_id: CommunityId,
        target: RelayTarget,
    ) -> StarResult<AuthorizeOutcome> {
        let outcome = self.communities.authorize(community_id, target).await?;
        info!(community_id = %community_id, ?outcome, "Community authorized");
        Ok(outcome)
    }

    /// Settings of an authorized community.
    pub async fn settings(&self, community_id: CommunityId) -> StarResult<CommunityConfig> {
        self.communities
            .get(community_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => StarError::NeedsAuthorization(community_id),
                other => StarError::Store(other),
            })
    }

    /// First star on a message, which opens its star prompt.
    pub async fn start(&self, action: &StarAction) -> StarResult<StarReport> {
        let community = self.settings(action.community_id).await?;
        let outcome = self
            .engine
            .begin_starring(
                action.message_id,
                action.acting_user_id,
                action.origin_author_id,
                &community,
            )
            .await
            .inspect_err(|e| log_rejection(action, e))?;
        Ok(StarReport::counted(outcome))
    }

    /// Star a tracked message, publishing it if this star crosses the threshold.
    ///
    /// A failed publish does not fail the star: it is reported as
    /// `Delivery::Failed` and the next distinct star retries. An ambiguous one
    /// is reported as `Delivery::Unconfirmed` and holds the claim until its
    /// lease ends.
    pub async fn star(
        &self,
        action: &StarAction,
        rendered: &RenderedMessage,
        origin: OriginResponse,
    ) -> StarResult<StarReport> {
        let community = self.settings(action.community_id).await?;
        let outcome = self
            .engine
            .apply_star(
                action.message_id,
                action.acting_user_id,
                action.origin_author_id,
                &community,
            )
            .await
            .inspect_err(|e| log_rejection(action, e))?;

        if !outcome.is_crossing() {
            return Ok(StarReport::counted(outcome));
        }
        self.relay(action.message_id, outcome, rendered, origin, &community)
            .await
    }

    /// Retry the relay of a message at or above its threshold without adding a star.
    pub async fn retry_relay(
        &self,
        community_id: CommunityId,
        message_id: MessageId,
        rendered: &RenderedMessage,
        origin: OriginResponse,
    ) -> StarResult<StarReport> {
        let community = self.settings(community_id).await?;
        let outcome = self.engine.reclaim(message_id, &community).await?;
        if !outcome.is_crossing() {
            return Ok(StarReport::counted(outcome));
        }
        self.relay(message_id, outcome, rendered, origin, &community)
            .await
    }

    async fn relay(
        &self,
        message_id: MessageId,
        outcome: Outcome,
        rendered: &RenderedMessage,
        origin: OriginResponse,
        community: &CommunityConfig,
    ) -> StarResult<StarReport> {
        let delivery = match self.publisher.publish(message_id, rendered, community).await {
            Ok(receipt) => {
                // Detached; the handle is not awaited
                let _ = self.publisher.schedule_origin_cleanup(community, origin);
                Delivery::Sent(receipt)
            }
            Err(StarError::DeliveryFailed(reason)) => Delivery::Failed { reason },
            Err(StarError::DeliveryUnconfirmed(reason)) => Delivery::Unconfirmed { reason },
            Err(other) => return Err(other),
        };

        Ok(StarReport {
            outcome,
            delivery: Some(delivery),
        })
    }

    /// Apply a partial settings update.
    pub async fn update_settings(&self, change: &SettingsChange) -> StarResult<CommunityConfig> {
        if let Some(threshold) = change.star_threshold {
            if threshold < MIN_STAR_THRESHOLD {
                return Err(StarError::InvalidThreshold {
                    got: threshold,
                    min: MIN_STAR_THRESHOLD,
                });
            }
        }
        if change.is_empty() {
            return self.settings(change.community_id).await;
        }

        let updated = self
            .communities
            .apply_settings(change)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => StarError::NeedsAuthorization(change.community_id),
                other => StarError::Store(other),
            })?;

        info!(
            community_id = %updated.community_id,
            star_threshold = updated.star_threshold,
            allow_self_star = updated.allow_self_star,
            delete_origin_after_relay = updated.delete_origin_after_relay,
            "Community settings updated"
        );
        Ok(updated)
    }
}

fn log_rejection(action: &StarAction, err: &StarError) {
    if err.is_rejection() {
        debug!(
            message_id = %action.message_id,
            user_id = %action.acting_user_id,
            reason = %err,
            "Star rejected"
        );
    }
}
