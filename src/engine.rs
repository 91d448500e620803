//! Star Aggregation Engine
//!
//! Decides whether a star action is accepted and whether it pushes the
//! message over its community's threshold. Every decision on an existing
//! entry runs inside one atomic ledger update, so duplicate detection and
//! threshold crossing are race-free.
//!
//! Crossing takes a relay claim in the same update. Only the claim holder
//! publishes; the claim is dropped when the publish succeeds (the entry becomes
//! `sent`) or fails (the entry stays eligible and the next star retries).
//! A claim older than the lease counts as abandoned.

use crate::cutoff::{cutoff, is_expired, DEFAULT_RETENTION};
use crate::error::{StarError, StarResult};
use crate::ids::{CommunityId, MessageId, UserId};
use crate::store::{CommunityConfig, Ledger, StarredMessage, StoreError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Default lifetime of a relay claim.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(60);

/// Inbound star action, as delivered by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarAction {
    pub message_id: MessageId,
    pub acting_user_id: UserId,
    pub origin_author_id: UserId,
    pub community_id: CommunityId,
}

/// Result of an accepted star action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Star recorded, threshold not reached yet
    BelowThreshold { count: u32 },
    /// Star recorded and this action holds the relay claim: publish now
    ThresholdCrossed { count: u32 },
    /// Star recorded, threshold reached, another action is publishing
    RelayPending { count: u32 },
}

impl Outcome {
    pub fn count(&self) -> u32 {
        match *self {
            Outcome::BelowThreshold { count }
            | Outcome::ThresholdCrossed { count }
            | Outcome::RelayPending { count } => count,
        }
    }

    pub fn is_crossing(&self) -> bool {
        matches!(self, Outcome::ThresholdCrossed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Messages older than this cannot be starred
    pub retention: Duration,
    pub claim_lease: Duration,
    /// The starboard's own user; messages it authored cannot be starred
    pub bot_user_id: Option<UserId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            claim_lease: DEFAULT_CLAIM_LEASE,
            bot_user_id: None,
        }
    }
}

/// Threshold rule for one community at one instant
#[derive(Debug, Clone, Copy)]
pub(crate) struct StarRule {
    pub threshold: u32,
    pub allow_self_star: bool,
    pub now_ms: u64,
    pub lease_ms: u64,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn check_self_star(acting: UserId, origin_author: UserId, allow_self_star: bool) -> StarResult<()> {
    if acting == origin_author && !allow_self_star {
        return Err(StarError::SelfStar);
    }
    Ok(())
}

/// Crossing decision on an entry whose stars are already recorded.
fn decide(entry: &mut StarredMessage, rule: &StarRule) -> Outcome {
    let count = entry.star_count();
    if count < rule.threshold {
        return Outcome::BelowThreshold { count };
    }

    let claim_live = entry
        .relay_claimed_at
        .is_some_and(|at| rule.now_ms.saturating_sub(at) < rule.lease_ms);
    if claim_live {
        return Outcome::RelayPending { count };
    }

    entry.relay_claimed_at = Some(rule.now_ms);
    Outcome::ThresholdCrossed { count }
}

/// Apply one star to an entry. On `Err` the entry must be discarded.
pub(crate) fn evaluate_star(
    entry: &mut StarredMessage,
    acting: UserId,
    origin_author: UserId,
    rule: &StarRule,
) -> StarResult<Outcome> {
    if entry.sent {
        return Err(StarError::AlreadySent);
    }
    if entry.has_starred(acting) {
        return Err(StarError::DuplicateStar);
    }
    check_self_star(acting, origin_author, rule.allow_self_star)?;

    entry.star_users.insert(acting);
    Ok(decide(entry, rule))
}

pub struct AggregationEngine<L: Ledger> {
    ledger: Arc<L>,
    config: EngineConfig,
}

impl<L: Ledger> AggregationEngine<L> {
    pub fn new(ledger: Arc<L>, config: EngineConfig) -> Self {
        Self { ledger, config }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Oldest message id that can still be starred.
    pub fn cutoff(&self) -> MessageId {
        cutoff(self.config.retention)
    }

    fn rule(&self, community: &CommunityConfig) -> StarRule {
        StarRule {
            threshold: community.star_threshold,
            allow_self_star: community.allow_self_star,
            now_ms: now_ms(),
            lease_ms: self.config.claim_lease.as_millis() as u64,
        }
    }

    /// First star on a message: creates its ledger entry.
    ///
    /// Never crosses, since every threshold is at least 2.
    pub async fn begin_starring(
        &self,
        message_id: MessageId,
        acting: UserId,
        origin_author: UserId,
        community: &CommunityConfig,
    ) -> StarResult<Outcome> {
        if is_expired(message_id, self.config.retention) {
            return Err(StarError::TooOld);
        }
        if self.config.bot_user_id == Some(origin_author) {
            return Err(StarError::RelayEcho);
        }
        check_self_star(acting, origin_author, community.allow_self_star)?;

        match self
            .ledger
            .insert(StarredMessage::new(message_id, acting))
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(StarError::AlreadyTracked),
            Err(e) => return Err(e.into()),
        }

        debug!(message_id = %message_id, user_id = %acting, "Started tracking message");
        Ok(Outcome::BelowThreshold { count: 1 })
    }

    /// Star an already tracked message.
    pub async fn apply_star(
        &self,
        message_id: MessageId,
        acting: UserId,
        origin_author: UserId,
        community: &CommunityConfig,
    ) -> StarResult<Outcome> {
        if is_expired(message_id, self.config.retention) {
            return Err(StarError::TooOld);
        }

        let rule = self.rule(community);
        let outcome = self
            .ledger
            .update(message_id, move |entry| {
                evaluate_star(entry, acting, origin_author, &rule)
            })
            .await?;

        match outcome {
            Outcome::ThresholdCrossed { count } => info!(
                message_id = %message_id,
                count,
                threshold = community.star_threshold,
                "Star threshold crossed"
            ),
            _ => debug!(message_id = %message_id, user_id = %acting, ?outcome, "Star recorded"),
        }

        Ok(outcome)
    }

    /// Re-run the crossing decision without adding a star.
    ///
    /// Used to retry a relay after a failed publish.
    pub async fn reclaim(
        &self,
        message_id: MessageId,
        community: &CommunityConfig,
    ) -> StarResult<Outcome> {
        if is_expired(message_id, self.config.retention) {
            return Err(StarError::TooOld);
        }

        let rule = self.rule(community);
        self.ledger
            .update(message_id, move |entry| {
                if entry.sent {
                    return Err(StarError::AlreadySent);
                }
                Ok(decide(entry, &rule))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RelayTarget};
    use proptest::prelude::*;

    fn community(threshold: u32, allow_self_star: bool) -> CommunityConfig {
        let mut config = CommunityConfig::new(CommunityId(1), RelayTarget::new("1", "token"));
        config.star_threshold = threshold;
        config.allow_self_star = allow_self_star;
        config
    }

    fn fresh_message() -> MessageId {
        MessageId::from_timestamp_ms(now_ms())
    }

    fn engine() -> (MemoryStore, AggregationEngine<MemoryStore>) {
        let store = MemoryStore::new();
        let engine = AggregationEngine::new(Arc::new(store.clone()), EngineConfig::default());
        (store, engine)
    }

    const AUTHOR: UserId = UserId(999);

    #[tokio::test]
    async fn test_three_star_scenario() {
        let (store, engine) = engine();
        let config = community(3, false);
        let msg = fresh_message();

        let first = engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(first, Outcome::BelowThreshold { count: 1 });

        let second = engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(second, Outcome::BelowThreshold { count: 2 });

        let third = engine
            .apply_star(msg, UserId(3), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(third, Outcome::ThresholdCrossed { count: 3 });

        let entry = store.entry(msg).unwrap();
        assert_eq!(entry.star_count(), 3);
        assert!(entry.relay_claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_star_mutates_nothing() {
        let (store, engine) = engine();
        let config = community(3, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap();
        let before = store.entry(msg).unwrap();

        for _ in 0..3 {
            let err = engine
                .apply_star(msg, UserId(2), AUTHOR, &config)
                .await
                .unwrap_err();
            assert!(matches!(err, StarError::DuplicateStar));
        }
        assert_eq!(store.entry(msg).unwrap(), before);
    }

    #[tokio::test]
    async fn test_too_old_regardless_of_state() {
        let (store, engine) = engine();
        let config = community(2, true);
        let forty_days = 40 * 24 * 60 * 60 * 1000;
        let old = MessageId::from_timestamp_ms(now_ms() - forty_days);

        let err = engine
            .begin_starring(old, UserId(1), AUTHOR, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::TooOld));

        // Even with a ledger entry present
        store
            .insert(StarredMessage::new(old, UserId(1)))
            .await
            .unwrap();
        let err = engine
            .apply_star(old, UserId(2), AUTHOR, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::TooOld));
        assert_eq!(store.entry(old).unwrap().star_count(), 1);
    }

    #[tokio::test]
    async fn test_already_sent_blocks_later_stars() {
        let (store, engine) = engine();
        let config = community(2, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        let crossed = engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap();
        assert!(crossed.is_crossing());
        store.mark_sent(msg).await.unwrap();

        for user in 3..6 {
            let err = engine
                .apply_star(msg, UserId(user), AUTHOR, &config)
                .await
                .unwrap_err();
            assert!(matches!(err, StarError::AlreadySent));
        }
        assert_eq!(store.entry(msg).unwrap().star_count(), 2);
    }

    #[tokio::test]
    async fn test_self_star_policy() {
        let (_store, engine) = engine();
        let msg = fresh_message();

        // Disallowed on the creation path
        let err = engine
            .begin_starring(msg, AUTHOR, AUTHOR, &community(3, false))
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::SelfStar));

        // Disallowed on the append path
        engine
            .begin_starring(msg, UserId(1), AUTHOR, &community(3, false))
            .await
            .unwrap();
        let err = engine
            .apply_star(msg, AUTHOR, AUTHOR, &community(3, false))
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::SelfStar));

        // Counts normally once allowed
        let outcome = engine
            .apply_star(msg, AUTHOR, AUTHOR, &community(3, true))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::BelowThreshold { count: 2 });
    }

    #[tokio::test]
    async fn test_begin_starring_twice_is_rejected() {
        let (store, engine) = engine();
        let config = community(3, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        let err = engine
            .begin_starring(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::AlreadyTracked));
        assert_eq!(store.entry(msg).unwrap().star_count(), 1);
    }

    #[tokio::test]
    async fn test_relay_echo_rejected() {
        let store = MemoryStore::new();
        let bot = UserId(4242);
        let engine = AggregationEngine::new(
            Arc::new(store.clone()),
            EngineConfig {
                bot_user_id: Some(bot),
                ..Default::default()
            },
        );

        let err = engine
            .begin_starring(fresh_message(), UserId(1), bot, &community(3, false))
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::RelayEcho));
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_star_unknown_message() {
        let (_store, engine) = engine();
        let err = engine
            .apply_star(fresh_message(), UserId(1), AUTHOR, &community(3, false))
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_live_claim_yields_relay_pending() {
        let (_store, engine) = engine();
        let config = community(2, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        let crossed = engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(crossed, Outcome::ThresholdCrossed { count: 2 });

        // Publish still in flight
        let pending = engine
            .apply_star(msg, UserId(3), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(pending, Outcome::RelayPending { count: 3 });
    }

    #[tokio::test]
    async fn test_released_claim_recrosses_on_next_star() {
        let (store, engine) = engine();
        let config = community(2, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap();

        // Publish failed
        store.release_claim(msg).await.unwrap();

        // Duplicate check still applies to the retry path
        let err = engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, StarError::DuplicateStar));

        let retry = engine
            .apply_star(msg, UserId(3), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(retry, Outcome::ThresholdCrossed { count: 3 });
    }

    #[tokio::test]
    async fn test_expired_claim_is_reacquired() {
        let store = MemoryStore::new();
        let engine = AggregationEngine::new(
            Arc::new(store.clone()),
            EngineConfig {
                claim_lease: Duration::ZERO,
                ..Default::default()
            },
        );
        let config = community(2, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        assert!(engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap()
            .is_crossing());
        assert!(engine.reclaim(msg, &config).await.unwrap().is_crossing());
    }

    #[tokio::test]
    async fn test_reclaim_after_sent() {
        let (store, engine) = engine();
        let config = community(2, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();
        assert_eq!(
            engine.reclaim(msg, &config).await.unwrap(),
            Outcome::BelowThreshold { count: 1 }
        );

        engine
            .apply_star(msg, UserId(2), AUTHOR, &config)
            .await
            .unwrap();
        store.mark_sent(msg).await.unwrap();
        assert!(matches!(
            engine.reclaim(msg, &config).await,
            Err(StarError::AlreadySent)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_stars_cross_once() {
        let (store, engine) = engine();
        let engine = Arc::new(engine);
        let config = community(5, false);
        let msg = fresh_message();

        engine
            .begin_starring(msg, UserId(1), AUTHOR, &config)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for user in 2..=20 {
            let engine = engine.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                engine.apply_star(msg, UserId(user), AUTHOR, &config).await
            }));
        }

        let outcomes: Vec<Outcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let crossings: Vec<&Outcome> = outcomes.iter().filter(|o| o.is_crossing()).collect();
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].count(), 5);
        assert_eq!(store.entry(msg).unwrap().star_count(), 20);
    }

    fn rule(threshold: u32, allow_self_star: bool) -> StarRule {
        StarRule {
            threshold,
            allow_self_star,
            now_ms: 1_700_000_000_000,
            lease_ms: 60_000,
        }
    }

    proptest! {
        /// Property: with a successful publish after each crossing, distinct stars cross
        /// exactly once, on the action whose count first equals the threshold
        #[test]
        fn crossing_fires_exactly_once(
            threshold in 2u32..12,
            extra in 0u32..12,
        ) {
            let rule = rule(threshold, false);
            let mut entry = StarredMessage::new(MessageId(1), UserId(1));
            let mut crossings = Vec::new();

            for user in 2..=(threshold + extra) {
                let mut draft = entry.clone();
                match evaluate_star(&mut draft, UserId(user as u64), AUTHOR, &rule) {
                    Ok(outcome) => {
                        entry = draft;
                        if outcome.is_crossing() {
                            crossings.push(outcome.count());
                            entry.sent = true;
                            entry.relay_claimed_at = None;
                        }
                    }
                    Err(StarError::AlreadySent) => {}
                    Err(other) => prop_assert!(false, "unexpected rejection: {}", other),
                }
            }

            prop_assert_eq!(crossings, vec![threshold]);
        }

        /// Property: self-star is rejected iff acting == author and the policy forbids it
        #[test]
        fn self_star_rejected_iff_forbidden(
            acting in 1u64..5,
            author in 1u64..5,
            allow in any::<bool>(),
        ) {
            let mut entry = StarredMessage::new(MessageId(1), UserId(100));
            let result = evaluate_star(&mut entry, UserId(acting), UserId(author), &rule(3, allow));

            let forbidden = acting == author && !allow;
            prop_assert_eq!(matches!(result, Err(StarError::SelfStar)), forbidden);
            if !forbidden {
                prop_assert_eq!(result.unwrap(), Outcome::BelowThreshold { count: 2 });
            }
        }

        /// Property: a sent entry rejects every star
        #[test]
        fn sent_entry_rejects_everything(
            acting in any::<u64>(),
            allow in any::<bool>(),
            threshold in 2u32..10,
        ) {
            let mut entry = StarredMessage::new(MessageId(1), UserId(1));
            entry.sent = true;
            let result = evaluate_star(&mut entry, UserId(acting), AUTHOR, &rule(threshold, allow));
            prop_assert!(matches!(result, Err(StarError::AlreadySent)));
        }
    }
}
