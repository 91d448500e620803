//! In-memory store for testing
//!
//! Provides `MemoryStore`, implementing both `CommunityStore` and `Ledger`
//! without a database. Every operation runs under one mutex, which makes each
//! ledger update trivially atomic.

use super::traits::*;
use crate::ids::{CommunityId, MessageId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Mock store for testing
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    communities: HashMap<CommunityId, CommunityConfig>,
    messages: HashMap<MessageId, StarredMessage>,
    /// Deletes of these ids fail, to exercise sweeper error handling
    failing_deletes: HashSet<MessageId>,
}

impl MemoryStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic inside a test closure must not wedge every later assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every future delete of `id` fail
    pub fn fail_deletes_for(&self, id: MessageId) {
        self.lock().failing_deletes.insert(id);
    }

    /// Snapshot of a ledger entry for assertions
    pub fn entry(&self, id: MessageId) -> Option<StarredMessage> {
        self.lock().messages.get(&id).cloned()
    }

    /// Number of tracked messages
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }
}

#[async_trait]
impl CommunityStore for MemoryStore {
    async fn get(&self, community: CommunityId) -> StoreResult<CommunityConfig> {
        self.lock()
            .communities
            .get(&community)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("community {}", community)))
    }

    async fn authorize(
        &self,
        community: CommunityId,
        target: RelayTarget,
    ) -> StoreResult<AuthorizeOutcome> {
        let mut state = self.lock();
        match state.communities.get_mut(&community) {
            Some(existing) => {
                existing.relay_target = target;
                Ok(AuthorizeOutcome::Updated)
            }
            None => {
                state
                    .communities
                    .insert(community, CommunityConfig::new(community, target));
                Ok(AuthorizeOutcome::Created)
            }
        }
    }

    async fn apply_settings(&self, change: &SettingsChange) -> StoreResult<CommunityConfig> {
        if let Some(threshold) = change.star_threshold {
            if threshold < MIN_STAR_THRESHOLD {
                return Err(StoreError::Invalid(format!(
                    "star threshold {} is below {}",
                    threshold, MIN_STAR_THRESHOLD
                )));
            }
        }

        let mut state = self.lock();
        let config = state
            .communities
            .get_mut(&change.community_id)
            .ok_or_else(|| StoreError::NotFound(format!("community {}", change.community_id)))?;

        if let Some(threshold) = change.star_threshold {
            config.star_threshold = threshold;
        }
        if let Some(allow) = change.allow_self_star {
            config.allow_self_star = allow;
        }
        if let Some(delete) = change.delete_origin_after_relay {
            config.delete_origin_after_relay = delete;
        }
        Ok(config.clone())
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.lock().communities.len() as u64)
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn insert(&self, entry: StarredMessage) -> StoreResult<()> {
        let mut state = self.lock();
        if state.messages.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!(
                "message {} already tracked",
                entry.id
            )));
        }
        state.messages.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: MessageId) -> StoreResult<Option<StarredMessage>> {
        Ok(self.lock().messages.get(&id).cloned())
    }

    async fn update<T, E, F>(&self, id: MessageId, apply: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&mut StarredMessage) -> Result<T, E> + Send,
    {
        let mut state = self.lock();
        let current = state
            .messages
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;

        let mut draft = current.clone();
        let value = apply(&mut draft)?;

        if !current.star_users.is_subset(&draft.star_users) {
            return Err(StoreError::Corrupt(format!("message {}: star users removed", id)).into());
        }
        draft.sent |= current.sent;
        state.messages.insert(id, draft);
        Ok(value)
    }

    async fn mark_sent(&self, id: MessageId) -> StoreResult<()> {
        let mut state = self.lock();
        let entry = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
        entry.sent = true;
        entry.relay_claimed_at = None;
        Ok(())
    }

    async fn release_claim(&self, id: MessageId) -> StoreResult<()> {
        let mut state = self.lock();
        let entry = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
        entry.relay_claimed_at = None;
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<MessageId>> {
        let mut ids: Vec<MessageId> = self.lock().messages.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: MessageId) -> StoreResult<bool> {
        let mut state = self.lock();
        if state.failing_deletes.contains(&id) {
            return Err(StoreError::Conflict(format!("message {} is locked", id)));
        }
        Ok(state.messages.remove(&id).is_some())
    }

    async fn stats(&self) -> StoreResult<LedgerStats> {
        let state = self.lock();
        Ok(LedgerStats {
            tracked: state.messages.len() as u64,
            sent: state.messages.values().filter(|m| m.sent).count() as u64,
            total_stars: state
                .messages
                .values()
                .map(|m| m.star_users.len() as u64)
                .sum(),
        })
    }
}
