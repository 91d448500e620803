//! Store Trait Abstractions
//!
//! The community settings store and the starred-message ledger are the only
//! mutators of their own records. Callers express intent through atomic
//! primitives; none of these traits offers a separate read-then-write pair.
//! `MemoryStore` implements both for tests.

use crate::ids::{CommunityId, MessageId, UserId};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use zeroize::Zeroizing;

/// Lowest star threshold a community may configure.
pub const MIN_STAR_THRESHOLD: u32 = 2;

/// Threshold a newly authorized community starts with.
pub const DEFAULT_STAR_THRESHOLD: u32 = 3;

/// Webhook the starboard posts to.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub id: String,
    secret: Zeroizing<String>,
}

impl RelayTarget {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayTarget")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Per-community starboard settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityConfig {
    pub community_id: CommunityId,
    pub relay_target: RelayTarget,
    /// Distinct stars needed before a message is relayed (always >= 2)
    pub star_threshold: u32,
    pub allow_self_star: bool,
    /// Delete the ephemeral star prompt once the message has been relayed
    pub delete_origin_after_relay: bool,
}

impl CommunityConfig {
    /// Settings for a freshly authorized community.
    pub fn new(community_id: CommunityId, relay_target: RelayTarget) -> Self {
        Self {
            community_id,
            relay_target,
            star_threshold: DEFAULT_STAR_THRESHOLD,
            allow_self_star: false,
            delete_origin_after_relay: false,
        }
    }
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub community_id: CommunityId,
    pub star_threshold: Option<u32>,
    pub allow_self_star: Option<bool>,
    pub delete_origin_after_relay: Option<bool>,
}

impl SettingsChange {
    pub fn new(community_id: CommunityId) -> Self {
        Self {
            community_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.star_threshold.is_none()
            && self.allow_self_star.is_none()
            && self.delete_origin_after_relay.is_none()
    }
}

/// Result of (re)authorizing a community's relay target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Community was unknown and has been created with default settings
    Created,
    /// Relay target replaced; the previous webhook can be deleted
    Updated,
}

/// Ledger record for one starred message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarredMessage {
    pub id: MessageId,
    pub star_users: BTreeSet<UserId>,
    /// Set once the message reached the relay; never reset
    pub sent: bool,
    /// Unix ms at which an actor claimed the right to publish, if any
    pub relay_claimed_at: Option<u64>,
}

impl StarredMessage {
    /// New entry seeded with its first star.
    pub fn new(id: MessageId, first_star: UserId) -> Self {
        Self {
            id,
            star_users: BTreeSet::from([first_star]),
            sent: false,
            relay_claimed_at: None,
        }
    }

    pub fn star_count(&self) -> u32 {
        self.star_users.len() as u32
    }

    pub fn has_starred(&self, user: UserId) -> bool {
        self.star_users.contains(&user)
    }
}

/// Ledger-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub tracked: u64,
    pub sent: u64,
    pub total_stars: u64,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Per-community settings store
#[async_trait]
pub trait CommunityStore: Send + Sync + 'static {
    /// Settings for a community; `NotFound` if it was never authorized.
    async fn get(&self, community: CommunityId) -> StoreResult<CommunityConfig>;

    /// Create the community, or replace its relay target if it exists.
    async fn authorize(
        &self,
        community: CommunityId,
        target: RelayTarget,
    ) -> StoreResult<AuthorizeOutcome>;

    /// Apply a partial settings update atomically and return the result.
    async fn apply_settings(&self, change: &SettingsChange) -> StoreResult<CommunityConfig>;

    /// Number of authorized communities.
    async fn count(&self) -> StoreResult<u64>;
}

/// Starred-message ledger
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Insert a new entry; `Conflict` if the message is already tracked.
    async fn insert(&self, entry: StarredMessage) -> StoreResult<()>;

    async fn get(&self, id: MessageId) -> StoreResult<Option<StarredMessage>>;

    /// Atomic read-modify-write of one entry.
    ///
    /// `apply` runs while the entry is exclusively held. Its changes are
    /// persisted only if it returns `Ok`; an `Err` leaves the entry untouched.
    /// Star users may only be added and `sent` cannot be cleared.
    /// A missing entry yields `StoreError::NotFound` converted into `E`.
    async fn update<T, E, F>(&self, id: MessageId, apply: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(&mut StarredMessage) -> Result<T, E> + Send;

    /// Set the sent flag and drop any relay claim.
    async fn mark_sent(&self, id: MessageId) -> StoreResult<()>;

    /// Drop a relay claim without touching the sent flag.
    async fn release_claim(&self, id: MessageId) -> StoreResult<()>;

    /// Ids of every tracked message.
    async fn ids(&self) -> StoreResult<Vec<MessageId>>;

    /// Delete an entry and its stars. Returns whether it existed.
    async fn delete(&self, id: MessageId) -> StoreResult<bool>;

    async fn stats(&self) -> StoreResult<LedgerStats>;
}
