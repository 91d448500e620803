//! Persistence for community settings and the starred-message ledger.
//!
//! - `traits`: the `CommunityStore` and `Ledger` contracts
//! - `sqlite`: production implementation on a shared sqlx pool
//! - `memory`: mutex-guarded implementation for tests

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::{Database, DatabaseOptions, SqliteCommunityStore, SqliteLedger};
pub use traits::{
    AuthorizeOutcome, CommunityConfig, CommunityStore, Ledger, LedgerStats, RelayTarget,
    SettingsChange, StarredMessage, StoreError, StoreResult, DEFAULT_STAR_THRESHOLD,
    MIN_STAR_THRESHOLD,
};
