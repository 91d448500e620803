//! Starboard - Community Vouching Relay
//!
//! Members star a message; once enough distinct members have starred it,
//! the message is posted exactly once to the community's starboard webhook.
//!
//! Key principles:
//! - Every star decision is one atomic ledger update
//! - Only the holder of a relay claim publishes
//! - Ledger entries expire with the retention window

pub mod cutoff;
pub mod engine;
pub mod error;
pub mod ids;
pub mod relay;
pub mod service;
pub mod store;
pub mod sweeper;

pub use engine::{AggregationEngine, EngineConfig, Outcome, StarAction};
pub use error::{StarError, StarResult};
pub use ids::{CommunityId, MessageId, UserId};
pub use service::{Delivery, ServiceConfig, StarReport, StarboardService};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig};
