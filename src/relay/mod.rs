//! Publication relay
//!
//! - `traits`: the `Relay` seam and its message/receipt types
//! - `webhook`: HTTP webhook implementation (reqwest)
//! - `publisher`: exactly-once publish and origin cleanup on top of a `Relay`
//! - `retry`: backoff for delivery failures that cannot have posted anything
//! - `mock`: recording relay for tests

pub mod mock;
pub mod publisher;
pub mod retry;
pub mod traits;
pub mod webhook;

pub use mock::{MockDelivery, MockRelay};
pub use publisher::{publish_deadline, Publisher, DEFAULT_ORIGIN_DELETE_DELAY};
pub use retry::{retry_with_backoff, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use traits::{
    DeliveryReceipt, OriginResponse, Relay, RelayError, RelayResult, RenderedMessage,
};
pub use webhook::{WebhookRelay, DEFAULT_RELAY_BASE_URL};
