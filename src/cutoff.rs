//! Retention cutoff
//!
//! Messages older than the retention window can no longer be starred and are
//! purged from the ledger by the sweeper. The cutoff is expressed as a
//! snowflake so it compares directly against message ids.

use crate::ids::MessageId;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default retention window (30 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Oldest message id still inside the retention window at `now`.
pub fn cutoff_at(now: SystemTime, retention: Duration) -> MessageId {
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let retention_ms = retention.as_millis() as u64;
    MessageId::from_timestamp_ms(now_ms.saturating_sub(retention_ms))
}

/// Oldest message id still inside the retention window right now.
pub fn cutoff(retention: Duration) -> MessageId {
    cutoff_at(SystemTime::now(), retention)
}

/// Whether a message has aged out of the retention window.
pub fn is_expired(message: MessageId, retention: Duration) -> bool {
    message < cutoff(retention)
}
