//! Star action errors
//!
//! The first group of variants are input rejections: they are shown to the
//! acting user, are never retried, and leave every record untouched.

use crate::ids::CommunityId;
use crate::store::StoreError;

/// Result type for star handling.
pub type StarResult<T> = Result<T, StarError>;

#[derive(Debug, thiserror::Error)]
pub enum StarError {
    #[error("message is older than the retention window")]
    TooOld,

    #[error("message was already sent to the starboard")]
    AlreadySent,

    #[error("message was already starred by this user")]
    DuplicateStar,

    #[error("self stars are not allowed in this community")]
    SelfStar,

    #[error("message already has stars, check the starboard prompt")]
    AlreadyTracked,

    #[error("messages posted by the starboard cannot be starred")]
    RelayEcho,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("community {0} needs (re)authorization")]
    NeedsAuthorization(CommunityId),

    #[error("star threshold must be at least {min}, got {got}")]
    InvalidThreshold { got: u32, min: u32 },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// The relay may have posted the message; the claim stays until its lease ends
    #[error("Delivery unconfirmed: {0}")]
    DeliveryUnconfirmed(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl StarError {
    /// Whether this is a user-facing rejection of the star action itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StarError::TooOld
                | StarError::AlreadySent
                | StarError::DuplicateStar
                | StarError::SelfStar
                | StarError::AlreadyTracked
                | StarError::RelayEcho
        )
    }
}

impl From<StoreError> for StarError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => StarError::NotFound(what),
            other => StarError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections() {
        assert!(StarError::TooOld.is_rejection());
        assert!(StarError::DuplicateStar.is_rejection());
        assert!(StarError::SelfStar.is_rejection());
        assert!(StarError::AlreadySent.is_rejection());
        assert!(!StarError::DeliveryFailed("timeout".to_string()).is_rejection());
        assert!(!StarError::DeliveryUnconfirmed("timeout".to_string()).is_rejection());
        assert!(!StarError::NeedsAuthorization(CommunityId(1)).is_rejection());
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: StarError = StoreError::NotFound("message 42".to_string()).into();
        assert!(matches!(err, StarError::NotFound(ref what) if what == "message 42"));

        let err: StarError = StoreError::Corrupt("bad row".to_string()).into();
        assert!(matches!(err, StarError::Store(StoreError::Corrupt(_))));
    }
}
