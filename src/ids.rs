//! Snowflake identifiers
//!
//! Messages, users and communities are all addressed by platform snowflakes:
//! a `u64` whose high 42 bits hold milliseconds since the platform epoch.
//! Because the timestamp sits in the high-order bits, snowflakes sort by
//! creation time and can be compared numerically against a cutoff.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform epoch (2015-01-01T00:00:00Z) in Unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// Bit offset of the timestamp inside a snowflake.
pub const TIMESTAMP_SHIFT: u32 = 22;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw snowflake value.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

snowflake!(
    /// Identifier of a chat message (the thing being starred).
    MessageId
);
snowflake!(
    /// Identifier of a community member.
    UserId
);
snowflake!(
    /// Identifier of a community (guild).
    CommunityId
);

impl MessageId {
    /// Smallest snowflake minted at the given Unix millisecond.
    ///
    /// Times before the platform epoch clamp to zero.
    pub fn from_timestamp_ms(unix_ms: u64) -> Self {
        Self(unix_ms.saturating_sub(SNOWFLAKE_EPOCH_MS) << TIMESTAMP_SHIFT)
    }

    /// Unix millisecond at which this snowflake was minted.
    pub fn timestamp_ms(self) -> u64 {
        (self.0 >> TIMESTAMP_SHIFT) + SNOWFLAKE_EPOCH_MS
    }
}
