//! Constants used by the Kademlia DHT network.
//!
//! Where possible the naming follows the original Kademlia paper, as do the
//! suggested default values. Every value here is only a default: the
//! [crate::Config] fields override them per node.

use std::time::Duration;

/// Size of an [crate::Id] in bytes, 160 bits.
pub use crate::common::ID_SIZE;

/// Represents the degree of parallelism in network calls.
pub const ALPHA: usize = 3;

/// The maximum number of contacts stored in a k-bucket. Must be an even number.
pub const K: usize = 20;

/// The default maximum time a node lookup is allowed to take.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(600);

/// The timeout for a single remote procedure call.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// The timeout for a [crate::Transport] to receive a complete message once a
/// connection is made. Ensures there are no stale pending requests in the
/// transport itself.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1800);

/// How long to wait before an unused k-bucket is refreshed.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(3600);

/// How long to wait before a node replicates any data it stores.
pub const REPLICATE_INTERVAL: Duration = REFRESH_TIMEOUT;

/// How long to wait before a node checks whether any buckets need refreshing or
/// data needs republishing. Every 10 minutes.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(REFRESH_TIMEOUT.as_secs() / 6);

/// The number of failed remote procedure calls allowed for a contact. If this
/// is equalled or exceeded then the contact is removed from the routing table.
pub const ALLOWED_RPC_FAILS: u32 = 5;

/// The number of nodes to attempt to use to store a value in the DHT.
pub const DUPLICATION_COUNT: usize = K;

/// The duration (in seconds) that is added to a value's creation time in order
/// to work out its expiry timestamp. -1 denotes no expiry point.
pub const EXPIRY_DURATION: i64 = -1;

/// Version of the protocol this node speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest value accepted by a STORE request, larger requests are answered
/// with [crate::ErrorCode::RequestTooBig].
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Size of the blacklist of misbehaving peers.
pub const BLACKLIST_SIZE: usize = 1000;

/// Convert an expiry in seconds, as found in [EXPIRY_DURATION], to a [Duration].
///
/// Negative values mean the value never expires and return `None`.
pub fn expiry_from_seconds(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds).ok().map(Duration::from_secs)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derived_intervals() {
        assert_eq!(REPLICATE_INTERVAL, REFRESH_TIMEOUT);
        assert_eq!(REFRESH_INTERVAL, Duration::from_secs(600));
        assert_eq!(DUPLICATION_COUNT, K);
        assert_eq!(K % 2, 0);
    }

    #[test]
    fn expiry_sentinel() {
        assert_eq!(expiry_from_seconds(EXPIRY_DURATION), None);
        assert_eq!(expiry_from_seconds(0), Some(Duration::ZERO));
        assert_eq!(expiry_from_seconds(90), Some(Duration::from_secs(90)));
    }
}
