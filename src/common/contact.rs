//! Struct and implementation of the Contact entry in the Kademlia routing table
use std::{
    hash::{Hash, Hasher},
    net::SocketAddr,
    time::{Duration, Instant},
};

use crate::{common::Id, constants::PROTOCOL_VERSION};

#[derive(Debug, Clone)]
/// Identity and address of a peer, plus the bookkeeping the routing table
/// needs to decide when to drop it.
///
/// Two contacts are the same peer iff their [Id]s match.
pub struct Contact {
    id: Id,
    address: SocketAddr,
    version: u8,
    failed_rpcs: u32,
    last_seen: Instant,
}

impl Contact {
    /// Creates a new Contact from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> Contact {
        Contact {
            id,
            address,
            version: PROTOCOL_VERSION,
            failed_rpcs: 0,
            last_seen: Instant::now(),
        }
    }

    /// Set the protocol version announced by this peer.
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Creates a contact with a random id and a loopback address.
    pub fn random() -> Contact {
        Contact::new(Id::random(), SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Consecutive failed RPCs since the last success.
    pub fn failed_rpcs(&self) -> u32 {
        self.failed_rpcs
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time elapsed since the last successful interaction.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    // === Public Methods ===

    /// Any successful RPC resets the failure counter.
    pub fn record_success(&mut self) {
        self.failed_rpcs = 0;
        self.last_seen = Instant::now();
    }

    /// Count a failed or timed out RPC, returns `true` if the contact is now
    /// flagged for eviction.
    pub fn record_failure(&mut self, allowed_rpc_fails: u32) -> bool {
        self.failed_rpcs = self.failed_rpcs.saturating_add(1);
        self.should_evict(allowed_rpc_fails)
    }

    /// Returns `true` once the contact failed `allowed_rpc_fails` times in a row.
    pub fn should_evict(&self, allowed_rpc_fails: u32) -> bool {
        self.failed_rpcs >= allowed_rpc_fails
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_peer_iff_same_id() {
        let contact = Contact::random();
        let moved = Contact::new(*contact.id(), SocketAddr::from(([10, 0, 0, 1], 4000)));

        assert_eq!(contact, moved);
        assert_ne!(contact, Contact::random());
    }

    #[test]
    fn failures_flag_for_eviction() {
        let mut contact = Contact::random();

        for _ in 0..4 {
            assert!(!contact.record_failure(5));
        }
        assert!(contact.record_failure(5));
        assert_eq!(contact.failed_rpcs(), 5);
    }

    #[test]
    fn success_resets_failures() {
        let mut contact = Contact::random();
        let before = contact.last_seen();

        contact.record_failure(5);
        contact.record_failure(5);
        contact.record_success();

        assert_eq!(contact.failed_rpcs(), 0);
        assert!(contact.last_seen() >= before);
    }
}
