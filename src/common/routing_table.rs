//! Kademlia routing table of prefix-range k-buckets, split on demand.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, trace};

use crate::common::{BucketInsert, ClosestContacts, Contact, Id, KBucket, ID_BITS};
use crate::constants::{ALLOWED_RPC_FAILS, BLACKLIST_SIZE, K};

#[derive(Debug)]
/// Kademlia routing table.
///
/// Buckets cover disjoint, exhaustive ranges of the id space and are kept
/// sorted by range. Only the bucket covering this node's own id is ever
/// split, every other full bucket falls back to its eviction policy.
pub struct RoutingTable {
    id: Id,
    k: usize,
    allowed_rpc_fails: u32,
    buckets: Vec<KBucket>,
    blacklist: LruCache<Id, ()>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id and default parameters.
    pub fn new(id: Id) -> Self {
        Self::with_params(id, K, ALLOWED_RPC_FAILS, BLACKLIST_SIZE)
    }

    /// Create a new [RoutingTable] with explicit bucket capacity `k`, failure
    /// threshold, and blacklist size.
    pub fn with_params(id: Id, k: usize, allowed_rpc_fails: u32, blacklist_size: usize) -> Self {
        let root = KBucket::new(Id::from([0; crate::common::ID_SIZE]), 0, k);

        RoutingTable {
            id,
            k,
            allowed_rpc_fails,
            buckets: vec![root],
            blacklist: LruCache::new(NonZeroUsize::new(blacklist_size).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Maximum number of contacts per bucket.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    /// Returns an iterator over the contacts in this routing table.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.iter().flat_map(|bucket| bucket.iter())
    }

    pub fn get_contact(&self, id: &Id) -> Option<&Contact> {
        self.buckets[self.find_bucket(id)].get(id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.get_contact(id).is_some()
    }

    pub fn is_blacklisted(&self, id: &Id) -> bool {
        self.blacklist.contains(id)
    }

    /// Index of the bucket whose range contains `id`, in O(log(buckets)).
    pub fn find_bucket(&self, id: &Id) -> usize {
        self.buckets
            .partition_point(|bucket| bucket.prefix() <= id)
            .saturating_sub(1)
    }

    // === Public Methods ===

    /// Attempts to add a contact to this routing table, and return `true` if it did.
    ///
    /// A known contact is moved to the most recently seen position of its bucket.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        if contact.id() == &self.id {
            // Do not add self to the routing_table
            return false;
        }

        if self.is_blacklisted(contact.id()) {
            trace!(id = ?contact.id(), "Ignoring blacklisted contact");
            return false;
        }

        let mut contact = contact;

        loop {
            let index = self.find_bucket(contact.id());

            match self.buckets[index].add_or_update(contact, self.allowed_rpc_fails) {
                BucketInsert::Updated | BucketInsert::Added => return true,
                BucketInsert::Replaced(evicted) => {
                    debug!(evicted = ?evicted.id(), failed_rpcs = evicted.failed_rpcs(), "Evicted failing contact");
                    return true;
                }
                BucketInsert::Full(rejected) => {
                    let bucket = &self.buckets[index];

                    if bucket.covers(&self.id) && bucket.depth() < ID_BITS {
                        self.split(index);
                        contact = rejected;
                        continue;
                    }

                    self.buckets[index].cache_replacement(rejected);
                    return false;
                }
            }
        }
    }

    /// Remove a contact from this routing table.
    pub fn remove_contact(&mut self, id: &Id) -> Option<Contact> {
        let index = self.find_bucket(id);
        self.buckets[index].remove(id)
    }

    /// Reset the failure counter of a known contact.
    pub fn record_success(&mut self, id: &Id) -> bool {
        let index = self.find_bucket(id);
        self.buckets[index].record_success(id)
    }

    /// Count a failed RPC against a contact, evicting it once it reaches the
    /// allowed number of failures. Returns the evicted contact.
    pub fn record_failure(&mut self, id: &Id) -> Option<Contact> {
        let index = self.find_bucket(id);
        let allowed = self.allowed_rpc_fails;

        let flagged = self.buckets[index]
            .get_mut(id)
            .map(|contact| contact.record_failure(allowed))?;

        if flagged {
            debug!(?id, "Contact reached the allowed RPC failures, evicting");
            self.buckets[index].remove(id)
        } else {
            None
        }
    }

    /// Evict a misbehaving contact and refuse to add it again while it
    /// remains in the blacklist.
    pub fn blacklist(&mut self, id: &Id) {
        debug!(?id, "Blacklisting contact");

        self.remove_contact(id);
        self.blacklist.put(*id, ());
    }

    /// Return up to `count` contacts closest to the target, sorted by
    /// ascending XOR distance.
    pub fn closest_contacts(&self, target: &Id, count: usize) -> Vec<Contact> {
        self.closest_matching(target, count, |_| true)
    }

    /// Same as [Self::closest_contacts] but never returns `excluded`, used when
    /// answering a peer about its own neighbourhood.
    pub fn closest_contacts_excluding(
        &self,
        target: &Id,
        count: usize,
        excluded: &Id,
    ) -> Vec<Contact> {
        self.closest_matching(target, count, |contact| contact.id() != excluded)
    }

    /// Mark the bucket covering `id` as recently used.
    pub fn touch_bucket(&mut self, id: &Id, now: Instant) {
        let index = self.find_bucket(id);
        self.buckets[index].touch(now);
    }

    /// Returns a random id inside each bucket not touched for `timeout`.
    pub fn stale_buckets(&self, now: Instant, timeout: Duration) -> Vec<Id> {
        self.buckets
            .iter()
            .filter(|bucket| bucket.is_stale(now, timeout))
            .map(|bucket| bucket.random_id())
            .collect()
    }

    // === Private Methods ===

    fn split(&mut self, index: usize) {
        let bucket = self.buckets.remove(index);
        let depth = bucket.depth();
        let (lower, upper) = bucket.split();

        trace!(depth = depth + 1, lower = lower.len(), upper = upper.len(), "Split bucket");

        self.buckets.insert(index, upper);
        self.buckets.insert(index, lower);
    }

    /// Visit buckets nearest to the target first, and stop expanding once no
    /// remaining bucket can hold a contact closer than the `count`th found.
    fn closest_matching<F>(&self, target: &Id, count: usize, filter: F) -> Vec<Contact>
    where
        F: Fn(&Contact) -> bool,
    {
        if count == 0 {
            return Vec::new();
        }

        let mut order: Vec<(Id, usize)> = self
            .buckets
            .iter()
            .enumerate()
            .map(|(index, bucket)| (bucket.min_distance(target), index))
            .collect();
        order.sort();

        let mut closest = ClosestContacts::new(*target);

        for (min_distance, index) in order {
            if let Some(furthest) = closest.contacts().get(count - 1) {
                if furthest.id().xor(target) < min_distance {
                    break;
                }
            }

            for contact in self.buckets[index].iter() {
                if !contact.should_evict(self.allowed_rpc_fails) && filter(contact) {
                    closest.add(contact.clone());
                }
            }
        }

        closest.truncate(count);
        closest.into_iter().collect()
    }
}
