//! K-bucket covering one prefix range of the id space.

use std::collections::VecDeque;
use std::slice::Iter;
use std::time::{Duration, Instant};

use crate::common::{Contact, Id};

/// Outcome of [KBucket::add_or_update].
#[derive(Debug)]
pub enum BucketInsert {
    /// The contact was already known and moved to the most recently seen position.
    Updated,
    /// The contact was appended.
    Added,
    /// The bucket was full, and the returned contact was evicted to make room.
    Replaced(Contact),
    /// The bucket is full of healthy contacts, the rejected contact is handed back.
    Full(Contact),
}

/// Kbuckets are similar to LRU caches that evict unresponsive contacts,
/// without dropping any responsive contacts in the process.
///
/// A bucket covers every id sharing its first `depth` bits with `prefix`.
#[derive(Debug, Clone)]
pub struct KBucket {
    prefix: Id,
    depth: usize,
    capacity: usize,
    /// Contacts in the k-bucket, sorted by the least recently seen.
    contacts: Vec<Contact>,
    /// Recently seen contacts that didn't fit, most recent at the back.
    replacement_cache: VecDeque<Contact>,
    last_touched: Instant,
}

impl KBucket {
    pub fn new(prefix: Id, depth: usize, capacity: usize) -> Self {
        KBucket {
            prefix: prefix.truncate(depth),
            depth,
            capacity,
            contacts: Vec::with_capacity(capacity),
            replacement_cache: VecDeque::new(),
            last_touched: Instant::now(),
        }
    }

    // === Getters ===

    /// The bits shared by every id in this bucket, followed by zeros.
    ///
    /// This is also the smallest id covered by this bucket.
    pub fn prefix(&self) -> &Id {
        &self.prefix
    }

    /// Number of leading bits fixed by [Self::prefix].
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contacts.len() >= self.capacity
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.contacts.iter()
    }

    pub fn replacement_cache(&self) -> &VecDeque<Contact> {
        &self.replacement_cache
    }

    pub fn last_touched(&self) -> Instant {
        self.last_touched
    }

    pub fn covers(&self, id: &Id) -> bool {
        id.shares_prefix(&self.prefix, self.depth)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.iter().any(|contact| contact.id() == id)
    }

    pub fn get(&self, id: &Id) -> Option<&Contact> {
        self.iter().find(|contact| contact.id() == id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Contact> {
        self.contacts.iter_mut().find(|contact| contact.id() == id)
    }

    /// Smallest XOR distance any id in this bucket can have to `target`.
    pub fn min_distance(&self, target: &Id) -> Id {
        target.truncate(self.depth).xor(&self.prefix)
    }

    /// Returns `true` if this bucket was not touched for at least `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_touched) >= timeout
    }

    /// A random id within this bucket's range.
    pub fn random_id(&self) -> Id {
        Id::random_with_prefix(&self.prefix, self.depth)
    }

    // === Public Methods ===

    pub fn add_or_update(&mut self, incoming: Contact, allowed_rpc_fails: u32) -> BucketInsert {
        if let Some(index) = self.iter().position(|c| c.id() == incoming.id()) {
            self.contacts.remove(index);
            self.contacts.push(incoming);
            self.touch(Instant::now());

            BucketInsert::Updated
        } else if !self.is_full() {
            self.remove_replacement(incoming.id());
            self.contacts.push(incoming);
            self.touch(Instant::now());

            BucketInsert::Added
        } else if let Some(index) = self
            .iter()
            .position(|c| c.should_evict(allowed_rpc_fails))
        {
            // Least recently seen failing contact makes room for the new one.
            let evicted = self.contacts.remove(index);
            self.remove_replacement(incoming.id());
            self.contacts.push(incoming);
            self.touch(Instant::now());

            BucketInsert::Replaced(evicted)
        } else {
            BucketInsert::Full(incoming)
        }
    }

    /// Remember a contact that didn't fit, to promote it once a slot frees up.
    pub fn cache_replacement(&mut self, contact: Contact) {
        self.remove_replacement(contact.id());
        self.replacement_cache.push_back(contact);

        if self.replacement_cache.len() > self.capacity {
            self.replacement_cache.pop_front();
        }
    }

    /// Remove a contact, promoting the most recently seen replacement if any.
    pub fn remove(&mut self, id: &Id) -> Option<Contact> {
        let index = self.iter().position(|c| c.id() == id);

        match index {
            Some(index) => {
                let removed = self.contacts.remove(index);

                if let Some(replacement) = self.replacement_cache.pop_back() {
                    self.contacts.push(replacement);
                }

                Some(removed)
            }
            None => self.remove_replacement(id),
        }
    }

    /// Reset the failure counter and move the contact to the most recently
    /// seen position. Returns `false` if the contact is not in this bucket.
    pub fn record_success(&mut self, id: &Id) -> bool {
        match self.iter().position(|c| c.id() == id) {
            Some(index) => {
                let mut contact = self.contacts.remove(index);
                contact.record_success();
                self.contacts.push(contact);
                self.touch(Instant::now());
                true
            }
            None => false,
        }
    }

    /// Up to `count` contacts ordered by ascending XOR distance to `target`,
    /// ties broken by ascending id.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Contact> {
        let mut contacts = self.contacts.clone();

        contacts.sort_by(|a, b| {
            a.id()
                .xor(target)
                .cmp(&b.id().xor(target))
                .then_with(|| a.id().cmp(b.id()))
        });
        contacts.truncate(count);

        contacts
    }

    /// Split this bucket at the midpoint of its range.
    ///
    /// Returns the lower and upper halves, contacts keep their recency order.
    pub fn split(self) -> (KBucket, KBucket) {
        let depth = self.depth + 1;
        let bit = self.depth;

        let mut lower = KBucket::new(self.prefix.with_bit(bit, false), depth, self.capacity);
        let mut upper = KBucket::new(self.prefix.with_bit(bit, true), depth, self.capacity);
        lower.last_touched = self.last_touched;
        upper.last_touched = self.last_touched;

        for contact in self.contacts {
            if contact.id().bit(bit) {
                upper.contacts.push(contact);
            } else {
                lower.contacts.push(contact);
            }
        }

        for contact in self.replacement_cache {
            let half = if contact.id().bit(bit) {
                &mut upper
            } else {
                &mut lower
            };

            if half.is_full() {
                half.replacement_cache.push_back(contact);
            } else {
                half.contacts.push(contact);
            }
        }

        (lower, upper)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_touched = now;
    }

    // === Private Methods ===

    fn remove_replacement(&mut self, id: &Id) -> Option<Contact> {
        let index = self.replacement_cache.iter().position(|c| c.id() == id)?;
        self.replacement_cache.remove(index)
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use super::*;
    use crate::common::ID_SIZE;

    const ALLOWED_FAILS: u32 = 5;

    fn root(capacity: usize) -> KBucket {
        KBucket::new(Id::from([0; ID_SIZE]), 0, capacity)
    }

    #[test]
    fn should_not_add_more_than_k() {
        let mut bucket = root(20);

        for i in 0..20 {
            let contact = Contact::random();
            assert!(
                matches!(bucket.add_or_update(contact, ALLOWED_FAILS), BucketInsert::Added),
                "Failed to add contact {i}"
            );
        }

        let contact = Contact::random();

        assert!(matches!(
            bucket.add_or_update(contact, ALLOWED_FAILS),
            BucketInsert::Full(_)
        ));
        assert_eq!(bucket.len(), 20);
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut bucket = root(4);
        let mut known = vec![];

        for i in 0..200 {
            let contact = if i % 3 == 0 && !known.is_empty() {
                Contact::clone(&known[i % known.len()])
            } else {
                Contact::random()
            };
            known.push(contact.clone());

            if let BucketInsert::Full(rejected) = bucket.add_or_update(contact, ALLOWED_FAILS) {
                bucket.cache_replacement(rejected);
            }
            if i % 7 == 0 {
                if let Some(first) = bucket.iter().next().map(|c| *c.id()) {
                    bucket.remove(&first);
                }
            }

            assert!(bucket.len() <= 4);
            assert!(bucket.replacement_cache().len() <= 4);
        }
    }

    #[test]
    fn should_update_existing_contact() {
        let mut bucket = root(20);

        let contact1 = Contact::random();
        let contact2 = Contact::new(*contact1.id(), SocketAddr::from(([10, 0, 0, 1], 1)));

        bucket.add_or_update(contact1.clone(), ALLOWED_FAILS);
        bucket.add_or_update(Contact::random(), ALLOWED_FAILS);

        assert_ne!(bucket.contacts[1].id(), contact1.id());

        assert!(matches!(
            bucket.add_or_update(contact2.clone(), ALLOWED_FAILS),
            BucketInsert::Updated
        ));

        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.contacts[1].id(), contact1.id());
        assert_eq!(bucket.contacts[1].address(), contact2.address());
    }

    #[test]
    fn evicts_least_recently_seen_failing_contact() {
        let mut bucket = root(3);

        let contacts: Vec<_> = (0..3).map(|_| Contact::random()).collect();
        for contact in &contacts {
            bucket.add_or_update(contact.clone(), ALLOWED_FAILS);
        }

        for id in [contacts[1].id(), contacts[2].id()] {
            let contact = bucket.get_mut(id).unwrap();
            for _ in 0..ALLOWED_FAILS {
                contact.record_failure(ALLOWED_FAILS);
            }
        }

        let incoming = Contact::random();
        match bucket.add_or_update(incoming.clone(), ALLOWED_FAILS) {
            BucketInsert::Replaced(evicted) => assert_eq!(evicted.id(), contacts[1].id()),
            other => panic!("expected a replacement, got {other:?}"),
        }

        assert!(bucket.contains(incoming.id()));
        assert!(bucket.contains(contacts[0].id()));
        assert!(!bucket.contains(contacts[1].id()));
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn replacement_promoted_on_remove() {
        let mut bucket = root(2);

        let a = Contact::random();
        let b = Contact::random();
        let c = Contact::random();
        let d = Contact::random();

        bucket.add_or_update(a.clone(), ALLOWED_FAILS);
        bucket.add_or_update(b.clone(), ALLOWED_FAILS);

        for extra in [c.clone(), d.clone()] {
            if let BucketInsert::Full(rejected) = bucket.add_or_update(extra, ALLOWED_FAILS) {
                bucket.cache_replacement(rejected);
            }
        }
        assert_eq!(bucket.replacement_cache().len(), 2);

        bucket.remove(a.id());

        // Most recently seen replacement first.
        assert!(bucket.contains(d.id()));
        assert!(!bucket.contains(c.id()));
        assert_eq!(bucket.replacement_cache().len(), 1);
    }

    #[test]
    fn record_success_moves_to_back() {
        let mut bucket = root(20);

        let first = Contact::random();
        bucket.add_or_update(first.clone(), ALLOWED_FAILS);
        bucket.add_or_update(Contact::random(), ALLOWED_FAILS);

        bucket.get_mut(first.id()).unwrap().record_failure(ALLOWED_FAILS);
        assert!(bucket.record_success(first.id()));

        let last = bucket.iter().last().unwrap();
        assert_eq!(last.id(), first.id());
        assert_eq!(last.failed_rpcs(), 0);
        assert!(!bucket.record_success(&Id::random()));
    }

    #[test]
    fn closest_is_sorted() {
        let mut bucket = root(20);

        for _ in 0..20 {
            bucket.add_or_update(Contact::random(), ALLOWED_FAILS);
        }

        let target = Id::random();
        let closest = bucket.closest(&target, 5);

        assert_eq!(closest.len(), 5);
        for pair in closest.windows(2) {
            assert!(pair[0].id().xor(&target) < pair[1].id().xor(&target));
        }
    }

    #[test]
    fn split_halves_range() {
        let mut bucket = root(20);

        for _ in 0..20 {
            bucket.add_or_update(Contact::random(), ALLOWED_FAILS);
        }

        let (lower, upper) = bucket.split();

        assert_eq!(lower.depth(), 1);
        assert_eq!(upper.depth(), 1);
        assert_eq!(lower.len() + upper.len(), 20);
        assert!(lower.iter().all(|c| !c.id().bit(0)));
        assert!(upper.iter().all(|c| c.id().bit(0)));
        assert!(lower.prefix() < upper.prefix());
        assert!(upper.covers(&upper.random_id()));
        assert!(!lower.covers(&upper.random_id()));
    }

    #[test]
    fn min_distance_bounds_contacts() {
        let bucket = KBucket::new(Id::random(), 6, 20);
        let target = Id::random();
        let floor = bucket.min_distance(&target);

        for _ in 0..50 {
            assert!(bucket.random_id().xor(&target) >= floor);
        }
    }

    #[test]
    fn staleness() {
        let mut bucket = root(20);
        let now = Instant::now();
        bucket.touch(now);

        assert!(!bucket.is_stale(now, Duration::from_secs(60)));
        assert!(bucket.is_stale(now + Duration::from_secs(60), Duration::from_secs(60)));
    }
}
