//! Iterative, ALPHA-wide lookup converging on the closest contacts to a target.
//!
//! A [Lookup] never does I/O. The actor polls it for the next batch of
//! contacts to query, sends the requests, and feeds outcomes back through
//! [Lookup::on_nodes], [Lookup::on_value] and [Lookup::on_failure].

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, trace};

use crate::common::{ClosestContacts, Contact, Id, ValueItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Which request a lookup sends to the contacts it visits.
pub enum LookupMode {
    FindNode,
    FindValue,
}

#[derive(Debug)]
/// What the actor should do next for a lookup.
pub enum LookupStep {
    /// Send the lookup's request to every one of these contacts before
    /// waiting on any of them.
    Query(Vec<Contact>),
    /// Requests of the current round are still outstanding.
    Wait,
    Done(LookupOutcome),
}

#[derive(Debug, Clone)]
pub struct LookupOutcome {
    pub target: Id,
    pub mode: LookupMode,
    /// Up to `k` contacts that answered, by ascending distance to the target.
    pub closest: Vec<Contact>,
    /// Set when a [LookupMode::FindValue] lookup found the value.
    pub value: Option<ValueItem>,
    /// Closest responder that did not return the value, where the found value
    /// gets cached.
    pub cache_candidate: Option<Contact>,
    /// The lookup hit its deadline and returned what it had so far.
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct Lookup {
    local_id: Id,
    target: Id,
    mode: LookupMode,
    alpha: usize,
    k: usize,
    deadline: Instant,

    /// Every candidate heard of, closest first.
    shortlist: ClosestContacts,
    /// Contacts already sent a request, whatever came of it.
    contacted: HashSet<Id>,
    failed: HashSet<Id>,
    pending: HashSet<Id>,
    responders: ClosestContacts,

    /// Smallest distance to the target seen in any successful response.
    closest_found: Option<Id>,
    /// `closest_found` when the current round started.
    round_start: Option<Id>,
    rounds: usize,
    final_round: bool,

    value: Option<ValueItem>,
}

impl Lookup {
    pub fn new(
        local_id: Id,
        target: Id,
        mode: LookupMode,
        seeds: impl IntoIterator<Item = Contact>,
        alpha: usize,
        k: usize,
        deadline: Instant,
    ) -> Self {
        let mut shortlist = ClosestContacts::new(target);

        for contact in seeds {
            if contact.id() != &local_id {
                shortlist.add(contact);
            }
        }

        trace!(?target, ?mode, seeds = shortlist.len(), "New lookup");

        Self {
            local_id,
            target,
            mode,
            alpha: alpha.max(1),
            k,
            deadline,

            shortlist,
            contacted: HashSet::new(),
            failed: HashSet::new(),
            pending: HashSet::new(),
            responders: ClosestContacts::new(target),

            closest_found: None,
            round_start: None,
            rounds: 0,
            final_round: false,

            value: None,
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn mode(&self) -> LookupMode {
        self.mode
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Number of requests sent and not yet resolved.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if a request to this contact is outstanding.
    pub fn is_pending(&self, id: &Id) -> bool {
        self.pending.contains(id)
    }

    pub fn responders(&self) -> &ClosestContacts {
        &self.responders
    }

    // === Public Methods ===

    /// Add a candidate to query in a coming round if it is among the closest.
    pub fn add_candidate(&mut self, contact: Contact) {
        if contact.id() != &self.local_id {
            self.shortlist.add(contact);
        }
    }

    /// Advance the lookup.
    ///
    /// A new round only starts once every request of the previous round
    /// resolved. If a round did not get any closer to the target, one last
    /// round visits every unqueried contact among the `k` closest.
    pub fn poll(&mut self, now: Instant) -> LookupStep {
        if self.value.is_some() {
            return LookupStep::Done(self.outcome(false));
        }

        if now >= self.deadline {
            debug!(target = ?self.target, pending = self.pending.len(), "Lookup deadline reached");

            return LookupStep::Done(self.outcome(true));
        }

        if !self.pending.is_empty() {
            return LookupStep::Wait;
        }

        if self.final_round {
            return LookupStep::Done(self.outcome(false));
        }

        let to_query: Vec<Contact> = if self.rounds == 0 || self.improved() {
            self.unqueried().take(self.alpha).cloned().collect()
        } else {
            self.final_round = true;
            self.unqueried().cloned().collect()
        };

        if to_query.is_empty() {
            return LookupStep::Done(self.outcome(false));
        }

        self.rounds += 1;
        self.round_start = self.closest_found;

        for contact in &to_query {
            self.contacted.insert(*contact.id());
            self.pending.insert(*contact.id());
        }

        trace!(
            target = ?self.target,
            round = self.rounds,
            final_round = self.final_round,
            count = to_query.len(),
            "Lookup round"
        );

        LookupStep::Query(to_query)
    }

    /// A contact answered with the closest contacts it knows of.
    ///
    /// Returns `false` for responses nothing is waiting for.
    pub fn on_nodes(&mut self, from: &Contact, contacts: Vec<Contact>) -> bool {
        if !self.pending.remove(from.id()) {
            trace!(target = ?self.target, from = ?from.id(), "Ignoring straggler response");
            return false;
        }

        self.observe(from.id());
        self.responders.add(from.clone());

        for contact in contacts {
            if contact.id() == &self.local_id {
                continue;
            }

            self.observe(contact.id());
            self.shortlist.add(contact);
        }

        true
    }

    /// A contact answered with the value, which ends a
    /// [LookupMode::FindValue] lookup.
    pub fn on_value(&mut self, from: &Contact, item: ValueItem) -> bool {
        if !self.pending.remove(from.id()) {
            trace!(target = ?self.target, from = ?from.id(), "Ignoring straggler value");
            return false;
        }

        self.observe(from.id());

        if self.value.is_none() {
            debug!(target = ?self.target, from = ?from.id(), "Lookup found value");
            self.value = Some(item);
        }

        true
    }

    /// The request failed or timed out. The contact stays contacted but is
    /// never queried again nor returned.
    pub fn on_failure(&mut self, from: &Id) -> bool {
        if !self.pending.remove(from) {
            return false;
        }

        self.failed.insert(*from);

        true
    }

    // === Private Methods ===

    /// Unqueried contacts among the `k` closest that have not failed.
    fn unqueried(&self) -> impl Iterator<Item = &Contact> {
        self.shortlist
            .contacts()
            .iter()
            .filter(|contact| !self.failed.contains(contact.id()))
            .take(self.k)
            .filter(|contact| !self.contacted.contains(contact.id()))
    }

    fn observe(&mut self, id: &Id) {
        let distance = id.xor(&self.target);

        match self.closest_found {
            Some(closest) if closest <= distance => {}
            _ => self.closest_found = Some(distance),
        }
    }

    fn improved(&self) -> bool {
        match (self.closest_found, self.round_start) {
            (Some(now), Some(before)) => now < before,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn outcome(&self, timed_out: bool) -> LookupOutcome {
        let closest: Vec<Contact> = self
            .responders
            .contacts()
            .iter()
            .take(self.k)
            .cloned()
            .collect();

        let cache_candidate = self
            .value
            .as_ref()
            .and_then(|_| self.responders.first().cloned());

        debug!(
            target = ?self.target,
            mode = ?self.mode,
            rounds = self.rounds,
            contacted = self.contacted.len(),
            failed = self.failed.len(),
            responders = self.responders.len(),
            found = self.value.is_some(),
            timed_out,
            "Lookup done"
        );

        LookupOutcome {
            target: self.target,
            mode: self.mode,
            closest,
            value: self.value.clone(),
            cache_candidate,
            timed_out,
        }
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::time::Duration;

    use crate::common::{Timestamp, ID_SIZE};

    use super::*;

    fn id(first: u8) -> Id {
        let mut bytes = [0; ID_SIZE];
        bytes[0] = first;
        Id::from(bytes)
    }

    fn contact(first: u8) -> Contact {
        Contact::new(
            id(first),
            SocketAddr::from(([127, 0, 0, 1], 1000 + first as u16)),
        )
    }

    fn ids(contacts: &[Contact]) -> Vec<u8> {
        contacts.iter().map(|c| c.id().as_bytes()[0]).collect()
    }

    fn query(step: LookupStep) -> Vec<Contact> {
        match step {
            LookupStep::Query(contacts) => contacts,
            other => panic!("expected a query step, got {other:?}"),
        }
    }

    fn done(step: LookupStep) -> LookupOutcome {
        match step {
            LookupStep::Done(outcome) => outcome,
            other => panic!("expected a done step, got {other:?}"),
        }
    }

    fn lookup(seeds: &[u8], mode: LookupMode) -> (Lookup, Instant) {
        let now = Instant::now();
        let lookup = Lookup::new(
            id(0xff),
            id(0),
            mode,
            seeds.iter().map(|b| contact(*b)),
            3,
            20,
            now + Duration::from_secs(600),
        );

        (lookup, now)
    }

    #[test]
    fn round_fans_out_alpha_requests() {
        let (mut lookup, now) = lookup(&[10, 20, 30, 40, 50], LookupMode::FindNode);

        let first = query(lookup.poll(now));
        assert_eq!(ids(&first), vec![10, 20, 30]);
        assert_eq!(lookup.pending(), 3);

        // The next round waits for the whole current round.
        assert!(matches!(lookup.poll(now), LookupStep::Wait));
        lookup.on_nodes(&first[0], vec![]);
        lookup.on_nodes(&first[1], vec![]);
        assert!(matches!(lookup.poll(now), LookupStep::Wait));
    }

    #[test]
    fn convergence_skips_failed_contacts() {
        let (mut lookup, now) = lookup(&[40, 50, 60], LookupMode::FindNode);

        let first = query(lookup.poll(now));
        assert_eq!(ids(&first), vec![40, 50, 60]);

        lookup.on_nodes(&first[0], vec![contact(5), contact(6)]);
        lookup.on_failure(first[1].id());
        lookup.on_failure(first[2].id());

        let second = query(lookup.poll(now));
        assert_eq!(ids(&second), vec![5, 6]);

        lookup.on_nodes(&second[0], vec![]);
        lookup.on_nodes(&second[1], vec![contact(40)]);

        let outcome = done(lookup.poll(now));
        assert_eq!(ids(&outcome.closest), vec![5, 6, 40]);
        assert!(!outcome.timed_out);
    }

    #[test]
    fn stalled_round_triggers_final_round() {
        let seeds: Vec<u8> = (1..=8).map(|b| b * 10).collect();
        let (mut lookup, now) = lookup(&seeds, LookupMode::FindNode);

        let first = query(lookup.poll(now));
        for contact in &first {
            lookup.on_nodes(contact, vec![]);
        }

        // Round two improves nothing over round one.
        let second = query(lookup.poll(now));
        assert_eq!(ids(&second), vec![40, 50, 60]);
        for contact in &second {
            lookup.on_nodes(contact, vec![]);
        }

        let last = query(lookup.poll(now));
        assert_eq!(ids(&last), vec![70, 80]);
        for contact in &last {
            lookup.on_nodes(contact, vec![]);
        }

        let outcome = done(lookup.poll(now));
        assert_eq!(ids(&outcome.closest), seeds);
    }

    #[test]
    fn terminates_with_every_reachable_contact() {
        let seeds: Vec<u8> = (1..=12).collect();
        let (mut lookup, now) = lookup(&seeds, LookupMode::FindNode);

        let everyone: Vec<Contact> = seeds.iter().map(|b| contact(*b)).collect();

        let mut rounds = 0;
        let outcome = loop {
            rounds += 1;
            assert!(rounds < 20, "lookup never terminated");

            match lookup.poll(now) {
                LookupStep::Query(contacts) => {
                    for contact in &contacts {
                        lookup.on_nodes(contact, everyone.clone());
                    }
                }
                LookupStep::Wait => unreachable!(),
                LookupStep::Done(outcome) => break outcome,
            }
        };

        assert_eq!(ids(&outcome.closest), seeds);
    }

    #[test]
    fn empty_shortlist() {
        let (mut lookup, now) = lookup(&[], LookupMode::FindNode);

        let outcome = done(lookup.poll(now));
        assert!(outcome.closest.is_empty());
    }

    #[test]
    fn every_contact_fails() {
        let (mut lookup, now) = lookup(&[1, 2, 3, 4], LookupMode::FindNode);

        let first = query(lookup.poll(now));
        for contact in &first {
            lookup.on_failure(contact.id());
        }

        // Nothing improved, the final round tries the remaining contact.
        let last = query(lookup.poll(now));
        assert_eq!(ids(&last), vec![4]);
        lookup.on_failure(last[0].id());

        let outcome = done(lookup.poll(now));
        assert!(outcome.closest.is_empty());
        assert!(outcome.value.is_none());
    }

    #[test]
    fn deadline_returns_best_so_far() {
        let (mut lookup, now) = lookup(&[1, 2, 3, 4], LookupMode::FindNode);

        let first = query(lookup.poll(now));
        lookup.on_nodes(&first[1], vec![]);

        let outcome = done(lookup.poll(now + Duration::from_secs(600)));
        assert!(outcome.timed_out);
        assert_eq!(ids(&outcome.closest), vec![2]);
    }

    #[test]
    fn stragglers_are_ignored() {
        let (mut lookup, now) = lookup(&[1, 2], LookupMode::FindNode);

        let first = query(lookup.poll(now));
        assert!(lookup.on_failure(first[0].id()));
        assert!(!lookup.on_nodes(&first[0], vec![contact(0x7f)]));
        assert!(!lookup.on_nodes(&contact(9), vec![]));

        assert!(lookup.responders().is_empty());
    }

    #[test]
    fn local_id_is_never_queried() {
        let (mut lookup, now) = lookup(&[0xff, 1], LookupMode::FindNode);

        let first = query(lookup.poll(now));
        assert_eq!(ids(&first), vec![1]);

        lookup.on_nodes(&first[0], vec![contact(0xff)]);

        let outcome = done(lookup.poll(now));
        assert_eq!(ids(&outcome.closest), vec![1]);
    }

    #[test]
    fn find_value_stops_on_hit() {
        let (mut lookup, now) = lookup(&[10, 20, 30, 40], LookupMode::FindValue);

        let first = query(lookup.poll(now));

        lookup.on_nodes(&first[0], vec![]);
        let item = ValueItem::new(id(0), b"value".to_vec(), Timestamp::from_millis(1));
        lookup.on_value(&first[1], item.clone());

        // No need to wait for the third request.
        let outcome = done(lookup.poll(now));
        assert_eq!(outcome.value, Some(item));
        assert_eq!(outcome.cache_candidate.map(|c| *c.id()), Some(id(10)));
    }

    #[test]
    fn find_value_miss() {
        let (mut lookup, now) = lookup(&[10], LookupMode::FindValue);

        let first = query(lookup.poll(now));
        lookup.on_nodes(&first[0], vec![]);

        let outcome = done(lookup.poll(now));
        assert!(outcome.value.is_none());
        assert!(outcome.cache_candidate.is_none());
    }
}
