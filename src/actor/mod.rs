//! Actor implementation - I/O orchestration layer for the DHT.

pub(crate) mod config;
mod handle_request;
mod handle_response;
mod inflight_requests;
mod info;
pub(crate) mod transport;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use flume::{Sender, WeakSender};
use tracing::{debug, info, trace};

use crate::common::{deadline_after, Contact, Id, Request, RoutingTable, Timestamp, ValueItem};
use crate::constants::PROTOCOL_VERSION;
use crate::core::lookup::{Lookup, LookupMode, LookupOutcome, LookupStep};
use crate::core::maintenance::Maintenance;
use crate::core::server::{Server, ServerSettings};
use crate::core::store_query::{StoreQuery, StoreQueryError};
use crate::core::value_store::ValueStore;
use crate::dht::ActorMessage;
use crate::error::ErrorCode;
use crate::{Error, Result};

use config::Config;
use inflight_requests::{InflightRequest, InflightRequests, RpcPurpose};
use transport::{Responder, Transport};

pub use info::Info;

#[derive(Debug)]
/// Where to send the result of a lookup.
pub(crate) enum ResponseSender {
    ClosestContacts(Sender<Vec<Contact>>),
    Value(Sender<Result<ValueItem>>),
}

#[derive(Debug)]
struct ActiveLookup {
    lookup: Lookup,
    senders: Vec<ResponseSender>,
}

#[derive(Debug)]
struct ActiveStore {
    query: StoreQuery,
    senders: Vec<Sender<Result<Vec<Id>>>>,
    republish: bool,
}

#[derive(Debug)]
/// Internal Actor called in the Dht thread loop, useful to create your own actor setup.
pub struct Actor {
    // Options
    bootstrap: Vec<Contact>,
    alpha: usize,
    k: usize,
    lookup_timeout: Duration,
    rpc_timeout: Duration,
    duplication_count: usize,
    max_value_size: usize,

    transport: Box<dyn Transport>,
    /// Where [Responder]s report outcomes to.
    inbox: WeakSender<ActorMessage>,
    next_tid: u32,
    inflight: InflightRequests,

    routing_table: RoutingTable,
    values: ValueStore,
    server: Server,
    maintenance: Maintenance,

    // Active lookups, at most one per target and mode.
    lookups: HashMap<(Id, LookupMode), ActiveLookup>,
    /// Store queries wait for a FIND_NODE lookup on their key, then STORE at
    /// the closest responders.
    store_queries: HashMap<u64, ActiveStore>,
    next_store_query: u64,
    pings: HashMap<u32, Sender<Result<()>>>,
}

impl Actor {
    /// Creates a new Actor. Does not perform network I/O; call [`Actor::bootstrap`]
    /// to join the network and [`Actor::tick`] to drive requests and maintenance.
    pub(crate) fn new(
        config: Config,
        transport: Box<dyn Transport>,
        inbox: WeakSender<ActorMessage>,
    ) -> Result<Self> {
        config.validate()?;

        let id = config.id.unwrap_or_else(Id::random);

        let mut values = ValueStore::new(config.expiry);
        if let Some(persistence) = config.persistence {
            values = values
                .with_persistence(persistence)
                .map_err(|error| Error::Persistence(error.to_string()))?;
        }

        Ok(Actor {
            bootstrap: config.bootstrap,
            alpha: config.alpha,
            k: config.k,
            lookup_timeout: config.lookup_timeout,
            rpc_timeout: config.rpc_timeout,
            duplication_count: config.duplication_count,
            max_value_size: config.max_value_size,

            transport,
            inbox,
            next_tid: 0,
            inflight: InflightRequests::new(),

            routing_table: RoutingTable::with_params(
                id,
                config.k,
                config.allowed_rpc_fails,
                config.blacklist_size,
            ),
            values,
            server: Server::new(
                ServerSettings {
                    k: config.k,
                    max_value_size: config.max_value_size,
                    protocol_version: PROTOCOL_VERSION,
                },
                config.verifier,
            ),
            maintenance: Maintenance::new(
                config.refresh_interval,
                config.refresh_timeout,
                config.replicate_interval,
            ),

            lookups: HashMap::new(),
            store_queries: HashMap::new(),
            next_store_query: 0,
            pings: HashMap::new(),
        })
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.routing_table.id()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn active_lookups(&self) -> usize {
        self.lookups.len()
    }

    pub fn inflight_requests(&self) -> usize {
        self.inflight.len()
    }

    /// Returns a thread safe and lightweight summary of this node's
    /// information and statistics.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    /// The next time [Self::tick] has timed work to do: a request or lookup
    /// timing out, or the maintenance tick.
    pub fn next_deadline(&self) -> Instant {
        let mut deadline = self.maintenance.next_tick();

        if let Some(request_deadline) = self.inflight.next_deadline(self.rpc_timeout) {
            deadline = deadline.min(request_deadline);
        }

        for active in self.lookups.values() {
            deadline = deadline.min(active.lookup.deadline());
        }

        deadline
    }

    // === Public Methods ===

    /// Advances in-flight requests, lookups and maintenance by one step.
    ///
    /// Call after every handled message and whenever [Self::next_deadline] passes.
    pub fn tick(&mut self, now: Instant) {
        for request in self.inflight.expire(now, self.rpc_timeout) {
            trace!(
                tid = request.transaction_id,
                to = ?request.to.id(),
                "Request timed out"
            );

            self.handle_outcome(request, Err(crate::RpcError::Timeout), now);
        }

        self.periodic_maintenance(now);

        self.tick_lookups(now);
    }

    /// Join the network through `contacts` by looking up our own id.
    ///
    /// The contacts are remembered to re-seed an empty routing table later.
    pub fn bootstrap(&mut self, contacts: Vec<Contact>, sender: Option<Sender<Vec<Contact>>>) {
        for contact in contacts {
            if !self.bootstrap.contains(&contact) {
                self.bootstrap.push(contact);
            }
        }

        self.populate(sender, Instant::now());
    }

    /// Check that a contact is alive, adding it to the routing table if so.
    pub fn ping(&mut self, contact: Contact, sender: Sender<Result<()>>) {
        let tid = self.send(contact, Request::Ping, RpcPurpose::Ping, Instant::now());
        self.pings.insert(tid, sender);
    }

    /// Start, or join, a FIND_NODE lookup for the `k` closest contacts to `target`.
    pub fn find_node(&mut self, target: Id, sender: Option<Sender<Vec<Contact>>>) {
        self.lookup(
            target,
            LookupMode::FindNode,
            sender.map(ResponseSender::ClosestContacts),
            &[],
            Instant::now(),
        );
    }

    /// Get a value, locally if we hold it, otherwise through a FIND_VALUE lookup.
    pub fn get(&mut self, key: Id, sender: Sender<Result<ValueItem>>) {
        if let Ok(record) = self.values.retrieve(&key) {
            let _ = sender.send(Ok(record.to_item()));
            return;
        }

        self.lookup(
            key,
            LookupMode::FindValue,
            Some(ResponseSender::Value(sender)),
            &[],
            Instant::now(),
        );
    }

    /// Store a value locally, then at the `duplication_count` closest contacts to its key.
    pub fn put(&mut self, item: ValueItem, sender: Option<Sender<Result<Vec<Id>>>>) {
        if item.value.len() > self.max_value_size {
            if let Some(sender) = sender {
                let _ = sender.send(Err(Error::Malformed(format!(
                    "{} ({} > {} bytes)",
                    ErrorCode::RequestTooBig,
                    item.value.len(),
                    self.max_value_size
                ))));
            }
            return;
        }

        if let Err(error) = self
            .values
            .store(item.key, item.value.clone(), item.timestamp)
        {
            debug!(key = ?item.key, ?error, "Local store rejected put");

            if let Some(sender) = sender {
                let _ = sender.send(Err(error.into()));
            }
            return;
        }

        self.store(item, sender, false, Instant::now());
    }

    // === Private Methods ===

    fn populate(&mut self, sender: Option<Sender<Vec<Contact>>>, now: Instant) {
        let id = *self.id();
        let seeds = self.bootstrap.clone();

        self.lookup(
            id,
            LookupMode::FindNode,
            sender.map(ResponseSender::ClosestContacts),
            &seeds,
            now,
        );
    }

    fn lookup(
        &mut self,
        target: Id,
        mode: LookupMode,
        sender: Option<ResponseSender>,
        seeds: &[Contact],
        now: Instant,
    ) {
        // If the lookup is still active, no need to create a new one.
        if let Some(active) = self.lookups.get_mut(&(target, mode)) {
            for seed in seeds {
                active.lookup.add_candidate(seed.clone());
            }
            active.senders.extend(sender);

            return;
        }

        let mut initial = self.routing_table.closest_contacts(&target, self.k);
        initial.extend(seeds.iter().cloned());

        let lookup = Lookup::new(
            *self.id(),
            target,
            mode,
            initial,
            self.alpha,
            self.k,
            deadline_after(now, self.lookup_timeout),
        );

        self.lookups.insert(
            (target, mode),
            ActiveLookup {
                lookup,
                senders: sender.into_iter().collect(),
            },
        );
    }

    fn store(
        &mut self,
        item: ValueItem,
        sender: Option<Sender<Result<Vec<Id>>>>,
        republish: bool,
        now: Instant,
    ) {
        let key = item.key;
        let id = self.next_store_query;
        self.next_store_query += 1;

        self.store_queries.insert(
            id,
            ActiveStore {
                query: StoreQuery::new(item),
                senders: sender.into_iter().collect(),
                republish,
            },
        );

        self.lookup(key, LookupMode::FindNode, None, &[], now);
    }

    fn tick_lookups(&mut self, now: Instant) {
        let mut to_query = Vec::new();
        let mut done = Vec::new();

        for (key, active) in self.lookups.iter_mut() {
            match active.lookup.poll(now) {
                LookupStep::Query(contacts) => to_query.push((*key, contacts)),
                LookupStep::Wait => {}
                LookupStep::Done(outcome) => done.push((*key, outcome)),
            }
        }

        // All of a round's requests go out before any outcome is handled.
        for ((target, mode), contacts) in to_query {
            let request = match mode {
                LookupMode::FindNode => Request::FindNode { target },
                LookupMode::FindValue => Request::FindValue { key: target },
            };

            for contact in contacts {
                self.send(contact, request.clone(), RpcPurpose::Lookup(target, mode), now);
            }
        }

        for (key, outcome) in done {
            if let Some(active) = self.lookups.remove(&key) {
                self.finish_lookup(outcome, active.senders, now);
            }
        }
    }

    fn finish_lookup(
        &mut self,
        outcome: LookupOutcome,
        senders: Vec<ResponseSender>,
        now: Instant,
    ) {
        self.routing_table.touch_bucket(&outcome.target, now);

        match outcome.mode {
            LookupMode::FindNode => self.start_store_queries(&outcome, now),
            LookupMode::FindValue => {
                if let (Some(item), Some(contact)) = (&outcome.value, &outcome.cache_candidate) {
                    debug!(key = ?item.key, to = ?contact.id(), "Caching found value on the lookup path");

                    self.send(
                        contact.clone(),
                        Request::Store(item.clone().into()),
                        RpcPurpose::CacheStore,
                        now,
                    );
                }
            }
        }

        for sender in senders {
            match sender {
                ResponseSender::ClosestContacts(sender) => {
                    let _ = sender.send(outcome.closest.clone());
                }
                ResponseSender::Value(sender) => {
                    let _ = sender.send(outcome.value.clone().ok_or(Error::NotFound));
                }
            }
        }
    }

    /// Start the store queries waiting for a FIND_NODE lookup on this target.
    fn start_store_queries(&mut self, outcome: &LookupOutcome, now: Instant) {
        let waiting: Vec<u64> = self
            .store_queries
            .iter()
            .filter(|(_, active)| !active.query.started() && active.query.key() == outcome.target)
            .map(|(id, _)| *id)
            .collect();

        for id in waiting {
            let Some(active) = self.store_queries.get_mut(&id) else {
                continue;
            };

            match active.query.start(&outcome.closest, self.duplication_count) {
                Ok(requests) => {
                    for (contact, request) in requests {
                        let purpose = RpcPurpose::Store(id);
                        self.send(contact, Request::Store(request), purpose, now);
                    }
                }
                Err(error) => self.finish_store_query(id, Err(error), now),
            }
        }
    }

    fn finish_store_query(
        &mut self,
        id: u64,
        result: Result<Vec<Id>, StoreQueryError>,
        now: Instant,
    ) {
        let Some(active) = self.store_queries.remove(&id) else {
            return;
        };

        let key = active.query.key();

        if active.republish {
            match &result {
                Ok(stored_at) => {
                    debug!(?key, stored_at = stored_at.len(), "Republished value");
                    self.values.mark_republished(&key, now);
                }
                // Contacts already holding the value answer that it is superseded.
                Err(StoreQueryError::ErrorResponse(error))
                    if error.code == ErrorCode::SupersededValue =>
                {
                    debug!(?key, "Republished value, already held by the closest contacts");
                    self.values.mark_republished(&key, now);
                }
                Err(error) => {
                    debug!(?key, ?error, "Republish failed, retrying on the next maintenance tick");
                }
            }
        }

        let result: Result<Vec<Id>> = result.map_err(Error::from);

        for sender in active.senders {
            let _ = sender.send(result.clone());
        }
    }

    fn periodic_maintenance(&mut self, now: Instant) {
        let decisions = self.maintenance.decisions_at(
            now,
            &self.routing_table,
            &self.values,
            !self.bootstrap.is_empty(),
        );

        if decisions.should_purge {
            let purged = self.values.purge_expired(Timestamp::now());

            if !purged.is_empty() {
                debug!(count = purged.len(), "Purged expired values");
            }
        }

        if decisions.should_reseed {
            info!("Routing table is empty, re-seeding from bootstrap contacts");
            self.populate(None, now);
        }

        for target in decisions.refresh_targets {
            debug!(?target, "Refreshing stale bucket");
            self.lookup(target, LookupMode::FindNode, None, &[], now);
        }

        for key in decisions.republish {
            if self
                .store_queries
                .values()
                .any(|active| active.query.key() == key)
            {
                continue;
            }

            if let Ok(record) = self.values.retrieve(&key) {
                let item = record.to_item();
                self.store(item, None, true, now);
            }
        }
    }

    /// Send a request through the transport and return its transaction_id.
    fn send(&mut self, to: Contact, request: Request, purpose: RpcPurpose, now: Instant) -> u32 {
        let transaction_id = self.tid();

        trace!(
            tid = transaction_id,
            to = ?to.id(),
            address = %to.address(),
            request = request.name(),
            "Sending request"
        );

        self.inflight.add(InflightRequest {
            transaction_id,
            to: to.clone(),
            sent_at: now,
            purpose,
        });

        let responder = Responder::new(transaction_id, self.inbox.clone());
        self.transport.send(&to, request, responder);

        transaction_id
    }

    fn tid(&mut self) -> u32 {
        loop {
            let tid = self.next_tid;
            self.next_tid = self.next_tid.wrapping_add(1);

            if !self.inflight.contains(tid) {
                return tid;
            }
        }
    }
}
