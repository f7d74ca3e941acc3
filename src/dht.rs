//! Dht node.

use std::{thread, time::Duration, time::Instant};

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

use crate::{
    actor::{config::Config, transport::Transport, Actor, Info},
    common::{Contact, Id, Request, Response, Timestamp, ValueItem},
    core::{server::Verifier, value_store::Persistence},
    error::{ErrorCode, ProtocolError, RpcError},
    Error, Result,
};

#[derive(Debug, Clone)]
/// Drogulus Dht node.
///
/// A cheap to clone handle to the actor thread owning the node's state.
pub struct Dht(pub(crate) Sender<ActorMessage>);

#[derive(Debug, Default)]
/// A builder for the [Dht] node.
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Set this node's id, instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.0.id = Some(id);

        self
    }

    /// Set bootstrapping contacts.
    pub fn bootstrap(mut self, bootstrap: &[Contact]) -> Self {
        self.0.bootstrap = bootstrap.to_vec();

        self
    }

    /// Add more bootstrap contacts to the default list.
    pub fn extra_bootstrap(mut self, extra_bootstrap: &[Contact]) -> Self {
        for contact in extra_bootstrap {
            if !self.0.bootstrap.contains(contact) {
                self.0.bootstrap.push(contact.clone());
            }
        }

        self
    }

    /// See [Config::alpha]
    pub fn alpha(mut self, alpha: usize) -> Self {
        self.0.alpha = alpha;

        self
    }

    /// See [Config::k]
    pub fn k(mut self, k: usize) -> Self {
        self.0.k = k;

        self
    }

    /// See [Config::lookup_timeout]
    pub fn lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.0.lookup_timeout = lookup_timeout;

        self
    }

    /// See [Config::rpc_timeout]
    pub fn rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.0.rpc_timeout = rpc_timeout;

        self
    }

    /// See [Config::refresh_timeout]
    pub fn refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.0.refresh_timeout = refresh_timeout;

        self
    }

    /// See [Config::refresh_interval]
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.0.refresh_interval = refresh_interval;

        self
    }

    /// See [Config::replicate_interval]
    pub fn replicate_interval(mut self, replicate_interval: Duration) -> Self {
        self.0.replicate_interval = replicate_interval;

        self
    }

    /// See [Config::allowed_rpc_fails]
    pub fn allowed_rpc_fails(mut self, allowed_rpc_fails: u32) -> Self {
        self.0.allowed_rpc_fails = allowed_rpc_fails;

        self
    }

    /// See [Config::duplication_count]
    pub fn duplication_count(mut self, duplication_count: usize) -> Self {
        self.0.duplication_count = duplication_count;

        self
    }

    /// See [Config::expiry]
    pub fn expiry(mut self, expiry: Option<Duration>) -> Self {
        self.0.expiry = expiry;

        self
    }

    /// See [Config::max_value_size]
    pub fn max_value_size(mut self, max_value_size: usize) -> Self {
        self.0.max_value_size = max_value_size;

        self
    }

    /// See [Config::blacklist_size]
    pub fn blacklist_size(mut self, blacklist_size: usize) -> Self {
        self.0.blacklist_size = blacklist_size;

        self
    }

    /// Provenance checks for incoming requests and found values.
    pub fn verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.0.verifier = Box::new(verifier);

        self
    }

    /// Mirror stored values to a durable backend, loading them on build.
    pub fn persistence(mut self, persistence: impl Persistence + 'static) -> Self {
        self.0.persistence = Some(Box::new(persistence));

        self
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.0
    }

    /// Create a Dht node sending its requests through `transport`.
    pub fn build(self, transport: impl Transport + 'static) -> Result<Dht> {
        Dht::new(self.0, transport)
    }
}

impl Dht {
    /// Create a new Dht node.
    ///
    /// Fails if the config is invalid, persisted values can't be loaded, or
    /// the actor thread can't be spawned.
    pub fn new(config: Config, transport: impl Transport + 'static) -> Result<Self> {
        let (sender, receiver) = flume::unbounded();

        let has_bootstrap = !config.bootstrap.is_empty();
        let mut actor = Actor::new(config, Box::new(transport), sender.downgrade())?;

        if has_bootstrap {
            actor.bootstrap(Vec::new(), None);
        }

        thread::Builder::new()
            .name("Drogulus Dht actor thread".to_string())
            .spawn(move || run(actor, receiver))?;

        Ok(Dht(sender))
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv().map_err(|_| Error::Shutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop, and wait for it to stop.
    ///
    /// Pending operations of every handle resolve with [Error::Shutdown].
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Join the network through `contacts`, by looking up this node's own id.
    ///
    /// Returns the closest contacts found, empty if none responded.
    pub fn bootstrap(&self, contacts: &[Contact]) -> Result<Vec<Contact>> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.send(ActorMessage::Bootstrap(contacts.to_vec(), sender))?;

        receiver.recv().map_err(|_| Error::Shutdown)
    }

    /// Wait until the bootstraping lookup is done.
    ///
    /// Returns true if the bootstraping was successful.
    pub fn bootstrapped(&self) -> Result<bool> {
        let contacts = self.bootstrap(&[])?;

        Ok(!contacts.is_empty())
    }

    /// Check that a contact is alive. Responsive contacts join the routing table.
    pub fn ping(&self, contact: Contact) -> Result<()> {
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::Ping(contact, sender))?;

        receiver.recv().map_err(|_| Error::Shutdown)?
    }

    // === Find nodes ===

    /// Returns up to `k` contacts closest to `target`, closest first.
    pub fn find_node(&self, target: Id) -> Result<Vec<Contact>> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.send(ActorMessage::FindNode(target, sender))?;

        receiver.recv().map_err(|_| Error::Shutdown)
    }

    // === Values ===

    /// Get the value stored under `key`, from the local store if held there.
    ///
    /// Fails with [Error::NotFound] if no contact has it.
    pub fn get(&self, key: Id) -> Result<ValueItem> {
        let (sender, receiver) = flume::bounded::<Result<ValueItem>>(1);

        self.send(ActorMessage::Get(key, sender))?;

        receiver.recv().map_err(|_| Error::Shutdown)?
    }

    /// Store a value, timestamped now, under `key`.
    ///
    /// Returns the ids of the contacts that acknowledged the store.
    pub fn put(&self, key: Id, value: impl Into<Bytes>) -> Result<Vec<Id>> {
        self.put_item(ValueItem::new(key, value, Timestamp::now()))
    }

    /// Store a value with an explicit timestamp.
    ///
    /// Fails with [Error::Superseded] if this node, or every contact it was
    /// sent to, already holds a value at least as recent.
    pub fn put_item(&self, item: ValueItem) -> Result<Vec<Id>> {
        let (sender, receiver) = flume::bounded::<Result<Vec<Id>>>(1);

        self.send(ActorMessage::Put(item, sender))?;

        receiver.recv().map_err(|_| Error::Shutdown)?
    }

    // === Incoming requests ===

    /// Answer a request received from another node by the [Transport].
    pub fn handle_request(
        &self,
        from: Contact,
        request: Request,
    ) -> std::result::Result<Response, ProtocolError> {
        let (sender, receiver) = flume::bounded(1);

        if self
            .0
            .send(ActorMessage::Request(from, request, sender))
            .is_err()
        {
            return Err(ErrorCode::InternalError.into());
        }

        receiver
            .recv()
            .unwrap_or_else(|_| Err(ErrorCode::InternalError.into()))
    }

    // === Private Methods ===

    fn send(&self, message: ActorMessage) -> Result<()> {
        self.0.send(message).map_err(|_| Error::Shutdown)
    }
}

fn run(mut actor: Actor, receiver: Receiver<ActorMessage>) {
    info!(id = ?actor.id(), "Dht node started");

    loop {
        let timeout = actor
            .next_deadline()
            .saturating_duration_since(Instant::now());

        match receiver.recv_timeout(timeout) {
            Ok(ActorMessage::Shutdown(sender)) => {
                drop(receiver);
                let _ = sender.send(());
                break;
            }
            Ok(message) => handle_message(&mut actor, message),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        actor.tick(Instant::now());
    }

    debug!(id = ?actor.id(), "Dht node stopped");
}

fn handle_message(actor: &mut Actor, message: ActorMessage) {
    match message {
        ActorMessage::Info(sender) => {
            let _ = sender.send(actor.info());
        }
        ActorMessage::Bootstrap(contacts, sender) => actor.bootstrap(contacts, Some(sender)),
        ActorMessage::Ping(contact, sender) => actor.ping(contact, sender),
        ActorMessage::FindNode(target, sender) => actor.find_node(target, Some(sender)),
        ActorMessage::Get(key, sender) => actor.get(key, sender),
        ActorMessage::Put(item, sender) => actor.put(item, Some(sender)),
        ActorMessage::Request(from, request, sender) => {
            let _ = sender.send(actor.handle_request(from, request));
        }
        ActorMessage::RpcOutcome(transaction_id, outcome) => {
            actor.handle_response(transaction_id, outcome)
        }
        // Handled by the run loop.
        ActorMessage::Shutdown(_) => {}
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    Bootstrap(Vec<Contact>, Sender<Vec<Contact>>),
    Ping(Contact, Sender<Result<()>>),
    FindNode(Id, Sender<Vec<Contact>>),
    Get(Id, Sender<Result<ValueItem>>),
    Put(ValueItem, Sender<Result<Vec<Id>>>),
    Request(
        Contact,
        Request,
        Sender<std::result::Result<Response, ProtocolError>>,
    ),
    RpcOutcome(u32, std::result::Result<Response, RpcError>),
    Shutdown(Sender<()>),
}
