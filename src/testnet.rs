//! In-memory network of Dht nodes, for tests and local experiments.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, PoisonError, RwLock,
    },
    thread,
};

use tracing::trace;

use crate::{
    actor::transport::{Responder, Transport},
    common::{Contact, Id, Request},
    dht::{Dht, DhtBuilder},
    error::RpcError,
    Result,
};

#[derive(Debug, Clone, Default)]
/// Delivers requests between the nodes it spawned, without sockets.
///
/// Every delivered request runs on its own thread, so a node waiting on
/// another never blocks its own actor.
pub struct MemoryNetwork {
    nodes: Arc<RwLock<HashMap<SocketAddr, Dht>>>,
    next_port: Arc<AtomicU16>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node from `builder` and attach it at a fresh address.
    ///
    /// Returns the node and the contact other nodes can reach it at.
    pub fn spawn(&self, mut builder: DhtBuilder) -> Result<(Dht, Contact)> {
        let id = *builder.config_mut().id.get_or_insert_with(Id::random);
        let contact = Contact::new(id, self.next_address());

        let dht = builder.build(self.transport_for(contact.clone()))?;

        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(contact.address(), dht.clone());

        Ok((dht, contact))
    }

    /// A transport for a node that other nodes can't reach, it only sends
    /// requests. Its requests arrive from an unreachable address.
    pub fn transport(&self) -> MemoryTransport {
        self.transport_for(Contact::new(Id::random(), self.next_address()))
    }

    /// Detach the node at `address`, requests to it fail as unreachable.
    ///
    /// The node itself keeps running until shut down.
    pub fn disconnect(&self, address: &SocketAddr) -> Option<Dht> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address)
    }

    /// Shutdown every attached node.
    pub fn shutdown(&self) {
        let nodes: Vec<Dht> = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, dht)| dht)
            .collect();

        for dht in nodes {
            dht.shutdown();
        }
    }

    fn node(&self, address: &SocketAddr) -> Option<Dht> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    fn next_address(&self) -> SocketAddr {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn transport_for(&self, local: Contact) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local,
        }
    }
}

#[derive(Debug)]
/// [Transport] of a node attached to a [MemoryNetwork].
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: Contact,
}

impl Transport for MemoryTransport {
    fn send(&mut self, to: &Contact, request: Request, responder: Responder) {
        let target = self.network.node(&to.address());
        let from = self.local.clone();
        let address = to.address();

        thread::spawn(move || {
            let outcome = match target {
                Some(dht) => dht.handle_request(from, request).map_err(RpcError::Peer),
                None => {
                    trace!(%address, "No node attached at address");
                    Err(RpcError::Unreachable(address.to_string()))
                }
            };

            responder.respond(outcome);
        });
    }
}

#[derive(Debug)]
/// Create a testnet of Dht nodes to run tests against instead of a real network.
pub struct Testnet {
    /// Contacts of the first nodes, to bootstrap other nodes with.
    pub bootstrap: Vec<Contact>,
    pub nodes: Vec<Dht>,
    pub network: MemoryNetwork,
}

impl Testnet {
    /// Spawn `count` nodes, each bootstrapping from the first one.
    pub fn new(count: usize) -> Result<Testnet> {
        Self::with_builder(count, Dht::builder)
    }

    /// Same as [Testnet::new], with every node configured by `builder`.
    pub fn with_builder(count: usize, builder: impl Fn() -> DhtBuilder) -> Result<Testnet> {
        let network = MemoryNetwork::new();
        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            if i == 0 {
                let (node, contact) = network.spawn(builder())?;

                bootstrap.push(contact);
                nodes.push(node)
            } else {
                let (node, _) = network.spawn(builder().bootstrap(&bootstrap))?;

                node.bootstrapped()?;
                nodes.push(node)
            }
        }

        Ok(Self {
            bootstrap,
            nodes,
            network,
        })
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        self.network.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nodes_know_each_other() {
        let testnet = Testnet::new(4).unwrap();

        let info = testnet.nodes[0].info().unwrap();
        assert_eq!(info.routing_table_size(), 3);

        for node in &testnet.nodes[1..] {
            assert!(node.info().unwrap().routing_table_size() >= 1);
        }
    }

    #[test]
    fn disconnected_nodes_are_unreachable() {
        let testnet = Testnet::new(2).unwrap();
        let first = testnet.bootstrap[0].clone();

        let detached = testnet.network.disconnect(&first.address()).unwrap();

        assert!(testnet.nodes[1].ping(first).is_err());

        detached.shutdown();
    }
}
