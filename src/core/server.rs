//! Answers requests coming from other nodes.

use std::fmt::Debug;

use tracing::debug;

use crate::common::{Contact, Request, Response, RoutingTable, StoreRequest, ValueItem};
use crate::core::value_store::{StoreError, ValueStore};
use crate::error::{ErrorCode, ProtocolError};

/// Checks the provenance of incoming messages and values.
///
/// Rejections are answered (or treated) as the returned [ErrorCode], usually
/// [ErrorCode::UnverifiableProvenance] or [ErrorCode::KeyMismatch].
pub trait Verifier: Send + Debug {
    /// Verify a request before the node acts on it.
    fn verify_request(&self, _from: &Contact, _request: &Request) -> Result<(), ErrorCode> {
        Ok(())
    }

    /// Verify a value returned by a FIND_VALUE request.
    fn verify_value(&self, _item: &ValueItem) -> Result<(), ErrorCode> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// A [Verifier] accepting everything, for transports that already verify
/// signatures themselves.
pub struct AcceptAll;

impl Verifier for AcceptAll {}

#[derive(Debug, Clone)]
/// Settings for the request handler.
pub struct ServerSettings {
    /// Number of contacts returned for FIND_NODE and FIND_VALUE misses.
    pub k: usize,
    /// STORE requests with larger values are rejected.
    pub max_value_size: usize,
    /// Requests announcing another version are rejected.
    pub protocol_version: u8,
}

#[derive(Debug)]
/// Handles incoming requests against the node's routing table and values.
pub struct Server {
    settings: ServerSettings,
    verifier: Box<dyn Verifier>,
}

impl Server {
    pub fn new(settings: ServerSettings, verifier: Box<dyn Verifier>) -> Self {
        Self { settings, verifier }
    }

    pub fn verifier(&self) -> &dyn Verifier {
        self.verifier.as_ref()
    }

    /// Answer a request from `from`.
    ///
    /// Version and provenance are checked before any state is touched, then
    /// the sender is added to the routing table as a live contact.
    pub fn handle_request(
        &self,
        routing_table: &mut RoutingTable,
        values: &mut ValueStore,
        from: Contact,
        request: Request,
    ) -> Result<Response, ProtocolError> {
        if from.version() != self.settings.protocol_version {
            debug!(
                from = ?from.id(),
                version = from.version(),
                "Rejecting request with unsupported protocol version"
            );

            return Err(ErrorCode::UnsupportedProtocol.into());
        }

        if let Err(code) = self.verifier.verify_request(&from, &request) {
            debug!(from = ?from.id(), request = request.name(), ?code, "Rejecting unverified request");

            return Err(code.into());
        }

        let requester = *from.id();
        routing_table.add_contact(from);

        match request {
            Request::Ping => Ok(Response::Pong),
            Request::FindNode { target } => Ok(Response::Nodes(
                routing_table.closest_contacts_excluding(&target, self.settings.k, &requester),
            )),
            Request::FindValue { key } => match values.retrieve(&key) {
                Ok(record) => Ok(Response::Value(record.to_item())),
                Err(_) => Ok(Response::Nodes(routing_table.closest_contacts_excluding(
                    &key,
                    self.settings.k,
                    &requester,
                ))),
            },
            Request::Store(StoreRequest {
                key,
                value,
                timestamp,
            }) => {
                if value.len() > self.settings.max_value_size {
                    debug!(?key, size = value.len(), "Rejecting oversized STORE");

                    return Err(ErrorCode::RequestTooBig.into());
                }

                match values.store(key, value, timestamp) {
                    Ok(()) => Ok(Response::Stored),
                    Err(StoreError::Superseded { .. }) => Err(ErrorCode::SupersededValue.into()),
                    Err(StoreError::NotFound) => Err(ErrorCode::InternalError.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::common::{Id, Timestamp};
    use crate::constants::{K, MAX_VALUE_SIZE, PROTOCOL_VERSION};

    use super::*;

    fn server() -> Server {
        Server::new(
            ServerSettings {
                k: K,
                max_value_size: MAX_VALUE_SIZE,
                protocol_version: PROTOCOL_VERSION,
            },
            Box::new(AcceptAll),
        )
    }

    fn state() -> (RoutingTable, ValueStore) {
        (RoutingTable::new(Id::random()), ValueStore::new(None))
    }

    #[test]
    fn ping_adds_sender() {
        let (mut table, mut values) = state();
        let from = Contact::random();

        let response = server().handle_request(&mut table, &mut values, from.clone(), Request::Ping);

        assert_eq!(response, Ok(Response::Pong));
        assert!(table.contains(from.id()));
    }

    #[test]
    fn unsupported_version() {
        let (mut table, mut values) = state();
        let from = Contact::random().with_version(PROTOCOL_VERSION + 1);

        let response = server().handle_request(&mut table, &mut values, from.clone(), Request::Ping);

        assert_eq!(response, Err(ErrorCode::UnsupportedProtocol.into()));
        assert!(!table.contains(from.id()));
    }

    #[test]
    fn rejected_provenance_touches_nothing() {
        #[derive(Debug)]
        struct RejectAll;

        impl Verifier for RejectAll {
            fn verify_request(&self, _: &Contact, _: &Request) -> Result<(), ErrorCode> {
                Err(ErrorCode::UnverifiableProvenance)
            }
        }

        let server = Server::new(server().settings, Box::new(RejectAll));
        let (mut table, mut values) = state();
        let from = Contact::random();
        let key = Id::random();

        let response = server.handle_request(
            &mut table,
            &mut values,
            from.clone(),
            Request::Store(StoreRequest {
                key,
                value: Bytes::from_static(b"v"),
                timestamp: Timestamp::now(),
            }),
        );

        assert_eq!(response, Err(ErrorCode::UnverifiableProvenance.into()));
        assert!(!table.contains(from.id()));
        assert!(values.is_empty());
    }

    #[test]
    fn find_node_excludes_requester() {
        let (mut table, mut values) = state();
        let from = Contact::random();

        for _ in 0..5 {
            table.add_contact(Contact::random());
        }

        let response = server().handle_request(
            &mut table,
            &mut values,
            from.clone(),
            Request::FindNode { target: *from.id() },
        );

        let Ok(Response::Nodes(contacts)) = response else {
            panic!("expected nodes");
        };

        assert_eq!(contacts.len(), 5);
        assert!(contacts.iter().all(|c| c.id() != from.id()));
    }

    #[test]
    fn find_value_hit_and_miss() {
        let (mut table, mut values) = state();
        let key = Id::random();
        let item = ValueItem::new(key, b"v".to_vec(), Timestamp::now());

        values.store(key, item.value.clone(), item.timestamp).unwrap();

        let hit = server().handle_request(
            &mut table,
            &mut values,
            Contact::random(),
            Request::FindValue { key },
        );
        assert_eq!(hit, Ok(Response::Value(item)));

        let miss = server().handle_request(
            &mut table,
            &mut values,
            Contact::random(),
            Request::FindValue { key: Id::random() },
        );
        assert!(matches!(miss, Ok(Response::Nodes(_))));
    }

    #[test]
    fn store_rules() {
        let (mut table, mut values) = state();
        let server = Server::new(
            ServerSettings {
                max_value_size: 4,
                ..server().settings
            },
            Box::new(AcceptAll),
        );
        let key = Id::random();

        let store = |value: &'static [u8], millis: u64| {
            Request::Store(StoreRequest {
                key,
                value: Bytes::from_static(value),
                timestamp: Timestamp::from_millis(millis),
            })
        };

        assert_eq!(
            server.handle_request(&mut table, &mut values, Contact::random(), store(&b"12345"[..], 1)),
            Err(ErrorCode::RequestTooBig.into())
        );
        assert_eq!(
            server.handle_request(&mut table, &mut values, Contact::random(), store(&b"v1"[..], 2)),
            Ok(Response::Stored)
        );
        assert_eq!(
            server.handle_request(&mut table, &mut values, Contact::random(), store(&b"v0"[..], 2)),
            Err(ErrorCode::SupersededValue.into())
        );
        assert_eq!(
            values.retrieve(&key).unwrap().value,
            Bytes::from_static(b"v1")
        );
    }
}
