use std::time::Instant;

use tracing::{debug, trace};

use crate::common::{Contact, Id, Response};
use crate::core::lookup::LookupMode;
use crate::error::{ErrorCode, RpcError};
use crate::Error;

use super::inflight_requests::{InflightRequest, RpcPurpose};
use super::Actor;

/// What an outcome says about the contact that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Standing {
    /// Answered, even if with an error.
    Responsive,
    /// Timed out, unreachable or unparseable.
    Unresponsive,
    /// Answered with something provably wrong.
    Misbehaving,
}

impl Standing {
    fn of(outcome: &Result<Response, RpcError>) -> Self {
        match outcome {
            Ok(_) | Err(RpcError::Peer(_)) => Standing::Responsive,
            Err(_) => Standing::Unresponsive,
        }
    }
}

impl Actor {
    /// Handle the outcome of a request we sent, as reported by a
    /// [super::transport::Responder].
    ///
    /// Outcomes for unknown or already timed out transactions are ignored.
    pub fn handle_response(&mut self, transaction_id: u32, outcome: Result<Response, RpcError>) {
        let Some(request) = self.inflight.remove(transaction_id) else {
            trace!(
                tid = transaction_id,
                "Ignoring outcome of an unknown or timed out request"
            );
            return;
        };

        self.handle_outcome(request, outcome, Instant::now());
    }

    /// Route an outcome to whatever sent the request, then update the
    /// routing table with what it says about the contact.
    pub(super) fn handle_outcome(
        &mut self,
        request: InflightRequest,
        outcome: Result<Response, RpcError>,
        now: Instant,
    ) {
        let InflightRequest {
            transaction_id,
            to,
            purpose,
            ..
        } = request;

        let standing = match purpose {
            RpcPurpose::Lookup(target, mode) => self.lookup_outcome(target, mode, &to, outcome),
            RpcPurpose::Store(query) => self.store_outcome(query, &to, outcome, now),
            RpcPurpose::CacheStore => {
                if let Err(error) = &outcome {
                    trace!(to = ?to.id(), ?error, "Caching value failed");
                }

                Standing::of(&outcome)
            }
            RpcPurpose::Ping => {
                let standing = Standing::of(&outcome);

                if let Some(sender) = self.pings.remove(&transaction_id) {
                    let result = match outcome {
                        Ok(Response::Pong) => Ok(()),
                        Ok(_) => Err(Error::Malformed("unexpected response to ping".to_string())),
                        Err(error) => Err(error.into()),
                    };

                    let _ = sender.send(result);
                }

                standing
            }
        };

        self.update_standing(&to, standing);
    }

    fn lookup_outcome(
        &mut self,
        target: Id,
        mode: LookupMode,
        from: &Contact,
        outcome: Result<Response, RpcError>,
    ) -> Standing {
        let standing = Standing::of(&outcome);

        let Some(active) = self.lookups.get_mut(&(target, mode)) else {
            return standing;
        };

        match outcome {
            Ok(Response::Nodes(contacts)) => {
                let own_id = *self.routing_table.id();
                let contacts = contacts
                    .into_iter()
                    .filter(|contact| {
                        contact.id() != &own_id && !self.routing_table.is_blacklisted(contact.id())
                    })
                    .collect();

                active.lookup.on_nodes(from, contacts);
            }
            Ok(Response::Value(item)) if mode == LookupMode::FindValue => {
                let verified = if item.key != target {
                    Err(ErrorCode::KeyMismatch)
                } else {
                    self.server.verifier().verify_value(&item)
                };

                match verified {
                    Ok(()) => {
                        active.lookup.on_value(from, item);
                    }
                    Err(code) => {
                        debug!(from = ?from.id(), key = ?item.key, %code, "Rejecting found value");
                        active.lookup.on_failure(from.id());

                        return Standing::Misbehaving;
                    }
                }
            }
            Ok(response) => {
                debug!(from = ?from.id(), ?response, "Unexpected response to a lookup");
                active.lookup.on_failure(from.id());
            }
            Err(error) => {
                trace!(from = ?from.id(), %error, "Lookup request failed");
                active.lookup.on_failure(from.id());
            }
        }

        standing
    }

    fn store_outcome(
        &mut self,
        query: u64,
        from: &Contact,
        outcome: Result<Response, RpcError>,
        now: Instant,
    ) -> Standing {
        let standing = Standing::of(&outcome);

        let Some(active) = self.store_queries.get_mut(&query) else {
            return standing;
        };

        match outcome {
            Ok(Response::Stored) => active.query.success(from.id()),
            Ok(_) => active.query.error(
                from.id(),
                RpcError::Malformed("unexpected response to store".to_string()),
            ),
            Err(error) => active.query.error(from.id(), error),
        }

        if let Some(result) = active.query.result() {
            self.finish_store_query(query, result, now);
        }

        standing
    }

    fn update_standing(&mut self, contact: &Contact, standing: Standing) {
        match standing {
            Standing::Responsive => {
                if self.routing_table.contains(contact.id()) {
                    self.routing_table.record_success(contact.id());
                } else {
                    // Start from a clean failure count.
                    let fresh = Contact::new(*contact.id(), contact.address())
                        .with_version(contact.version());
                    self.routing_table.add_contact(fresh);
                }
            }
            Standing::Unresponsive => {
                if let Some(evicted) = self.routing_table.record_failure(contact.id()) {
                    debug!(id = ?evicted.id(), "Evicted unresponsive contact");
                }
            }
            Standing::Misbehaving => self.routing_table.blacklist(contact.id()),
        }
    }
}
