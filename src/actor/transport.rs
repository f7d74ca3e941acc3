//! Boundary between the node and whatever carries its messages.

use std::fmt::{self, Debug, Formatter};

use flume::WeakSender;
use tracing::trace;

use crate::common::{Contact, Request, Response};
use crate::dht::ActorMessage;
use crate::error::RpcError;

/// Delivers requests to other nodes.
///
/// Framing, encoding and signing are the transport's business. For every
/// [Transport::send] the transport reports the response (or the failure) of
/// the remote node through the given [Responder]. Dropping the responder
/// without responding is allowed, the node then times the request out.
///
/// Incoming requests are handed to [crate::Dht::handle_request] and its
/// result sent back to the requester.
pub trait Transport: Send + Debug {
    /// Send `request` to `to` without blocking.
    fn send(&mut self, to: &Contact, request: Request, responder: Responder);
}

/// One shot handle to report the outcome of a request sent by a [Transport].
pub struct Responder {
    transaction_id: u32,
    inbox: WeakSender<ActorMessage>,
}

impl Responder {
    pub(crate) fn new(transaction_id: u32, inbox: WeakSender<ActorMessage>) -> Self {
        Self {
            transaction_id,
            inbox,
        }
    }

    /// Identifies the request, unique among the node's outstanding requests.
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    /// Report the remote node's response, or why there is none.
    ///
    /// Outcomes arriving after the node's RPC timeout are ignored.
    pub fn respond(self, outcome: Result<Response, RpcError>) {
        let Some(inbox) = self.inbox.upgrade() else {
            trace!(tid = self.transaction_id, "Dropping outcome, the node was shutdown");
            return;
        };

        let _ = inbox.send(ActorMessage::RpcOutcome(self.transaction_id, outcome));
    }
}

impl Debug for Responder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}
