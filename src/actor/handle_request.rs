use tracing::{debug, trace};

use crate::common::{Contact, Request, Response};
use crate::error::ProtocolError;

use super::Actor;

impl Actor {
    /// Handle an inbound request: forward to the server, which checks its
    /// version and provenance, adds the requester to the routing table and
    /// answers from the routing table and the value store.
    pub fn handle_request(
        &mut self,
        from: Contact,
        request: Request,
    ) -> Result<Response, ProtocolError> {
        trace!(
            from = ?from.id(),
            address = %from.address(),
            request = request.name(),
            "Handling request"
        );

        let from_id = *from.id();
        let result =
            self.server
                .handle_request(&mut self.routing_table, &mut self.values, from, request);

        if let Err(error) = &result {
            debug!(from = ?from_id, %error, "Responding with an error");
        }

        result
    }
}
