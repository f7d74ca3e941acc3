use crate::Id;

use super::Actor;

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    routing_table_size: usize,
    buckets: usize,
    values: usize,
    active_lookups: usize,
    inflight_requests: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Number of contacts in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Number of k-buckets the routing table split into.
    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Number of values held locally, expired ones included until purged.
    pub fn values(&self) -> usize {
        self.values
    }

    pub fn active_lookups(&self) -> usize {
        self.active_lookups
    }

    /// Requests sent and waiting for a response.
    pub fn inflight_requests(&self) -> usize {
        self.inflight_requests
    }
}

impl From<&Actor> for Info {
    fn from(actor: &Actor) -> Self {
        Self {
            id: *actor.id(),
            routing_table_size: actor.routing_table().size(),
            buckets: actor.routing_table().buckets().len(),
            values: actor.values().len(),
            active_lookups: actor.active_lookups(),
            inflight_requests: actor.inflight_requests(),
        }
    }
}
