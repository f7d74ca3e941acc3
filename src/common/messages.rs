//! Requests and responses exchanged between nodes.
//!
//! Framing, encoding and signing are left to the [crate::Transport], these are
//! the decoded forms the core works with.

use bytes::Bytes;

use crate::common::{Contact, Id, Timestamp};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    FindNode { target: Id },
    FindValue { key: Id },
    Store(StoreRequest),
}

impl Request {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::FindNode { .. } => "find_node",
            Request::FindValue { .. } => "find_value",
            Request::Store(_) => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    pub key: Id,
    pub value: Bytes,
    /// Creation time of the value, used to decide which of two writes wins.
    pub timestamp: Timestamp,
}

impl From<ValueItem> for StoreRequest {
    fn from(item: ValueItem) -> Self {
        Self {
            key: item.key,
            value: item.value,
            timestamp: item.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    /// Closest contacts the responder knows of.
    Nodes(Vec<Contact>),
    /// The responder holds the requested value.
    Value(ValueItem),
    Stored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A value as exchanged on the wire and held by the value store.
pub struct ValueItem {
    pub key: Id,
    pub value: Bytes,
    pub timestamp: Timestamp,
}

impl ValueItem {
    pub fn new(key: Id, value: impl Into<Bytes>, timestamp: Timestamp) -> Self {
        Self {
            key,
            value: value.into(),
            timestamp,
        }
    }
}

impl From<StoreRequest> for ValueItem {
    fn from(request: StoreRequest) -> Self {
        Self {
            key: request.key,
            value: request.value,
            timestamp: request.timestamp,
        }
    }
}
