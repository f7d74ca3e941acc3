#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod actor;
mod common;
pub mod constants;
pub mod core;
mod dht;
pub mod error;
mod testnet;

#[cfg(feature = "async")]
pub mod async_dht;

pub use crate::actor::{config::Config, transport::Responder, transport::Transport, Info};
pub use crate::common::{
    ClosestContacts, Contact, Id, KBucket, Request, Response, RoutingTable, StoreRequest,
    Timestamp, ValueItem,
};
pub use crate::core::{
    server::{AcceptAll, Verifier},
    value_store::Persistence,
};
pub use crate::error::{Error, ErrorCode, ProtocolError, Result, RpcError};
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder};
pub use testnet::{MemoryNetwork, MemoryTransport, Testnet};
