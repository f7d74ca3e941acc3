//! Core DHT logic - pure computation with no direct I/O.
//!
//! Contains the query drivers (`lookup`, `store_query`), the `server` request
//! handler, the `value_store`, and `maintenance` scheduling decisions.
//! All I/O orchestration lives in `actor/`, which calls into this module.

pub mod lookup;
pub mod maintenance;
pub mod server;
pub mod store_query;
pub mod value_store;
