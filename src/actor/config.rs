use std::time::Duration;

use crate::common::{Contact, Id};
use crate::constants::{
    expiry_from_seconds, ALLOWED_RPC_FAILS, ALPHA, BLACKLIST_SIZE, DUPLICATION_COUNT,
    EXPIRY_DURATION, K, LOOKUP_TIMEOUT, MAX_VALUE_SIZE, REFRESH_INTERVAL, REFRESH_TIMEOUT,
    REPLICATE_INTERVAL, RPC_TIMEOUT,
};
use crate::core::server::{AcceptAll, Verifier};
use crate::core::value_store::Persistence;
use crate::{Error, Result};

#[derive(Debug)]
/// Dht Configurations
pub struct Config {
    /// This node's id.
    ///
    /// Defaults to None, where a random id is generated.
    pub id: Option<Id>,
    /// Contacts used to join the network and to re-seed an empty routing table.
    ///
    /// Defaults to an empty list, for the first node of a network.
    pub bootstrap: Vec<Contact>,
    /// Number of requests sent in parallel by each lookup round.
    ///
    /// Defaults to [ALPHA]
    pub alpha: usize,
    /// Bucket size, and number of contacts a lookup converges on. Must be even.
    ///
    /// Defaults to [K]
    pub k: usize,
    /// Lookups return the best result they have after that long.
    ///
    /// Defaults to [LOOKUP_TIMEOUT]
    pub lookup_timeout: Duration,
    /// Requests without a response after that long are failures.
    ///
    /// Defaults to [RPC_TIMEOUT]
    pub rpc_timeout: Duration,
    /// Buckets untouched for that long are refreshed.
    ///
    /// Defaults to [REFRESH_TIMEOUT]
    pub refresh_timeout: Duration,
    /// Time between two maintenance ticks.
    ///
    /// Defaults to [REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// Values not republished for that long are republished.
    ///
    /// Defaults to [REPLICATE_INTERVAL]
    pub replicate_interval: Duration,
    /// Consecutive failed requests after which a contact is evicted.
    ///
    /// Defaults to [ALLOWED_RPC_FAILS]
    pub allowed_rpc_fails: u32,
    /// Number of contacts a value is stored at.
    ///
    /// Defaults to [DUPLICATION_COUNT]
    pub duplication_count: usize,
    /// How long after its timestamp a value expires, `None` to keep values forever.
    ///
    /// Defaults to [EXPIRY_DURATION] (never).
    pub expiry: Option<Duration>,
    /// Largest value accepted in a STORE request.
    ///
    /// Defaults to [MAX_VALUE_SIZE]
    pub max_value_size: usize,
    /// Number of misbehaving ids remembered.
    ///
    /// Defaults to [BLACKLIST_SIZE]
    pub blacklist_size: usize,
    /// Provenance checks for incoming requests and found values.
    ///
    /// Defaults to [AcceptAll]
    pub verifier: Box<dyn Verifier>,
    /// Durable backing store for values.
    ///
    /// Defaults to None, where values are only kept in memory.
    pub persistence: Option<Box<dyn Persistence>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            bootstrap: Vec::new(),
            alpha: ALPHA,
            k: K,
            lookup_timeout: LOOKUP_TIMEOUT,
            rpc_timeout: RPC_TIMEOUT,
            refresh_timeout: REFRESH_TIMEOUT,
            refresh_interval: REFRESH_INTERVAL,
            replicate_interval: REPLICATE_INTERVAL,
            allowed_rpc_fails: ALLOWED_RPC_FAILS,
            duplication_count: DUPLICATION_COUNT,
            expiry: expiry_from_seconds(EXPIRY_DURATION),
            max_value_size: MAX_VALUE_SIZE,
            blacklist_size: BLACKLIST_SIZE,
            verifier: Box::new(AcceptAll),
            persistence: None,
        }
    }
}

impl Config {
    /// Reject settings the routing table and lookups can't work with.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k % 2 != 0 {
            return Err(Error::Malformed(format!(
                "k must be a positive even number, got {}",
                self.k
            )));
        }

        if self.alpha == 0 {
            return Err(Error::Malformed("alpha must be positive".to_string()));
        }

        if self.duplication_count == 0 {
            return Err(Error::Malformed(
                "duplication_count must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.alpha, 3);
        assert_eq!(config.k, 20);
        assert_eq!(config.duplication_count, config.k);
        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.expiry, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid() {
        for config in [
            Config {
                k: 0,
                ..Default::default()
            },
            Config {
                k: 7,
                ..Default::default()
            },
            Config {
                alpha: 0,
                ..Default::default()
            },
            Config {
                duplication_count: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(Error::Malformed(_))));
        }
    }
}
