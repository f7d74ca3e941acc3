//! Local key/value storage with supersede and expiry rules.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::common::{Id, Timestamp, ValueItem};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Expected, non exceptional, outcomes of the value store.
pub enum StoreError {
    #[error("Key not found")]
    /// No record for that key, or the record expired.
    NotFound,

    #[error("Superceded value, stored timestamp {stored_at:?} is not older than {timestamp:?}")]
    /// A record at least as recent is already stored.
    Superseded {
        stored_at: Timestamp,
        timestamp: Timestamp,
    },
}

impl From<StoreError> for crate::Error {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => crate::Error::NotFound,
            StoreError::Superseded { .. } => crate::Error::Superseded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A stored value with its bookkeeping.
pub struct ValueRecord {
    pub key: Id,
    pub value: Bytes,
    /// Creation timestamp of the value.
    pub stored_at: Timestamp,
    /// `None` means the value never expires.
    pub expires_at: Option<Timestamp>,
    /// Last time this node re-announced the value to its closest contacts.
    pub republished_at: Instant,
}

impl ValueRecord {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn to_item(&self) -> ValueItem {
        ValueItem {
            key: self.key,
            value: self.value.clone(),
            timestamp: self.stored_at,
        }
    }
}

/// Durable backing store for the values a node holds.
///
/// The [ValueStore] stays the source of truth at runtime, a persistence only
/// mirrors its writes and feeds it back on startup.
pub trait Persistence: Send + Debug {
    /// Every value saved so far.
    fn load(&mut self) -> std::io::Result<Vec<ValueItem>>;

    fn save(&mut self, item: &ValueItem) -> std::io::Result<()>;

    fn remove(&mut self, key: &Id) -> std::io::Result<()>;
}

#[derive(Debug)]
/// In memory view of every value this node holds.
pub struct ValueStore {
    records: HashMap<Id, ValueRecord>,
    expiry: Option<Duration>,
    persistence: Option<Box<dyn Persistence>>,
}

impl ValueStore {
    /// `expiry` is added to a value's timestamp to work out when it expires,
    /// `None` keeps values forever.
    pub fn new(expiry: Option<Duration>) -> Self {
        Self {
            records: HashMap::new(),
            expiry,
            persistence: None,
        }
    }

    /// Mirror every write to `persistence`, after loading the values it holds.
    ///
    /// Expired or superseded saved values are skipped.
    pub fn with_persistence(
        mut self,
        mut persistence: Box<dyn Persistence>,
    ) -> std::io::Result<Self> {
        let items = persistence.load()?;
        let now = Timestamp::now();
        let count = items.len();

        for item in items {
            if let Err(error) = self.insert(item.key, item.value, item.timestamp, Instant::now()) {
                trace!(?error, "Skipping saved value");
                continue;
            }

            if self.records.get(&item.key).is_some_and(|r| r.is_expired(now)) {
                self.records.remove(&item.key);
                persistence.remove(&item.key)?;
            }
        }

        debug!(loaded = count, kept = self.records.len(), "Loaded persisted values");

        self.persistence = Some(persistence);

        Ok(self)
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Id> {
        self.records.keys()
    }

    // === Public Methods ===

    /// Store a value unless a record at least as recent is already held.
    pub fn store(&mut self, key: Id, value: Bytes, timestamp: Timestamp) -> Result<(), StoreError> {
        self.store_at(key, value, timestamp, Instant::now())
    }

    /// Same as [Self::store] with an explicit republish reference time.
    pub fn store_at(
        &mut self,
        key: Id,
        value: Bytes,
        timestamp: Timestamp,
        now: Instant,
    ) -> Result<(), StoreError> {
        self.insert(key, value, timestamp, now)?;

        if let (Some(persistence), Some(record)) = (&mut self.persistence, self.records.get(&key)) {
            if let Err(error) = persistence.save(&record.to_item()) {
                warn!(?key, ?error, "Failed to persist value");
            }
        }

        Ok(())
    }

    /// Retrieve an unexpired record.
    pub fn retrieve(&self, key: &Id) -> Result<&ValueRecord, StoreError> {
        self.retrieve_at(key, Timestamp::now())
    }

    /// Expired records are treated as absent but left in place, see [Self::purge_expired].
    pub fn retrieve_at(&self, key: &Id, now: Timestamp) -> Result<&ValueRecord, StoreError> {
        match self.records.get(key) {
            Some(record) if !record.is_expired(now) => Ok(record),
            _ => Err(StoreError::NotFound),
        }
    }

    pub fn remove(&mut self, key: &Id) -> Option<ValueRecord> {
        let removed = self.records.remove(key);

        if removed.is_some() {
            self.unpersist(key);
        }

        removed
    }

    /// Remove every record with `expires_at <= now`, returns the purged keys.
    pub fn purge_expired(&mut self, now: Timestamp) -> Vec<Id> {
        let expired: Vec<Id> = self
            .records
            .values()
            .filter(|record| record.is_expired(now))
            .map(|record| record.key)
            .collect();

        for key in &expired {
            self.records.remove(key);
            self.unpersist(key);
        }

        expired
    }

    /// Keys not republished for at least `interval`, oldest first, at most `limit`.
    pub fn due_for_republish(&self, now: Instant, interval: Duration, limit: usize) -> Vec<Id> {
        let mut due: Vec<&ValueRecord> = self
            .records
            .values()
            .filter(|record| now.saturating_duration_since(record.republished_at) >= interval)
            .collect();

        due.sort_by_key(|record| record.republished_at);

        due.into_iter().take(limit).map(|record| record.key).collect()
    }

    /// Returns `false` if there is no record for `key`.
    pub fn mark_republished(&mut self, key: &Id, now: Instant) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                record.republished_at = now;
                true
            }
            None => false,
        }
    }

    // === Private Methods ===

    fn insert(
        &mut self,
        key: Id,
        value: Bytes,
        timestamp: Timestamp,
        now: Instant,
    ) -> Result<(), StoreError> {
        if let Some(existing) = self.records.get(&key) {
            if existing.stored_at >= timestamp {
                return Err(StoreError::Superseded {
                    stored_at: existing.stored_at,
                    timestamp,
                });
            }
        }

        let expires_at = self.expiry.map(|expiry| {
            timestamp
                .checked_add(expiry)
                .unwrap_or(Timestamp::from_millis(u64::MAX))
        });

        trace!(?key, ?timestamp, ?expires_at, "Storing value");

        self.records.insert(
            key,
            ValueRecord {
                key,
                value,
                stored_at: timestamp,
                expires_at,
                republished_at: now,
            },
        );

        Ok(())
    }

    fn unpersist(&mut self, key: &Id) {
        if let Some(persistence) = &mut self.persistence {
            if let Err(error) = persistence.remove(key) {
                warn!(?key, ?error, "Failed to remove persisted value");
            }
        }
    }
}
