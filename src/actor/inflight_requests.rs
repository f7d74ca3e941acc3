use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::common::{deadline_after, Contact, Id};
use crate::core::lookup::LookupMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What an outstanding request is for.
pub enum RpcPurpose {
    Lookup(Id, LookupMode),
    /// A STORE sent by the store query with that id.
    Store(u64),
    /// A STORE caching a found value on the lookup path.
    CacheStore,
    Ping,
}

#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub transaction_id: u32,
    pub to: Contact,
    pub sent_at: Instant,
    pub purpose: RpcPurpose,
}

#[derive(Debug, Default)]
pub struct InflightRequests {
    // Requests in sending order, so the oldest is always at the front.
    // Removed requests leave a `None` behind until they reach the front.
    requests: VecDeque<Option<InflightRequest>>,
    // Sequence number of each transaction_id, the position in `requests`
    // is the sequence number minus `popped`.
    index: HashMap<u32, usize>,
    popped: usize,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Add a new inflight request O(1)
    pub fn add(&mut self, request: InflightRequest) {
        let seq = self.popped + self.requests.len();
        self.index.insert(request.transaction_id, seq);
        self.requests.push_back(Some(request));
    }

    /// Check if a transaction_id is still inflight O(1)
    pub fn contains(&self, transaction_id: u32) -> bool {
        self.index.contains_key(&transaction_id)
    }

    /// Remove inflight request by transaction_id if it exists O(1)
    pub fn remove(&mut self, transaction_id: u32) -> Option<InflightRequest> {
        let seq = self.index.remove(&transaction_id)?;

        let removed = self
            .requests
            .get_mut(seq - self.popped)
            .and_then(|slot| slot.take());

        self.pop_removed();

        removed
    }

    /// Remove and return every request sent at least `timeout` ago.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<InflightRequest> {
        let mut expired = Vec::new();

        while let Some(front) = self.requests.front() {
            match front {
                Some(request) if now.saturating_duration_since(request.sent_at) < timeout => break,
                _ => {}
            }

            if let Some(Some(request)) = self.requests.pop_front() {
                self.index.remove(&request.transaction_id);
                expired.push(request);
            }
            self.popped += 1;
        }

        expired
    }

    /// When the oldest outstanding request times out.
    pub fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.requests
            .iter()
            .flatten()
            .next()
            .map(|request| deadline_after(request.sent_at, timeout))
    }

    fn pop_removed(&mut self) {
        while let Some(None) = self.requests.front() {
            self.requests.pop_front();
            self.popped += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(transaction_id: u32, sent_at: Instant) -> InflightRequest {
        InflightRequest {
            transaction_id,
            to: Contact::random(),
            sent_at,
            purpose: RpcPurpose::Ping,
        }
    }

    #[test]
    fn add_and_remove() {
        let mut inflight = InflightRequests::new();
        let now = Instant::now();

        for tid in 0..5 {
            inflight.add(request(tid, now));
        }

        assert_eq!(inflight.remove(2).map(|r| r.transaction_id), Some(2));
        assert!(inflight.remove(2).is_none());
        assert!(!inflight.contains(2));
        assert!(inflight.contains(3));

        assert_eq!(inflight.remove(0).map(|r| r.transaction_id), Some(0));
        assert_eq!(inflight.remove(4).map(|r| r.transaction_id), Some(4));
        assert_eq!(inflight.len(), 2);
    }

    #[test]
    fn expire_oldest_first() {
        let mut inflight = InflightRequests::new();
        let t0 = Instant::now();
        let timeout = Duration::from_secs(5);

        inflight.add(request(1, t0));
        inflight.add(request(2, t0 + Duration::from_secs(1)));
        inflight.add(request(3, t0 + Duration::from_secs(2)));

        assert_eq!(inflight.next_deadline(timeout), Some(t0 + timeout));

        inflight.remove(1);
        assert_eq!(
            inflight.next_deadline(timeout),
            Some(t0 + Duration::from_secs(1) + timeout)
        );

        let expired = inflight.expire(t0 + Duration::from_secs(6), timeout);
        assert_eq!(
            expired.iter().map(|r| r.transaction_id).collect::<Vec<_>>(),
            vec![2]
        );

        assert!(inflight.contains(3));
        assert_eq!(inflight.remove(3).map(|r| r.transaction_id), Some(3));
        assert_eq!(inflight.len(), 0);
        assert_eq!(inflight.next_deadline(timeout), None);
    }

    #[test]
    fn unbounded_timeout() {
        let mut inflight = InflightRequests::new();
        let t0 = Instant::now();

        inflight.add(request(1, t0));

        assert!(inflight.next_deadline(Duration::MAX).is_some());
        assert!(inflight.expire(t0 + Duration::from_secs(3600), Duration::MAX).is_empty());
    }
}
