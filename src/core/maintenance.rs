//! Routing table refresh and value republish scheduling.

use std::time::{Duration, Instant};

use crate::common::{deadline_after, Id, RoutingTable};
use crate::core::value_store::ValueStore;

/// Upper bound of bucket refresh lookups started per maintenance tick.
pub const MAX_REFRESHES_PER_TICK: usize = 8;
/// Upper bound of value republish queries started per maintenance tick.
pub const MAX_REPUBLISHES_PER_TICK: usize = 16;

/// Maintenance state
#[derive(Debug)]
pub struct Maintenance {
    last_tick: Instant,
    interval: Duration,
    refresh_timeout: Duration,
    replicate_interval: Duration,
}

/// Decisions about the work of one maintenance tick
#[derive(Debug, Default)]
pub struct MaintenanceDecisions {
    /// Whether to lookup our own id through the bootstrap contacts.
    pub should_reseed: bool,

    /// Whether to drop expired values.
    pub should_purge: bool,

    /// One random id inside each stale bucket.
    pub refresh_targets: Vec<Id>,

    /// Keys of values due for republishing.
    pub republish: Vec<Id>,
}

impl Maintenance {
    /// - `interval`: time between two maintenance ticks.
    /// - `refresh_timeout`: a bucket untouched for that long gets refreshed.
    /// - `replicate_interval`: a value not republished for that long gets republished.
    pub fn new(interval: Duration, refresh_timeout: Duration, replicate_interval: Duration) -> Self {
        Self::new_at(Instant::now(), interval, refresh_timeout, replicate_interval)
    }

    pub fn new_at(
        now: Instant,
        interval: Duration,
        refresh_timeout: Duration,
        replicate_interval: Duration,
    ) -> Self {
        Maintenance {
            last_tick: now,
            interval,
            refresh_timeout,
            replicate_interval,
        }
    }

    /// When the next maintenance tick is due.
    pub fn next_tick(&self) -> Instant {
        deadline_after(self.last_tick, self.interval)
    }

    /// Determine what maintenance operations should be performed.
    ///
    /// Computes decisions and resets the tick timer when the interval elapsed.
    pub fn decisions(
        &mut self,
        routing_table: &RoutingTable,
        values: &ValueStore,
        has_bootstrap: bool,
    ) -> MaintenanceDecisions {
        self.decisions_at(Instant::now(), routing_table, values, has_bootstrap)
    }

    pub fn decisions_at(
        &mut self,
        now: Instant,
        routing_table: &RoutingTable,
        values: &ValueStore,
        has_bootstrap: bool,
    ) -> MaintenanceDecisions {
        if now.saturating_duration_since(self.last_tick) < self.interval {
            return MaintenanceDecisions::default();
        }

        self.last_tick = now;

        let mut refresh_targets = routing_table.stale_buckets(now, self.refresh_timeout);
        refresh_targets.truncate(MAX_REFRESHES_PER_TICK);

        MaintenanceDecisions {
            should_reseed: routing_table.is_empty() && has_bootstrap,
            should_purge: true,
            refresh_targets,
            republish: values.due_for_republish(
                now,
                self.replicate_interval,
                MAX_REPUBLISHES_PER_TICK,
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::common::{Contact, Timestamp};
    use crate::constants::{REFRESH_INTERVAL, REFRESH_TIMEOUT, REPLICATE_INTERVAL};

    use super::*;

    fn maintenance(now: Instant) -> Maintenance {
        Maintenance::new_at(now, REFRESH_INTERVAL, REFRESH_TIMEOUT, REPLICATE_INTERVAL)
    }

    #[test]
    fn nothing_before_interval() {
        let t0 = Instant::now();
        let mut scheduler = maintenance(t0);
        let table = RoutingTable::new(Id::random());
        let values = ValueStore::new(None);

        let decisions = scheduler.decisions_at(
            t0 + REFRESH_INTERVAL - Duration::from_secs(1),
            &table,
            &values,
            true,
        );

        assert!(!decisions.should_reseed);
        assert!(!decisions.should_purge);
        assert_eq!(scheduler.next_tick(), t0 + REFRESH_INTERVAL);
    }

    #[test]
    fn tick_resets_timer() {
        let t0 = Instant::now();
        let mut scheduler = maintenance(t0);
        let table = RoutingTable::new(Id::random());
        let values = ValueStore::new(None);

        let tick = t0 + REFRESH_INTERVAL;
        let decisions = scheduler.decisions_at(tick, &table, &values, true);

        assert!(decisions.should_reseed);
        assert!(decisions.should_purge);
        assert_eq!(scheduler.next_tick(), tick + REFRESH_INTERVAL);

        assert!(!scheduler
            .decisions_at(tick, &table, &values, true)
            .should_purge);
    }

    #[test]
    fn no_reseed_without_bootstrap_or_with_contacts() {
        let t0 = Instant::now();
        let table = RoutingTable::new(Id::random());
        let values = ValueStore::new(None);

        let decisions = maintenance(t0).decisions_at(t0 + REFRESH_INTERVAL, &table, &values, false);
        assert!(!decisions.should_reseed);

        let mut table = RoutingTable::new(Id::random());
        table.add_contact(Contact::random());

        let decisions = maintenance(t0).decisions_at(t0 + REFRESH_INTERVAL, &table, &values, true);
        assert!(!decisions.should_reseed);
    }

    #[test]
    fn stale_buckets_are_refreshed() {
        let t0 = Instant::now();
        let mut scheduler = maintenance(t0);
        let mut table = RoutingTable::new(Id::random());
        let values = ValueStore::new(None);

        for _ in 0..100 {
            table.add_contact(Contact::random());
        }

        let decisions = scheduler.decisions_at(
            t0 + REFRESH_TIMEOUT + REFRESH_INTERVAL,
            &table,
            &values,
            false,
        );

        assert_eq!(
            decisions.refresh_targets.len(),
            table.buckets().len().min(MAX_REFRESHES_PER_TICK)
        );

        for target in &decisions.refresh_targets {
            let bucket = &table.buckets()[table.find_bucket(target)];
            assert!(bucket.covers(target));
        }
    }

    #[test]
    fn republish_at_replicate_interval_not_before() {
        let t0 = Instant::now();
        let mut scheduler = maintenance(t0);
        let table = RoutingTable::new(Id::random());
        let mut values = ValueStore::new(None);
        let key = Id::random();

        values
            .store_at(key, Bytes::from_static(b"v"), Timestamp::now(), t0)
            .unwrap();

        let mut tick = t0;
        while tick + REFRESH_INTERVAL < t0 + REPLICATE_INTERVAL {
            tick += REFRESH_INTERVAL;

            let decisions = scheduler.decisions_at(tick, &table, &values, false);
            assert!(decisions.should_purge);
            assert!(decisions.republish.is_empty());
        }

        let just_before = maintenance(t0).decisions_at(
            t0 + REPLICATE_INTERVAL - Duration::from_secs(1),
            &table,
            &values,
            false,
        );
        assert!(just_before.republish.is_empty());

        let at = scheduler.decisions_at(t0 + REPLICATE_INTERVAL, &table, &values, false);
        assert_eq!(at.republish, vec![key]);
    }

    #[test]
    fn interval_too_long_to_represent() {
        let t0 = Instant::now();
        let mut scheduler = Maintenance::new_at(t0, Duration::MAX, Duration::MAX, Duration::MAX);
        let table = RoutingTable::new(Id::random());
        let values = ValueStore::new(None);

        assert!(scheduler.next_tick() > t0 + REPLICATE_INTERVAL);
        assert!(!scheduler
            .decisions_at(t0 + REPLICATE_INTERVAL, &table, &values, true)
            .should_purge);
    }

    #[test]
    fn republish_is_bounded_per_tick() {
        let t0 = Instant::now();
        let mut scheduler = maintenance(t0);
        let table = RoutingTable::new(Id::random());
        let mut values = ValueStore::new(None);

        for _ in 0..(MAX_REPUBLISHES_PER_TICK * 2) {
            values
                .store_at(Id::random(), Bytes::from_static(b"v"), Timestamp::now(), t0)
                .unwrap();
        }

        let decisions = scheduler.decisions_at(t0 + REPLICATE_INTERVAL, &table, &values, false);
        assert_eq!(decisions.republish.len(), MAX_REPUBLISHES_PER_TICK);
    }
}
