//! Wall clock timestamps attached to stored values.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Durations longer than that never elapse, about 30 years.
pub const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `start + duration`, capped at [FAR_FUTURE] after `start` instead of overflowing.
pub fn deadline_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration.min(FAR_FUTURE))
        .unwrap_or(start)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
/// Milliseconds since the UNIX epoch.
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or_default();

        Timestamp(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns `None` on overflow.
    pub fn checked_add(&self, duration: Duration) -> Option<Timestamp> {
        let millis = u64::try_from(duration.as_millis()).ok()?;
        self.0.checked_add(millis).map(Timestamp)
    }

    pub fn saturating_sub(&self, duration: Duration) -> Timestamp {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_sub(millis))
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Timestamp(millis)
    }
}

impl From<Timestamp> for u64 {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}
