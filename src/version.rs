//! Registry versioning
//!
//! The registry version is the newest modification time (milliseconds since
//! the Unix epoch) seen across every tracked artifact. It never goes back.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time registry version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(u64);

impl SchemaVersion {
    pub const ZERO: SchemaVersion = SchemaVersion(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Version for a file modification time; times before the epoch clamp to zero
    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp() {
            Some(ts) => write!(f, "{} ({})", self.0, ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Shared monotonic version counter
#[derive(Debug, Default)]
pub struct VersionClock(AtomicU64);

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SchemaVersion {
        SchemaVersion(self.0.load(Ordering::Acquire))
    }

    /// Fold an observed modification time into the clock.
    ///
    /// Returns true if the version moved forward.
    pub fn observe(&self, seen: SchemaVersion) -> bool {
        self.0.fetch_max(seen.0, Ordering::AcqRel) < seen.0
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_never_regresses() {
        let clock = VersionClock::new();
        assert!(clock.observe(SchemaVersion::from_millis(200)));
        assert!(!clock.observe(SchemaVersion::from_millis(100)));
        assert!(!clock.observe(SchemaVersion::from_millis(200)));
        assert_eq!(clock.current().as_millis(), 200);
        assert!(clock.observe(SchemaVersion::from_millis(201)));
        assert_eq!(clock.current().as_millis(), 201);
    }

    #[test]
    fn test_from_system_time() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(SchemaVersion::from_system_time(t).as_millis(), 1_700_000_000_123);

        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(SchemaVersion::from_system_time(before), SchemaVersion::ZERO);
    }

    #[test]
    fn test_display_includes_timestamp() {
        let v = SchemaVersion::from_millis(1_700_000_000_123);
        assert_eq!(v.to_string(), "1700000000123 (2023-11-14T22:13:20.123Z)");
    }
}
