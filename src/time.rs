//! Time source — spec §4.1.
//!
//! The engine never reads `SystemTime::now()` directly outside this module,
//! so tests can construct offsets deterministically without mocking the
//! clock.

use chrono::{TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed epoch the spec's microsecond offsets are measured from: 2023-10-01T00:00:00Z.
fn epoch() -> SystemTime {
    Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0)
        .single()
        .expect("fixed epoch constant is valid")
        .into()
}

#[derive(Debug, Clone, Copy)]
pub struct TimeSource {
    epoch: SystemTime,
}

impl Default for TimeSource {
    fn default() -> Self {
        Self { epoch: epoch() }
    }
}

impl TimeSource {
    /// Microseconds since the fixed epoch. Fits comfortably in 63 bits for
    /// centuries (i64::MAX µs is ~292,000 years past the epoch).
    pub fn now_us_offset(&self) -> i64 {
        let now = SystemTime::now();
        now.duration_since(self.epoch)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }

    /// Wall-clock seconds since the Unix epoch.
    pub fn now_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Build a `TimeSource` pinned to an arbitrary instant, for tests.
    #[cfg(test)]
    pub fn at(epoch: SystemTime) -> Self {
        Self { epoch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn now_us_offset_is_nonnegative_after_epoch() {
        let ts = TimeSource::default();
        assert!(ts.now_us_offset() > 0);
    }

    #[test]
    fn offset_advances_with_wall_clock() {
        let ts = TimeSource::at(SystemTime::now() - Duration::from_secs(10));
        let offset = ts.now_us_offset();
        assert!(offset >= 10_000_000);
    }

    #[test]
    fn now_seconds_matches_unix_epoch_within_a_second() {
        let ts = TimeSource::default();
        let expected = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!((ts.now_seconds() - expected).abs() <= 1);
    }
}
