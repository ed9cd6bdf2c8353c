//! Timestamp helpers.
//!
//! All in-process timestamps are monotonic nanoseconds measured from a
//! process-wide origin, so samples from different subsystems compare
//! directly. Wall-clock milliseconds are used only at the command channel
//! boundary (envelope freshness) and for persisted queue entries.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the first call in this process.
///
/// Never goes backwards. The origin is pinned lazily; callers only ever
/// compare differences, so the absolute anchor is irrelevant.
#[inline]
pub fn monotonic_ns() -> u64 {
    ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Monotonic milliseconds since process origin.
#[inline]
pub fn monotonic_ms() -> u64 {
    monotonic_ns() / 1_000_000
}

/// Wall-clock milliseconds since the Unix epoch.
#[inline]
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert a nanosecond delta to seconds as f64.
#[inline]
pub fn ns_to_s(ns: u64) -> f64 {
    ns as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_decreases() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_is_recent() {
        // Anything after 2024-01-01 counts as sane.
        assert!(wall_clock_ms() > 1_704_067_200_000);
    }

    #[test]
    fn ns_to_s_conversion() {
        assert!((ns_to_s(1_500_000_000) - 1.5).abs() < 1e-12);
    }
}
