//! Process-wide counter/gauge registry.
//!
//! Cheap to clone and share; the supervisor snapshots it every
//! `metrics_interval_ms` and publishes on `monitoring.metrics`. Counter names
//! are plain strings; well-known ones are listed as constants so call sites
//! and tests agree.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::monotonic_ns;

/// Commands rejected as replays.
pub const METRIC_REJECTED_REPLAY: &str = "rejected_replay";
/// Commands rejected as stale.
pub const METRIC_REJECTED_STALE: &str = "rejected_stale";
/// Commands rejected on signature mismatch.
pub const METRIC_REJECTED_SIGNATURE: &str = "rejected_signature";
/// Commands rejected for a missing second factor.
pub const METRIC_REJECTED_MFA: &str = "rejected_mfa";
/// Emergency-stop activations.
pub const METRIC_ESTOP_COUNT: &str = "estop_count";
/// Planner replans triggered by obstacle updates.
pub const METRIC_REPLAN_COUNT: &str = "replan_count";
/// Sensor samples dropped for timestamp regression.
pub const METRIC_STALE_SAMPLES_DROPPED: &str = "stale_samples_dropped";
/// Mesh deliveries dropped on dead subscribers.
pub const METRIC_MESH_DROPPED: &str = "mesh_dropped";

/// Shared metrics registry handle.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1.0);
    }

    /// Increment a counter by an arbitrary amount.
    pub fn incr_by(&self, name: &str, by: f64) {
        let mut map = self.inner.lock();
        *map.entry(name.to_string()).or_insert(0.0) += by;
    }

    /// Set a gauge to an absolute value.
    pub fn set(&self, name: &str, value: f64) {
        self.inner.lock().insert(name.to_string(), value);
    }

    /// Current value of one entry (0 if never touched).
    pub fn get(&self, name: &str) -> f64 {
        self.inner.lock().get(name).copied().unwrap_or(0.0)
    }

    /// Immutable snapshot of all entries.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            values: self.inner.lock().clone(),
            timestamp_ns: monotonic_ns(),
        }
    }
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub values: BTreeMap<String, f64>,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}
