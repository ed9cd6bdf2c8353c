//! Subsystem and system status snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::geometry::Vec3;
use crate::types::operation::OperationPhase;

/// Path executor status, published on `navigation.status.updated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavStatus {
    /// Active path waypoints (empty when idle).
    pub path: Vec<Vec3>,
    /// Index of the waypoint currently being driven to.
    pub current_waypoint_index: usize,
    /// True when this update is the result of a replan.
    pub replanned: bool,
    /// Whether a path is active.
    pub active: bool,
    /// Commanded ground speed for path following [m/s].
    pub target_speed_mps: f64,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

/// Cutter sub-state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CutterStatus {
    pub engaged: bool,
    /// Normalised blade speed in `[0, 1]`.
    pub blade_speed: f64,
}

/// Loader sub-state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoaderStatus {
    pub running: bool,
    /// Hopper fill fraction in `[0, 1]`.
    pub fill_level: f64,
}

/// Implement coordinator snapshot, published on `implements.status.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementsStatus {
    pub phase: OperationPhase,
    pub cutter: CutterStatus,
    pub loader: LoaderStatus,
    /// Transport lock engaged (cargo secured).
    pub transport_locked: bool,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

impl ImplementsStatus {
    pub fn idle(timestamp_ns: u64) -> Self {
        Self {
            phase: OperationPhase::Idle,
            cutter: CutterStatus::default(),
            loader: LoaderStatus::default(),
            transport_locked: false,
            timestamp_ns,
        }
    }
}

/// Health of one supervised module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleHealth {
    /// Running and its heartbeat is current.
    Healthy,
    /// Alive but the heartbeat is stale (possible hang).
    Stale {
        /// Milliseconds since last heartbeat.
        age_ms: u64,
    },
    /// Task has exited.
    Dead,
}

/// Aggregated system snapshot, published on `monitoring.system`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Per-module health keyed by module name.
    pub modules: BTreeMap<String, ModuleHealth>,
    /// Monotonic timestamp of startup [ns].
    pub startup_ns: u64,
    /// Monotonic timestamp of this snapshot [ns].
    pub timestamp_ns: u64,
}
