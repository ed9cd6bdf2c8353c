//! Operation plan and status types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consts::NUM_OPERATION_PHASES;
use crate::geometry::Vec3;

/// Kind of field operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Cut standing crop along the planned lanes.
    Cutting,
    /// Cut and collect into the hopper.
    Loading,
    /// Haul secured cargo between points.
    Transport,
}

/// Implement phase within an operation.
///
/// Canonical order: `Startup → Active → (Waiting ↔ Active ↔ Unloading) →
/// Shutdown`, bracketed by `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Idle,
    Startup,
    Active,
    Waiting,
    Unloading,
    Shutdown,
}

impl OperationPhase {
    /// Every phase in canonical order, idle first.
    pub const ALL: [OperationPhase; NUM_OPERATION_PHASES] = [
        OperationPhase::Idle,
        OperationPhase::Startup,
        OperationPhase::Active,
        OperationPhase::Waiting,
        OperationPhase::Unloading,
        OperationPhase::Shutdown,
    ];
}

/// Task bound to one segment of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentTask {
    /// Work the implement along this segment.
    Work,
    /// Drive without engaging implements.
    Travel,
    /// Drive to the unload point and discharge.
    Unload,
}

/// One leg of an operation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub waypoints: Vec<Vec3>,
    pub task: SegmentTask,
}

/// Lifecycle state of the operation coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Idle,
    Running,
    Paused,
    Complete,
    Cancelled,
}

/// Status snapshot published on `operation.status.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub id: Uuid,
    pub kind: OperationKind,
    pub state: OperationState,
    pub phase: OperationPhase,
    /// Index of the active segment.
    pub segment_index: usize,
    /// Total segments in the plan.
    pub segment_count: usize,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    /// Set while paused for a safety violation.
    pub paused_for_safety: bool,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}
