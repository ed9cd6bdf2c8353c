//! The message sum type carried by the event mesh.
//!
//! Every topic's payload is one of these variants; subscribers match on the
//! variant they expect and log-and-drop anything else (a topic/payload
//! mismatch is a wiring bug, not a runtime error).

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;
use crate::metrics::MetricsSnapshot;
use crate::types::command::CommandEnvelope;
use crate::types::motor::{MotorCommand, MotorStatus};
use crate::types::obstacle::ObstacleMapSnapshot;
use crate::types::operation::OperationStatus;
use crate::types::pose::Pose;
use crate::types::safety::{EstopRecord, SafetyStatus, ViolationEvent};
use crate::types::sensor::SensorSample;
use crate::types::status::{ImplementsStatus, NavStatus, SystemStatus};

/// One message on the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMessage {
    Sensor(SensorSample),
    Pose(Pose),
    ObstacleMap(ObstacleMapSnapshot),
    MotorCommand(MotorCommand),
    MotorStatus(MotorStatus),
    Safety(SafetyStatus),
    Violation(ViolationEvent),
    Estop(EstopRecord),
    EstopReset {
        timestamp_ns: u64,
    },
    Nav(NavStatus),
    BoundaryViolation {
        position: Vec3,
        timestamp_ns: u64,
    },
    WaypointReached {
        index: usize,
        position: Vec3,
        timestamp_ns: u64,
    },
    PathComplete {
        timestamp_ns: u64,
    },
    Command(CommandEnvelope),
    Implements(ImplementsStatus),
    Operation(OperationStatus),
    Metrics(MetricsSnapshot),
    System(SystemStatus),
    /// Untyped payload for ad-hoc requests and acknowledgements.
    Value(serde_json::Value),
}

impl BusMessage {
    /// Short variant name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            BusMessage::Sensor(_) => "sensor",
            BusMessage::Pose(_) => "pose",
            BusMessage::ObstacleMap(_) => "obstacle_map",
            BusMessage::MotorCommand(_) => "motor_command",
            BusMessage::MotorStatus(_) => "motor_status",
            BusMessage::Safety(_) => "safety",
            BusMessage::Violation(_) => "violation",
            BusMessage::Estop(_) => "estop",
            BusMessage::EstopReset { .. } => "estop_reset",
            BusMessage::Nav(_) => "nav",
            BusMessage::BoundaryViolation { .. } => "boundary_violation",
            BusMessage::WaypointReached { .. } => "waypoint_reached",
            BusMessage::PathComplete { .. } => "path_complete",
            BusMessage::Command(_) => "command",
            BusMessage::Implements(_) => "implements",
            BusMessage::Operation(_) => "operation",
            BusMessage::Metrics(_) => "metrics",
            BusMessage::System(_) => "system",
            BusMessage::Value(_) => "value",
        }
    }
}
