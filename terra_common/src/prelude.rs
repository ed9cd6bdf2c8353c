//! Common re-exports for convenience.

pub use crate::clock::{monotonic_ms, monotonic_ns, ns_to_s, wall_clock_ms};
pub use crate::config::{ConfigError, ConfigLoader, TerraConfig};
pub use crate::geometry::{angle_diff, normalize_angle, Polygon, Vec3};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use crate::types::bus::BusMessage;
pub use crate::types::command::{Command, CommandEnvelope};
pub use crate::types::motion::MotionState;
pub use crate::types::motor::{MotorCommand, MotorHealth, MotorState, MotorStatus, Wheel};
pub use crate::types::obstacle::{Detection, Obstacle, ObstacleKind, ObstacleMapSnapshot};
pub use crate::types::operation::{OperationKind, OperationPhase, OperationState};
pub use crate::types::pose::Pose;
pub use crate::types::safety::{
    EstopReason, EstopRecord, SafetyMode, SafetyStatus, ViolationEvent, ViolationFlags,
    ViolationKind,
};
pub use crate::types::sensor::SensorSample;
pub use crate::types::status::{ImplementsStatus, NavStatus, SystemStatus};
