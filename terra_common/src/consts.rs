//! Topic names, subsystem rates and structural constants.
//!
//! Topic strings are the stable external interface of the event mesh; every
//! publisher and subscriber goes through these constants so a rename is a
//! compile-time event, not a silent partition.

use static_assertions::const_assert;

// ─── Structural constants ───────────────────────────────────────────

/// Independently controllable wheel motors on the platform. Sized into
/// [`Wheel::ALL`](crate::types::motor::Wheel::ALL) and every per-wheel
/// array, so a platform change fails to compile here first.
pub const NUM_WHEELS: usize = 4;

/// Distinct implement phases, idle included. Sized into
/// [`OperationPhase::ALL`](crate::types::operation::OperationPhase::ALL).
pub const NUM_OPERATION_PHASES: usize = 6;

// ─── Subsystem rates ────────────────────────────────────────────────

/// Localisation filter tick rate.
pub const LOCALISATION_RATE_HZ: u64 = 10;
/// Obstacle map tick rate.
pub const OBSTACLE_RATE_HZ: u64 = 20;
/// Motion control loop rate.
pub const CONTROL_RATE_HZ: u64 = 50;
/// Safety monitor check loop rate.
pub const SAFETY_CHECK_RATE_HZ: u64 = 5;
/// Supervisor status aggregation rate.
pub const SUPERVISOR_RATE_HZ: u64 = 1;

// Loop-rate ordering: control must outpace perception, perception must
// outpace localisation.
const_assert!(CONTROL_RATE_HZ > OBSTACLE_RATE_HZ);
const_assert!(OBSTACLE_RATE_HZ > LOCALISATION_RATE_HZ);

// ─── Mesh topics ────────────────────────────────────────────────────

/// Prefix for per-sensor sample topics: `sensor.<name>.updated`.
pub const SENSOR_TOPIC_PREFIX: &str = "sensor.";

/// Fused pose estimate, published each localisation tick.
pub const TOPIC_POSE_UPDATED: &str = "pose.updated";
/// Tracked obstacle snapshot, published each obstacle-map tick.
pub const TOPIC_OBSTACLE_MAP_UPDATED: &str = "obstacle.map.updated";
/// Per-wheel motor telemetry from the motor bus endpoint.
pub const TOPIC_MOTOR_STATUS: &str = "motor.status.updated";
/// Wheel setpoints — written only by the motion controller.
pub const TOPIC_MOTOR_COMMAND: &str = "motor.command";
/// Canonical safety state snapshot.
pub const TOPIC_SAFETY_STATUS: &str = "safety.status.updated";
/// A violation became active.
pub const TOPIC_SAFETY_VIOLATION: &str = "safety.violation";
/// A violation cleared (after hysteresis).
pub const TOPIC_SAFETY_VIOLATION_CLEARED: &str = "safety.violation.cleared";
/// Emergency stop entered.
pub const TOPIC_ESTOP_ACTIVATED: &str = "safety.estop.activated";
/// Emergency stop reset accepted.
pub const TOPIC_ESTOP_RESET: &str = "safety.estop.reset";
/// Path executor status (path, index, replan flag).
pub const TOPIC_NAV_STATUS: &str = "navigation.status.updated";
/// Pose left the configured field polygon.
pub const TOPIC_NAV_BOUNDARY_VIOLATION: &str = "navigation.boundary_violation";
/// Motion controller reached the active waypoint and cleared its target.
pub const TOPIC_WAYPOINT_REACHED: &str = "motion.waypoint_reached";
/// Path executor consumed the final waypoint.
pub const TOPIC_PATH_COMPLETE: &str = "path.complete";
/// Implement coordinator status.
pub const TOPIC_IMPLEMENTS_STATUS: &str = "implements.status.updated";
/// Operation coordinator status.
pub const TOPIC_OPERATION_STATUS: &str = "operation.status.updated";
/// Prefix for admitted commands: `command.<type>`.
pub const COMMAND_TOPIC_PREFIX: &str = "command.";
/// An envelope passed verification (liveness signal for the watchdog).
pub const TOPIC_COMMAND_RECEIVED: &str = "command.received";
/// Metrics registry snapshot.
pub const TOPIC_MONITORING_METRICS: &str = "monitoring.metrics";
/// Aggregated system status from the supervisor.
pub const TOPIC_MONITORING_SYSTEM: &str = "monitoring.system";

// ─── Request topics ─────────────────────────────────────────────────

/// Request: install a path from the current pose (navigator).
pub const REQ_NAV_SET_PATH: &str = "navigation.set_path";
/// Request: cancel the active path (navigator).
pub const REQ_NAV_CANCEL: &str = "navigation.cancel";
/// Request: phase event for the implement coordinator.
pub const REQ_IMPLEMENTS_EVENT: &str = "implements.event";
/// Request: corridor clearance query against the obstacle map.
pub const REQ_OBSTACLE_CORRIDOR: &str = "obstacle.corridor_query";
/// Request: start an operation.
pub const REQ_OPERATION_START: &str = "operation.start";
/// Request: pause the running operation.
pub const REQ_OPERATION_PAUSE: &str = "operation.pause";
/// Request: resume the paused operation.
pub const REQ_OPERATION_RESUME: &str = "operation.resume";
/// Request: cancel the active operation.
pub const REQ_OPERATION_CANCEL: &str = "operation.cancel";

/// Topic for one sensor's samples: `sensor.<name>.updated`.
pub fn sensor_topic(name: &str) -> String {
    format!("{SENSOR_TOPIC_PREFIX}{name}.updated")
}

/// Topic an admitted command is dispatched on: `command.<type>`.
pub fn command_topic(type_name: &str) -> String {
    format!("{COMMAND_TOPIC_PREFIX}{type_name}")
}
