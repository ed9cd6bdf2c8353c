//! TERRA Control Unit
//!
//! Two hard-real-time-ish subsystems sharing a crate:
//!
//! - [`motion`] - the 50 Hz control loop: speed PID with clamped anti-windup
//!   integral, terrain/turn speed reduction, steering command with curvature
//!   feedforward, and the four-wheel steering mix. Sole writer of
//!   `motor.command`.
//! - [`safety`] - the safety monitor: violation aggregation with clear-side
//!   hysteresis, the NORMAL → DEGRADED → ESTOP state machine, and the
//!   liveness watchdog.
//!
//! [`tasks`] wires both to the mesh.

pub mod control;
pub mod motion;
pub mod safety;
pub mod tasks;

pub use motion::MotionController;
pub use safety::monitor::SafetyMonitor;
pub use safety::watchdog::{WatchdogState, WatchdogTimer};
