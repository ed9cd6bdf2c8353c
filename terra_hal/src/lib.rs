//! TERRA Hardware Abstraction Layer
//!
//! Sensor drivers push typed [`SensorSample`](terra_common::types::sensor::SensorSample)s
//! onto the mesh at their rated frequency under the stable key
//! `sensor.<name>.updated`; the rest of the stack never sees hardware.
//!
//! The motor bus endpoint is the single consumer of `motor.command`: it slews
//! the four wheel motors toward their setpoints with a bounded per-tick
//! change, models the electrical/thermal response, and publishes
//! `motor.status.updated`.
//!
//! The default backend is the simulation driver set, which shares a
//! [`SimWorld`](drivers::simulation::SimWorld) so odometry, GPS and the motor
//! endpoint agree on ground truth.

pub mod driver;
pub mod drivers;
pub mod motor;
pub mod runner;

pub use driver::{HalError, SensorDriver};
pub use motor::MotorEndpoint;
pub use runner::{spawn_driver, spawn_motor_endpoint};
