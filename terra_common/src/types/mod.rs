//! Snapshot types exchanged over the event mesh.
//!
//! One authoritative writer per entity: the safety monitor owns
//! [`safety::SafetyStatus`], the motor endpoint owns [`motor::MotorStatus`],
//! the localisation filter owns [`pose::Pose`], and so on. Everything that
//! crosses a subsystem boundary is an immutable clone of these types.

pub mod bus;
pub mod command;
pub mod motion;
pub mod motor;
pub mod obstacle;
pub mod operation;
pub mod pose;
pub mod safety;
pub mod sensor;
pub mod status;
