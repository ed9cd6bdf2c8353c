//! Driver backends.
//!
//! Only the simulation backend ships in-tree; field hardware plugs in
//! through the same [`SensorDriver`](crate::driver::SensorDriver) trait.

pub mod simulation;
