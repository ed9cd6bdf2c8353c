//! TERRA Implement Coordinator
//!
//! Orchestrates the cutting, loading and transport implements across
//! operation phases: `idle → startup → active → (waiting ↔ active ↔
//! unloading) → shutdown → idle`.
//!
//! Ordering rules enforced here, not by callers: the cutter starts first and
//! only below the engagement speed with blades clear; the loader starts only
//! once the blades are at speed; both stop before unloading; transport mode
//! engages only after cargo is secured. Shutdown ramps the blades down at
//! the configured rate before disengaging.

pub mod coordinator;
pub mod tasks;
pub mod units;

pub use coordinator::{ImplementCoordinator, PhaseEvent};
