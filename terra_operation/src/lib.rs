//! TERRA Operation Coordinator
//!
//! The top-level facade gluing navigation, motion and implements under the
//! safety monitor. `start(kind, params)` builds a segment plan, installs the
//! first segment in the path executor, configures implements and enters
//! `running`; each tick honours safety (pausing on ESTOP and resuming on
//! clearance), advances segments on `path.complete`, and publishes status.

pub mod coordinator;
pub mod tasks;

pub use coordinator::{OperationCoordinator, OperationEvent, OperationParams};
