//! TERRA Navigation
//!
//! Three subsystems, one crate:
//!
//! - [`localisation`] - multi-rate sensor fusion producing the vehicle pose
//!   (GPS absolute fixes, dead reckoning from wheel odometry, IMU
//!   complementary orientation, optional visual-odometry refinement).
//! - [`obstacle`] - detection fusion, track association, confidence decay
//!   and classification; answers corridor clearance queries.
//! - [`planner`] - path planning (direct corridor or grid search with a
//!   conservative fallback) and the waypoint executor.
//!
//! [`tasks`] wires each subsystem to the mesh at its rated frequency.

pub mod localisation;
pub mod obstacle;
pub mod planner;
pub mod tasks;

pub use localisation::LocalisationFilter;
pub use obstacle::ObstacleMap;
pub use planner::{PathExecutor, PathPlanner, PlanError};
