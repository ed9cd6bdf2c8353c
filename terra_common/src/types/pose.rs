//! Fused pose estimate.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;

/// Vehicle pose in the local ENU frame.
///
/// `position_uncertainty` is a scalar 1-sigma radius in metres. It strictly
/// grows between localisation ticks that incorporate no absolute reference
/// and is only reduced by a measurement whose variance beats the current
/// estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pose {
    /// Position [m].
    pub position: Vec3,
    /// Roll angle [rad].
    pub roll: f64,
    /// Pitch angle [rad].
    pub pitch: f64,
    /// Yaw (heading) angle, CCW from East [rad].
    pub yaw: f64,
    /// 1-sigma position uncertainty [m].
    pub position_uncertainty: f64,
    /// 1-sigma orientation uncertainty [rad].
    pub orientation_uncertainty: f64,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

impl Pose {
    /// Pose at the origin with the given (maximum) uncertainty.
    pub fn unknown(max_uncertainty: f64, timestamp_ns: u64) -> Self {
        Self {
            position: Vec3::ZERO,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            position_uncertainty: max_uncertainty,
            orientation_uncertainty: std::f64::consts::PI,
            timestamp_ns,
        }
    }

    /// Combined tilt magnitude `sqrt(roll² + pitch²)` [rad].
    #[inline]
    pub fn tilt(&self) -> f64 {
        (self.roll * self.roll + self.pitch * self.pitch).sqrt()
    }
}
