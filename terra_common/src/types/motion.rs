//! Vehicle-level motion state.

use serde::{Deserialize, Serialize};

/// Speed/heading state of the vehicle as tracked by the motion controller.
///
/// `speed` is always in `[0, max_speed]`; `target_speed` is clamped on
/// ingress so a bad command can never push the envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionState {
    /// Current ground speed [m/s].
    pub speed: f64,
    /// Commanded ground speed [m/s].
    pub target_speed: f64,
    /// Current heading [rad].
    pub heading: f64,
    /// Commanded heading [rad].
    pub target_heading: f64,
    /// Current acceleration [m/s²].
    pub acceleration: f64,
    /// Speed envelope [m/s].
    pub max_speed: f64,
    /// Acceleration envelope [m/s²].
    pub max_acceleration: f64,
    /// Deceleration envelope [m/s²].
    pub max_deceleration: f64,
}

impl MotionState {
    pub fn stationary(max_speed: f64, max_acceleration: f64, max_deceleration: f64) -> Self {
        Self {
            speed: 0.0,
            target_speed: 0.0,
            heading: 0.0,
            target_heading: 0.0,
            acceleration: 0.0,
            max_speed,
            max_acceleration,
            max_deceleration,
        }
    }

    /// Set the target speed, clamped to `[0, max_speed]`.
    #[inline]
    pub fn set_target_speed(&mut self, target: f64) {
        self.target_speed = target.clamp(0.0, self.max_speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_speed_clamped_on_ingress() {
        let mut m = MotionState::stationary(2.0, 1.0, 2.0);
        m.set_target_speed(5.0);
        assert_eq!(m.target_speed, 2.0);
        m.set_target_speed(-1.0);
        assert_eq!(m.target_speed, 0.0);
    }
}
