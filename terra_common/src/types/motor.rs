//! Wheel motor state and setpoint types.

use serde::{Deserialize, Serialize};

use crate::consts::NUM_WHEELS;

/// One of the four independently-controllable wheel motors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl Wheel {
    /// All wheels in setpoint-array order.
    pub const ALL: [Wheel; NUM_WHEELS] = [
        Wheel::FrontLeft,
        Wheel::FrontRight,
        Wheel::RearLeft,
        Wheel::RearRight,
    ];

    /// Index into per-wheel arrays.
    #[inline]
    pub const fn index(&self) -> usize {
        match self {
            Wheel::FrontLeft => 0,
            Wheel::FrontRight => 1,
            Wheel::RearLeft => 2,
            Wheel::RearRight => 3,
        }
    }

    /// True for the left-side pair.
    #[inline]
    pub const fn is_left(&self) -> bool {
        matches!(self, Wheel::FrontLeft | Wheel::RearLeft)
    }
}

/// Motor health as derived from thermal/electrical telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorHealth {
    Good,
    Warning,
    Critical,
}

/// State of a single wheel motor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorState {
    pub wheel: Wheel,
    /// Normalised actual speed in `[0, 1]`.
    pub current_speed: f64,
    /// Normalised commanded speed in `[0, 1]`.
    pub target_speed: f64,
    /// Drive current [A].
    pub current_amps: f64,
    /// Winding temperature [°C].
    pub temperature_c: f64,
    pub health: MotorHealth,
}

impl MotorState {
    pub fn idle(wheel: Wheel) -> Self {
        Self {
            wheel,
            current_speed: 0.0,
            target_speed: 0.0,
            current_amps: 0.0,
            temperature_c: 20.0,
            health: MotorHealth::Good,
        }
    }
}

/// Per-wheel setpoints, written only by the motion controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorCommand {
    /// Normalised setpoints in wheel order, each in `[0, 1]`.
    pub setpoints: [f64; NUM_WHEELS],
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

impl MotorCommand {
    /// All wheels commanded to zero.
    pub fn stop(timestamp_ns: u64) -> Self {
        Self {
            setpoints: [0.0; NUM_WHEELS],
            timestamp_ns,
        }
    }
}

/// Snapshot of all four motors, published by the motor bus endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorStatus {
    pub motors: [MotorState; NUM_WHEELS],
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

impl MotorStatus {
    pub fn idle(timestamp_ns: u64) -> Self {
        Self {
            motors: [
                MotorState::idle(Wheel::FrontLeft),
                MotorState::idle(Wheel::FrontRight),
                MotorState::idle(Wheel::RearLeft),
                MotorState::idle(Wheel::RearRight),
            ],
            timestamp_ns,
        }
    }

    /// Highest winding temperature across all wheels [°C].
    pub fn max_temperature(&self) -> f64 {
        self.motors
            .iter()
            .map(|m| m.temperature_c)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Highest drive current across all wheels [A].
    pub fn max_current(&self) -> f64 {
        self.motors
            .iter()
            .map(|m| m.current_amps)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}
