//! Sensor sample sum type.
//!
//! Each driver publishes exactly one of these variants on its
//! `sensor.<name>.updated` topic. Fusion code matches on the variant; the
//! timestamp and variance accessors let rate/staleness handling stay
//! modality-agnostic.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;
use crate::types::motor::Wheel;
use crate::types::obstacle::Detection;

/// One typed sample from a sensor driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum SensorSample {
    /// Absolute position fix.
    Gps {
        /// Position in the local ENU frame [m].
        position: Vec3,
        /// Fix quality in `[0, 1]` (0 = no fix).
        quality: f64,
        /// Position variance [m²].
        variance: f64,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Inertial measurement.
    Imu {
        /// Body angular rates (roll, pitch, yaw) [rad/s].
        angular_rate: Vec3,
        /// Specific force in body frame [m/s²].
        acceleration: Vec3,
        /// Accelerometer-derived roll [rad].
        accel_roll: f64,
        /// Accelerometer-derived pitch [rad].
        accel_pitch: f64,
        /// Orientation variance [rad²].
        variance: f64,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Wheel odometry over the last sample interval.
    WheelOdometry {
        /// Body-frame displacement since previous sample [m].
        displacement: Vec3,
        /// Ground speed [m/s].
        speed: f64,
        /// Displacement variance [m²].
        variance: f64,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Visual odometry refinement.
    VisualOdometry {
        /// Estimated position correction [m].
        correction: Vec3,
        /// Reported confidence in `[0, 1]`.
        confidence: f64,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Clustered LIDAR returns.
    LidarClusters {
        detections: Vec<Detection>,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Ultrasonic ranging hits.
    Ultrasonic {
        detections: Vec<Detection>,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Already-classified camera detections.
    CameraDetections {
        detections: Vec<Detection>,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Per-wheel electrical/thermal telemetry.
    MotorSense {
        wheel: Wheel,
        /// Drive current [A].
        current_amps: f64,
        /// Winding temperature [°C].
        temperature_c: f64,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
    /// Battery state.
    Battery {
        /// Charge level [%].
        level_pct: f64,
        /// Pack voltage [V].
        voltage: f64,
        /// Monotonic timestamp [ns].
        timestamp_ns: u64,
    },
}

impl SensorSample {
    /// Monotonic timestamp of the sample [ns].
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            SensorSample::Gps { timestamp_ns, .. }
            | SensorSample::Imu { timestamp_ns, .. }
            | SensorSample::WheelOdometry { timestamp_ns, .. }
            | SensorSample::VisualOdometry { timestamp_ns, .. }
            | SensorSample::LidarClusters { timestamp_ns, .. }
            | SensorSample::Ultrasonic { timestamp_ns, .. }
            | SensorSample::CameraDetections { timestamp_ns, .. }
            | SensorSample::MotorSense { timestamp_ns, .. }
            | SensorSample::Battery { timestamp_ns, .. } => *timestamp_ns,
        }
    }

    /// Stable modality name, matching the driver's topic segment.
    pub fn modality(&self) -> &'static str {
        match self {
            SensorSample::Gps { .. } => "gps",
            SensorSample::Imu { .. } => "imu",
            SensorSample::WheelOdometry { .. } => "wheel_odometry",
            SensorSample::VisualOdometry { .. } => "visual_odometry",
            SensorSample::LidarClusters { .. } => "lidar",
            SensorSample::Ultrasonic { .. } => "ultrasonic",
            SensorSample::CameraDetections { .. } => "camera",
            SensorSample::MotorSense { .. } => "motor_sense",
            SensorSample::Battery { .. } => "battery",
        }
    }
}
