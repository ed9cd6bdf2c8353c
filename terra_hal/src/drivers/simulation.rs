//! Simulated sensor suite.
//!
//! All simulated drivers share one [`SimWorld`] holding vehicle ground
//! truth, so odometry, GPS and the motor endpoint stay mutually consistent.
//! Noise levels are rough field values, not calibrated models.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

use terra_common::clock::ns_to_s;
use terra_common::geometry::Vec3;
use terra_common::types::obstacle::{Detection, DetectionSource, ObstacleKind};
use terra_common::types::sensor::SensorSample;

use crate::driver::SensorDriver;

/// A ground-truth obstacle in the simulated field.
#[derive(Debug, Clone, Copy)]
pub struct SimObstacle {
    pub position: Vec3,
    pub size: f64,
    pub kind: ObstacleKind,
}

/// Shared ground truth for the simulation backend.
#[derive(Debug)]
pub struct SimState {
    /// True position [m].
    pub position: Vec3,
    /// True heading [rad].
    pub heading: f64,
    /// True ground speed [m/s].
    pub speed_mps: f64,
    /// True yaw rate [rad/s].
    pub yaw_rate: f64,
    /// Battery level [%].
    pub battery_pct: f64,
    /// Obstacles present in the field.
    pub obstacles: Vec<SimObstacle>,
    /// GPS fix quality injected by tests/scenarios.
    pub gps_quality: f64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            heading: 0.0,
            speed_mps: 0.0,
            yaw_rate: 0.0,
            battery_pct: 100.0,
            obstacles: Vec::new(),
            gps_quality: 0.9,
        }
    }
}

/// Cheap-to-clone handle on the simulated world.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    inner: Arc<Mutex<SimState>>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the ground-truth state.
    pub fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Advance vehicle ground truth by `dt` seconds at the given speed and
    /// yaw rate (called by the motor endpoint).
    pub fn integrate(&self, speed_mps: f64, yaw_rate: f64, dt: f64) {
        let mut s = self.inner.lock();
        s.speed_mps = speed_mps;
        s.yaw_rate = yaw_rate;
        s.heading = terra_common::geometry::normalize_angle(s.heading + yaw_rate * dt);
        let step = Vec3::planar(s.heading.cos(), s.heading.sin()).scale(speed_mps * dt);
        s.position = s.position + step;
        // Load-dependent drain plus idle draw.
        s.battery_pct = (s.battery_pct - dt * (0.002 + 0.01 * speed_mps)).max(0.0);
    }
}

// ─── GPS ────────────────────────────────────────────────────────────

/// Simulated GPS receiver.
pub struct GpsSim {
    world: SimWorld,
    /// Position noise sigma [m].
    noise_m: f64,
}

impl GpsSim {
    pub fn new(world: SimWorld) -> Self {
        Self {
            world,
            noise_m: 0.3,
        }
    }
}

impl SensorDriver for GpsSim {
    fn name(&self) -> &'static str {
        "gps"
    }

    fn rate_hz(&self) -> u64 {
        5
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let (truth, quality) = self.world.with(|s| (s.position, s.gps_quality));
        let mut rng = rand::thread_rng();
        let jitter = Vec3::planar(
            rng.gen_range(-self.noise_m..self.noise_m),
            rng.gen_range(-self.noise_m..self.noise_m),
        );
        Some(SensorSample::Gps {
            position: truth + jitter,
            quality,
            variance: self.noise_m * self.noise_m,
            timestamp_ns: now_ns,
        })
    }
}

// ─── IMU ────────────────────────────────────────────────────────────

/// Simulated IMU.
pub struct ImuSim {
    world: SimWorld,
    gyro_noise: f64,
    accel_noise: f64,
}

impl ImuSim {
    pub fn new(world: SimWorld) -> Self {
        Self {
            world,
            gyro_noise: 0.005,
            accel_noise: 0.08,
        }
    }
}

impl SensorDriver for ImuSim {
    fn name(&self) -> &'static str {
        "imu"
    }

    fn rate_hz(&self) -> u64 {
        50
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let yaw_rate = self.world.with(|s| s.yaw_rate);
        let mut rng = rand::thread_rng();
        let mut g = |n: f64| rng.gen_range(-n..n);
        Some(SensorSample::Imu {
            angular_rate: Vec3::new(g(self.gyro_noise), g(self.gyro_noise), yaw_rate + g(self.gyro_noise)),
            acceleration: Vec3::new(g(self.accel_noise), g(self.accel_noise), 9.81 + g(self.accel_noise)),
            accel_roll: g(0.01),
            accel_pitch: g(0.01),
            variance: self.gyro_noise * self.gyro_noise,
            timestamp_ns: now_ns,
        })
    }
}

// ─── Wheel odometry ─────────────────────────────────────────────────

/// Simulated wheel odometry, reporting body-frame displacement per sample.
pub struct OdometrySim {
    world: SimWorld,
    last_ns: Option<u64>,
    slip_noise: f64,
}

impl OdometrySim {
    pub fn new(world: SimWorld) -> Self {
        Self {
            world,
            last_ns: None,
            slip_noise: 0.02,
        }
    }
}

impl SensorDriver for OdometrySim {
    fn name(&self) -> &'static str {
        "wheel_odometry"
    }

    fn rate_hz(&self) -> u64 {
        20
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let dt = match self.last_ns {
            Some(prev) => ns_to_s(now_ns.saturating_sub(prev)),
            None => {
                self.last_ns = Some(now_ns);
                return None;
            }
        };
        self.last_ns = Some(now_ns);

        let speed = self.world.with(|s| s.speed_mps);
        let mut rng = rand::thread_rng();
        let slip = 1.0 + rng.gen_range(-self.slip_noise..self.slip_noise);
        // Forward travel in the body frame; lateral slip is noise only.
        Some(SensorSample::WheelOdometry {
            displacement: Vec3::planar(speed * dt * slip, rng.gen_range(-0.001..0.001)),
            speed: speed * slip,
            variance: (speed * dt * self.slip_noise).powi(2).max(1e-6),
            timestamp_ns: now_ns,
        })
    }
}

// ─── LIDAR clusterer ────────────────────────────────────────────────

const LIDAR_RANGE_M: f64 = 15.0;

/// Simulated LIDAR cluster output.
pub struct LidarSim {
    world: SimWorld,
}

impl LidarSim {
    pub fn new(world: SimWorld) -> Self {
        Self { world }
    }
}

impl SensorDriver for LidarSim {
    fn name(&self) -> &'static str {
        "lidar"
    }

    fn rate_hz(&self) -> u64 {
        10
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let (own, obstacles) = self.world.with(|s| (s.position, s.obstacles.clone()));
        let mut rng = rand::thread_rng();
        let detections: Vec<Detection> = obstacles
            .iter()
            .filter(|o| o.position.distance_xy(own) <= LIDAR_RANGE_M)
            .map(|o| Detection {
                position: o.position
                    + Vec3::planar(rng.gen_range(-0.05..0.05), rng.gen_range(-0.05..0.05)),
                size: o.size,
                confidence: 0.85,
                source: DetectionSource::Lidar,
                hint: None,
                timestamp_ns: now_ns,
            })
            .collect();
        Some(SensorSample::LidarClusters {
            detections,
            timestamp_ns: now_ns,
        })
    }
}

// ─── Camera classifier ──────────────────────────────────────────────

const CAMERA_RANGE_M: f64 = 20.0;

/// Simulated camera detections with classification hints.
pub struct CameraSim {
    world: SimWorld,
}

impl CameraSim {
    pub fn new(world: SimWorld) -> Self {
        Self { world }
    }
}

impl SensorDriver for CameraSim {
    fn name(&self) -> &'static str {
        "camera"
    }

    fn rate_hz(&self) -> u64 {
        5
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let (own, obstacles) = self.world.with(|s| (s.position, s.obstacles.clone()));
        let detections: Vec<Detection> = obstacles
            .iter()
            .filter(|o| o.position.distance_xy(own) <= CAMERA_RANGE_M)
            .map(|o| Detection {
                position: o.position,
                size: o.size,
                confidence: if o.kind.is_living() { 0.9 } else { 0.6 },
                source: DetectionSource::Camera,
                hint: Some(o.kind),
                timestamp_ns: now_ns,
            })
            .collect();
        Some(SensorSample::CameraDetections {
            detections,
            timestamp_ns: now_ns,
        })
    }
}

// ─── Ultrasonic ─────────────────────────────────────────────────────

const ULTRASONIC_RANGE_M: f64 = 3.0;

/// Simulated close-range ultrasonic ring.
pub struct UltrasonicSim {
    world: SimWorld,
}

impl UltrasonicSim {
    pub fn new(world: SimWorld) -> Self {
        Self { world }
    }
}

impl SensorDriver for UltrasonicSim {
    fn name(&self) -> &'static str {
        "ultrasonic"
    }

    fn rate_hz(&self) -> u64 {
        20
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let (own, obstacles) = self.world.with(|s| (s.position, s.obstacles.clone()));
        let detections: Vec<Detection> = obstacles
            .iter()
            .filter(|o| o.position.distance_xy(own) <= ULTRASONIC_RANGE_M)
            .map(|o| Detection {
                position: o.position,
                size: o.size,
                confidence: 0.7,
                source: DetectionSource::Ultrasonic,
                hint: None,
                timestamp_ns: now_ns,
            })
            .collect();
        Some(SensorSample::Ultrasonic {
            detections,
            timestamp_ns: now_ns,
        })
    }
}

// ─── Battery ────────────────────────────────────────────────────────

/// Simulated battery monitor.
pub struct BatterySim {
    world: SimWorld,
}

impl BatterySim {
    pub fn new(world: SimWorld) -> Self {
        Self { world }
    }
}

impl SensorDriver for BatterySim {
    fn name(&self) -> &'static str {
        "battery"
    }

    fn rate_hz(&self) -> u64 {
        1
    }

    fn sample(&mut self, now_ns: u64) -> Option<SensorSample> {
        let pct = self.world.with(|s| s.battery_pct);
        Some(SensorSample::Battery {
            level_pct: pct,
            voltage: 40.0 + 8.0 * pct / 100.0,
            timestamp_ns: now_ns,
        })
    }
}

/// The full simulated driver set sharing one world.
pub fn default_drivers(world: &SimWorld) -> Vec<Box<dyn SensorDriver>> {
    vec![
        Box::new(GpsSim::new(world.clone())),
        Box::new(ImuSim::new(world.clone())),
        Box::new(OdometrySim::new(world.clone())),
        Box::new(LidarSim::new(world.clone())),
        Box::new(CameraSim::new(world.clone())),
        Box::new(UltrasonicSim::new(world.clone())),
        Box::new(BatterySim::new(world.clone())),
    ]
}
