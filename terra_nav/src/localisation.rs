//! Multi-rate localisation filter.
//!
//! Loosely-coupled complementary/Kalman-style estimator:
//!
//! - GPS strictly above the quality threshold drives absolute position via a
//!   variance-weighted blend; position uncertainty resets to the GPS sigma.
//! - Below threshold, position advances by dead reckoning: the accumulated
//!   wheel-odometry displacement rotated into the world frame; uncertainty
//!   grows at a fixed rate.
//! - Orientation always comes from the IMU through a complementary filter
//!   weighted toward the gyro.
//! - Valid visual odometry applies a confidence-weighted correction and
//!   multiplies uncertainty down by a bounded factor, never below the
//!   sensor floor.
//!
//! Per-modality samples older than the last incorporated one are dropped.

use tracing::debug;

use terra_common::clock::ns_to_s;
use terra_common::config::LocalisationConfig;
use terra_common::geometry::{normalize_angle, Vec3};
use terra_common::types::pose::Pose;
use terra_common::types::sensor::SensorSample;

/// Latest GPS fix pending incorporation.
#[derive(Debug, Clone, Copy)]
struct GpsFix {
    position: Vec3,
    quality: f64,
    variance: f64,
}

/// Latest visual-odometry refinement pending incorporation.
#[derive(Debug, Clone, Copy)]
struct VoRefinement {
    correction: Vec3,
    confidence: f64,
}

/// The localisation filter. Single writer of the vehicle pose.
pub struct LocalisationFilter {
    cfg: LocalisationConfig,
    pose: Pose,
    /// Ground speed estimate from odometry [m/s].
    speed: f64,
    /// Body-frame displacement accumulated since the last tick [m].
    pending_odo: Vec3,
    pending_gps: Option<GpsFix>,
    pending_vo: Option<VoRefinement>,
    /// Whether any GPS fix has ever been incorporated.
    has_fix: bool,
    // Last incorporated timestamp per modality; older samples are dropped.
    last_gps_ns: u64,
    last_imu_ns: u64,
    last_odo_ns: u64,
    last_vo_ns: u64,
    last_tick_ns: u64,
}

impl LocalisationFilter {
    pub fn new(cfg: LocalisationConfig, now_ns: u64) -> Self {
        Self {
            pose: Pose::unknown(cfg.max_position_uncertainty_m, now_ns),
            cfg,
            speed: 0.0,
            pending_odo: Vec3::ZERO,
            pending_gps: None,
            pending_vo: None,
            has_fix: false,
            last_gps_ns: 0,
            last_imu_ns: 0,
            last_odo_ns: 0,
            last_vo_ns: 0,
            last_tick_ns: now_ns,
        }
    }

    /// Latest pose estimate.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Ground speed estimate [m/s].
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Ingest one sensor sample.
    ///
    /// Returns `false` if the sample was dropped for timestamp regression
    /// within its modality.
    pub fn ingest(&mut self, sample: &SensorSample) -> bool {
        match sample {
            SensorSample::Gps {
                position,
                quality,
                variance,
                timestamp_ns,
            } => {
                if *timestamp_ns < self.last_gps_ns {
                    return false;
                }
                self.last_gps_ns = *timestamp_ns;
                self.pending_gps = Some(GpsFix {
                    position: *position,
                    quality: *quality,
                    variance: *variance,
                });
            }
            SensorSample::Imu {
                angular_rate,
                accel_roll,
                accel_pitch,
                timestamp_ns,
                ..
            } => {
                if *timestamp_ns < self.last_imu_ns {
                    return false;
                }
                let dt = if self.last_imu_ns == 0 {
                    0.0
                } else {
                    ns_to_s(timestamp_ns.saturating_sub(self.last_imu_ns))
                };
                self.last_imu_ns = *timestamp_ns;
                self.update_orientation(*angular_rate, *accel_roll, *accel_pitch, dt);
            }
            SensorSample::WheelOdometry {
                displacement,
                speed,
                timestamp_ns,
                ..
            } => {
                if *timestamp_ns < self.last_odo_ns {
                    return false;
                }
                self.last_odo_ns = *timestamp_ns;
                self.pending_odo = self.pending_odo + *displacement;
                self.speed = *speed;
            }
            SensorSample::VisualOdometry {
                correction,
                confidence,
                timestamp_ns,
            } => {
                if *timestamp_ns < self.last_vo_ns {
                    return false;
                }
                self.last_vo_ns = *timestamp_ns;
                if *confidence > 0.0 {
                    self.pending_vo = Some(VoRefinement {
                        correction: *correction,
                        confidence: confidence.clamp(0.0, 1.0),
                    });
                }
            }
            // Other modalities are not position/orientation sources.
            _ => {}
        }
        true
    }

    /// Complementary orientation update: gyro integration corrected by the
    /// accelerometer gravity reference.
    fn update_orientation(&mut self, angular_rate: Vec3, accel_roll: f64, accel_pitch: f64, dt: f64) {
        let w = self.cfg.gyro_weight;
        let gyro_roll = self.pose.roll + angular_rate.x * dt;
        let gyro_pitch = self.pose.pitch + angular_rate.y * dt;
        self.pose.roll = normalize_angle(w * gyro_roll + (1.0 - w) * accel_roll);
        self.pose.pitch = normalize_angle(w * gyro_pitch + (1.0 - w) * accel_pitch);
        // No absolute yaw reference on this platform; yaw is pure integration.
        self.pose.yaw = normalize_angle(self.pose.yaw + angular_rate.z * dt);
        self.pose.orientation_uncertainty =
            (self.pose.orientation_uncertainty * w + 0.01 * (1.0 - w)).min(std::f64::consts::PI);
    }

    /// Run one 10 Hz filter tick and return the updated pose.
    pub fn tick(&mut self, now_ns: u64) -> Pose {
        let dt = ns_to_s(now_ns.saturating_sub(self.last_tick_ns));
        self.last_tick_ns = now_ns;

        let gps = self.pending_gps.take();
        let odo = std::mem::replace(&mut self.pending_odo, Vec3::ZERO);

        // Strict inequality: quality exactly at the threshold falls back to
        // dead reckoning.
        let gps_admitted = gps
            .filter(|f| f.quality > self.cfg.gps_quality_threshold)
            .map(|fix| self.apply_gps(fix))
            .is_some();

        if !gps_admitted {
            self.dead_reckon(odo, dt);
        }

        if let Some(vo) = self.pending_vo.take() {
            self.apply_visual_odometry(vo);
        }

        self.pose.timestamp_ns = now_ns;
        self.pose
    }

    fn apply_gps(&mut self, fix: GpsFix) {
        if !self.has_fix {
            // First fix snaps the filter to the absolute frame.
            self.pose.position = fix.position;
            self.has_fix = true;
        } else {
            // Variance-weighted blend of prediction and measurement.
            let p = self.pose.position_uncertainty * self.pose.position_uncertainty;
            let gain = p / (p + fix.variance).max(f64::EPSILON);
            let innovation = fix.position - self.pose.position;
            self.pose.position = self.pose.position + innovation.scale(gain);
        }
        self.pose.position_uncertainty = fix
            .variance
            .sqrt()
            .max(self.cfg.min_position_uncertainty_m);
        debug!(
            uncertainty_m = self.pose.position_uncertainty,
            "gps fix incorporated"
        );
    }

    fn dead_reckon(&mut self, body_displacement: Vec3, dt: f64) {
        if body_displacement != Vec3::ZERO {
            let world = body_displacement.rotated_xy(self.pose.yaw);
            self.pose.position = self.pose.position + world;
        }
        self.pose.position_uncertainty = (self.pose.position_uncertainty
            + self.cfg.dead_reckoning_drift_mps * dt)
            .min(self.cfg.max_position_uncertainty_m);
    }

    fn apply_visual_odometry(&mut self, vo: VoRefinement) {
        let w = vo.confidence;
        self.pose.position = self.pose.position + vo.correction.scale(w);
        // Bounded multiplicative reduction, floored at the sensor floor.
        let factor = 1.0 - (1.0 - self.cfg.visual_odometry_improvement_factor) * w;
        self.pose.position_uncertainty = (self.pose.position_uncertainty * factor)
            .max(self.cfg.min_position_uncertainty_m);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const S: u64 = 1_000_000_000;

    fn filter() -> LocalisationFilter {
        LocalisationFilter::new(LocalisationConfig::default(), 0)
    }

    fn gps(x: f64, y: f64, quality: f64, ts: u64) -> SensorSample {
        SensorSample::Gps {
            position: Vec3::planar(x, y),
            quality,
            variance: 0.09,
            timestamp_ns: ts,
        }
    }

    fn odo(dx: f64, ts: u64) -> SensorSample {
        SensorSample::WheelOdometry {
            displacement: Vec3::planar(dx, 0.0),
            speed: dx * 10.0,
            variance: 0.001,
            timestamp_ns: ts,
        }
    }

    #[test]
    fn starts_at_origin_with_max_uncertainty() {
        let f = filter();
        let p = f.pose();
        assert_eq!(p.position, Vec3::ZERO);
        assert_eq!(
            p.position_uncertainty,
            LocalisationConfig::default().max_position_uncertainty_m
        );
        assert_eq!(p.yaw, 0.0);
    }

    #[test]
    fn gps_above_threshold_resets_uncertainty() {
        let mut f = filter();
        f.ingest(&gps(10.0, 5.0, 0.9, S));
        let p = f.tick(S);
        assert!((p.position.x - 10.0).abs() < 1e-9);
        assert!((p.position_uncertainty - 0.3).abs() < 1e-9);
    }

    #[test]
    fn gps_exactly_at_threshold_falls_back_to_dead_reckoning() {
        let cfg = LocalisationConfig::default();
        let mut f = filter();
        f.ingest(&gps(10.0, 5.0, cfg.gps_quality_threshold, S));
        let p = f.tick(S);
        // Fix not admitted: still at origin, uncertainty grew.
        assert_eq!(p.position, Vec3::ZERO);
        assert!(p.position_uncertainty >= cfg.max_position_uncertainty_m);
    }

    #[test]
    fn dead_reckoning_advances_and_uncertainty_strictly_grows() {
        let mut f = filter();
        // Acquire an absolute fix, then lose GPS.
        f.ingest(&gps(0.0, 0.0, 0.9, S));
        f.tick(S);

        let mut prev_unc = f.pose().position_uncertainty;
        let mut prev_x = f.pose().position.x;
        for i in 2..12u64 {
            f.ingest(&odo(0.1, i * S));
            f.ingest(&gps(100.0, 100.0, 0.1, i * S)); // poor quality, must be ignored
            let p = f.tick(i * S);
            assert!(p.position.x > prev_x, "position must advance by odometry");
            assert!(
                p.position_uncertainty > prev_unc,
                "uncertainty must strictly grow without absolute reference"
            );
            prev_unc = p.position_uncertainty;
            prev_x = p.position.x;
        }
        // The bad fixes never moved the estimate to (100, 100).
        assert!(f.pose().position.x < 2.0);
    }

    #[test]
    fn odometry_rotates_with_heading() {
        let mut f = filter();
        f.ingest(&gps(0.0, 0.0, 0.9, S));
        f.tick(S);
        // Turn 90° left via gyro.
        f.ingest(&SensorSample::Imu {
            angular_rate: Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            acceleration: Vec3::new(0.0, 0.0, 9.81),
            accel_roll: 0.0,
            accel_pitch: 0.0,
            variance: 0.001,
            timestamp_ns: S,
        });
        f.ingest(&SensorSample::Imu {
            angular_rate: Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            acceleration: Vec3::new(0.0, 0.0, 9.81),
            accel_roll: 0.0,
            accel_pitch: 0.0,
            variance: 0.001,
            timestamp_ns: 2 * S,
        });
        let yaw = f.pose().yaw;
        assert!(yaw > 1.0, "gyro integration should have turned left: {yaw}");

        // Forward body displacement now lands mostly on +Y.
        f.ingest(&odo(1.0, 2 * S));
        let p = f.tick(2 * S);
        assert!(p.position.y > 0.8, "displacement must rotate with yaw");
    }

    #[test]
    fn stale_samples_are_dropped() {
        let mut f = filter();
        assert!(f.ingest(&odo(0.1, 5 * S)));
        assert!(!f.ingest(&odo(0.1, 4 * S)), "older odometry must be dropped");
        assert!(f.ingest(&gps(0.0, 0.0, 0.9, 5 * S)));
        assert!(!f.ingest(&gps(1.0, 0.0, 0.9, S)));
    }

    #[test]
    fn visual_odometry_reduction_is_floored() {
        let cfg = LocalisationConfig::default();
        let mut f = filter();
        f.ingest(&gps(0.0, 0.0, 0.9, S));
        f.tick(S);
        // Many max-confidence refinements cannot push below the floor.
        for i in 2..40u64 {
            f.ingest(&SensorSample::VisualOdometry {
                correction: Vec3::ZERO,
                confidence: 1.0,
                timestamp_ns: i * S,
            });
            f.tick(i * S);
        }
        assert!(
            f.pose().position_uncertainty >= cfg.min_position_uncertainty_m - 1e-12
        );
    }

    #[test]
    fn tick_without_any_fix_stays_at_origin() {
        let mut f = filter();
        let p = f.tick(S);
        assert_eq!(p.position, Vec3::ZERO);
        assert_eq!(p.yaw, 0.0);
    }
}
