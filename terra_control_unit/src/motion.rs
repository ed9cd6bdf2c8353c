//! The 50 Hz motion control loop.
//!
//! Per tick: heading error → terrain/turn speed reduction → steering command
//! with curvature feedforward → speed PID → four-wheel steering mix. Sole
//! writer of `motor.command`.
//!
//! Under emergency stop every tick commands all-zero setpoints and the PID
//! state is held reset until the stop is cleared.

use terra_common::config::MotionConfig;
use terra_common::geometry::{angle_diff, normalize_angle, Vec3};
use terra_common::types::motion::MotionState;
use terra_common::types::motor::MotorCommand;
use terra_common::types::pose::Pose;
use terra_common::types::safety::{SafetyMode, SafetyStatus};
use terra_common::types::status::NavStatus;

use crate::control::pid::{pid_compute, PidGains, PidState};
use crate::control::steering::{reduction_multiplier, steering_command, steering_mix};

/// EMA weight for the roughness estimate.
const ROUGHNESS_ALPHA: f64 = 0.05;
/// Gravity magnitude subtracted from the accelerometer norm [m/s²].
const GRAVITY: f64 = 9.81;

/// Target the controller is driving toward.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    /// Nothing commanded; decelerate to standstill.
    None,
    /// Operator `move` command: fixed heading and speed.
    Manual { speed: f64, heading: f64 },
    /// Path following: waypoint plus commanded speed.
    Waypoint {
        position: Vec3,
        index: usize,
        speed: f64,
        curvature: f64,
    },
}

/// The motion controller. Owns the vehicle [`MotionState`].
pub struct MotionController {
    cfg: MotionConfig,
    motion: MotionState,
    pid: PidState,
    target: Target,
    pose: Option<Pose>,
    /// Previous pose for finite-difference speed.
    prev_pose: Option<Pose>,
    /// Roughness estimate: EMA of accelerometer deviation from gravity.
    roughness: f64,
    /// Tilt magnitude limit [rad], for the slope reduction map.
    max_incline_rad: f64,
    /// Waypoint counts as reached at this distance [m].
    reached_threshold_m: f64,
    /// Waypoint reached on the last tick, pending publish.
    pending_reached: Option<(usize, Vec3)>,
    /// Last waypoint index this controller consumed; guards against
    /// re-arming a target the executor has not advanced past yet.
    last_reached: Option<usize>,
    /// Reduced ceiling while degraded [m/s].
    degraded_max: Option<f64>,
    halted: bool,
}

impl MotionController {
    pub fn new(cfg: MotionConfig, max_incline_deg: f64, reached_threshold_m: f64) -> Self {
        let motion = MotionState::stationary(
            cfg.max_speed_mps,
            cfg.max_accel_mps2,
            cfg.max_decel_mps2,
        );
        Self {
            cfg,
            motion,
            pid: PidState::default(),
            target: Target::None,
            pose: None,
            prev_pose: None,
            roughness: 0.0,
            max_incline_rad: max_incline_deg.to_radians(),
            reached_threshold_m,
            pending_reached: None,
            last_reached: None,
            degraded_max: None,
            halted: false,
        }
    }

    /// Current motion state snapshot.
    pub fn motion(&self) -> MotionState {
        self.motion
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn on_pose(&mut self, pose: Pose) {
        self.prev_pose = self.pose.replace(pose);
    }

    /// Update the roughness estimate from an IMU specific-force reading.
    pub fn on_accel(&mut self, acceleration: Vec3) {
        let deviation = (acceleration.norm() - GRAVITY).abs();
        self.roughness += ROUGHNESS_ALPHA * (deviation - self.roughness);
    }

    /// Track the path executor: adopt the active waypoint or clear the
    /// target when the path ends.
    pub fn on_nav(&mut self, nav: &NavStatus) {
        if self.halted {
            return;
        }
        if !nav.active {
            if matches!(self.target, Target::Waypoint { .. }) {
                self.target = Target::None;
            }
            self.last_reached = None;
            return;
        }
        if nav.replanned {
            self.last_reached = None;
        }
        if self.last_reached.is_some_and(|last| nav.current_waypoint_index < last) {
            // A fresh path restarted the index.
            self.last_reached = None;
        }
        if self.last_reached == Some(nav.current_waypoint_index) {
            // Already consumed; stay cleared until the executor advances.
            return;
        }
        let Some(position) = nav.path.get(nav.current_waypoint_index).copied() else {
            return;
        };
        let curvature = path_curvature(&nav.path, nav.current_waypoint_index);
        self.target = Target::Waypoint {
            position,
            index: nav.current_waypoint_index,
            speed: nav.target_speed_mps,
            curvature,
        };
    }

    /// Waypoint reached on the last tick, if any. Consumed by the task
    /// layer, which publishes `motion.waypoint_reached`.
    pub fn take_waypoint_reached(&mut self) -> Option<(usize, Vec3)> {
        self.pending_reached.take()
    }

    /// Operator `move` command.
    pub fn on_move(&mut self, speed: f64, direction: f64) {
        if self.halted {
            return;
        }
        self.target = Target::Manual {
            speed,
            heading: normalize_angle(direction),
        };
    }

    /// Operator `stop` command.
    pub fn on_stop(&mut self) {
        self.target = Target::None;
    }

    /// Track the safety monitor: ESTOP halts and clears the target;
    /// DEGRADED imposes a reduced speed ceiling.
    pub fn on_safety(&mut self, status: &SafetyStatus) {
        match status.mode {
            SafetyMode::Estop => {
                if !self.halted {
                    self.halted = true;
                    self.target = Target::None;
                    self.pid.reset();
                }
                self.degraded_max = None;
            }
            SafetyMode::Degraded => {
                self.halted = false;
                self.degraded_max = status.reduced_max_speed;
            }
            SafetyMode::Normal => {
                self.halted = false;
                self.degraded_max = None;
            }
        }
    }

    /// Run one control cycle and return the wheel setpoints to publish.
    pub fn tick(&mut self, dt: f64, now_ns: u64) -> MotorCommand {
        if self.halted {
            self.motion.speed = 0.0;
            self.motion.target_speed = 0.0;
            self.motion.acceleration = 0.0;
            return MotorCommand::stop(now_ns);
        }

        let Some(pose) = self.pose else {
            return MotorCommand::stop(now_ns);
        };

        // Waypoint-reached check: exactly at the threshold counts. The
        // target is cleared here; the task layer publishes the event.
        if let Target::Waypoint { position, index, .. } = self.target {
            if pose.position.distance_xy(position) <= self.reached_threshold_m {
                self.pending_reached = Some((index, pose.position));
                self.last_reached = Some(index);
                self.target = Target::None;
            }
        }

        // Measured speed from consecutive poses.
        if let Some(prev) = self.prev_pose {
            let pose_dt = terra_common::clock::ns_to_s(
                pose.timestamp_ns.saturating_sub(prev.timestamp_ns),
            );
            if pose_dt > 1e-4 {
                self.motion.speed = (pose.position.distance_xy(prev.position) / pose_dt)
                    .clamp(0.0, self.motion.max_speed);
            }
        }
        self.motion.heading = pose.yaw;

        let (raw_target_speed, target_heading, curvature) = match self.target {
            Target::None => (0.0, pose.yaw, 0.0),
            Target::Manual { speed, heading } => (speed, heading, 0.0),
            Target::Waypoint {
                position,
                speed,
                curvature,
                ..
            } => (speed, pose.position.bearing_to(position), curvature),
        };

        let heading_error = angle_diff(target_heading, pose.yaw);
        self.motion.target_heading = target_heading;

        // Speed envelope: configured max, tightened while degraded.
        let ceiling = self
            .degraded_max
            .map_or(self.cfg.max_speed_mps, |d| d.min(self.cfg.max_speed_mps));

        // Terrain and turn reductions, each piecewise-linear.
        let slope_mult = reduction_multiplier(
            pose.tilt(),
            0.5 * self.max_incline_rad,
            self.max_incline_rad,
            self.cfg.terrain_max_reduction,
        );
        let rough_mult = reduction_multiplier(
            self.roughness,
            self.cfg.terrain_rough_threshold,
            3.0 * self.cfg.terrain_rough_threshold,
            self.cfg.terrain_max_reduction,
        );
        let turn_mult = reduction_multiplier(
            heading_error.abs(),
            self.cfg.turn_slow_threshold_rad,
            std::f64::consts::PI,
            self.cfg.turn_slow_max_reduction,
        );

        let target_speed = if raw_target_speed > 0.0 {
            (raw_target_speed * slope_mult * rough_mult * turn_mult)
                .clamp(self.cfg.min_speed_mps, ceiling)
        } else {
            0.0
        };
        self.motion.target_speed = target_speed.min(ceiling);

        let steer = steering_command(
            heading_error,
            curvature,
            self.cfg.kp_steer,
            self.cfg.kff_curvature,
            self.cfg.steer_max_rad,
        );

        let gains = PidGains {
            kp: self.cfg.kp_speed,
            ki: self.cfg.ki_speed,
            kd: self.cfg.kd_speed,
            integral_limit: self.cfg.integral_limit,
            accel_max: self.cfg.max_accel_mps2,
            decel_max: self.cfg.max_decel_mps2,
        };
        let accel = pid_compute(
            &mut self.pid,
            &gains,
            self.motion.target_speed - self.motion.speed,
            dt,
        );
        self.motion.acceleration = accel;

        // Normalised commanded speed for the mix.
        let v = ((self.motion.speed + accel * dt) / self.cfg.max_speed_mps).clamp(0.0, 1.0);
        MotorCommand {
            setpoints: steering_mix(v, steer),
            timestamp_ns: now_ns,
        }
    }
}

/// Heading change at waypoint `index`, divided by the upcoming segment
/// length: a cheap curvature estimate for the feedforward term.
fn path_curvature(path: &[Vec3], index: usize) -> f64 {
    if index == 0 || index + 1 >= path.len() {
        return 0.0;
    }
    let a = path[index - 1];
    let b = path[index];
    let c = path[index + 1];
    let turn = angle_diff(b.bearing_to(c), a.bearing_to(b));
    let len = b.distance_xy(c).max(1e-6);
    turn / len
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use terra_common::types::safety::SafetyStatus;

    const DT: f64 = 0.02;

    fn cfg() -> MotionConfig {
        let toml = r#"
max_speed_mps = 2.0
max_accel_mps2 = 1.0
max_decel_mps2 = 2.0
"#;
        toml::from_str(toml).unwrap()
    }

    fn controller() -> MotionController {
        MotionController::new(cfg(), 20.0, 0.5)
    }

    fn pose_at(x: f64, y: f64, yaw: f64, ts: u64) -> Pose {
        Pose {
            position: Vec3::planar(x, y),
            roll: 0.0,
            pitch: 0.0,
            yaw,
            position_uncertainty: 0.1,
            orientation_uncertainty: 0.01,
            timestamp_ns: ts,
        }
    }

    #[test]
    fn no_pose_means_stop() {
        let mut c = controller();
        c.on_move(1.0, 0.0);
        assert_eq!(c.tick(DT, 0).setpoints, [0.0; 4]);
    }

    #[test]
    fn manual_move_spins_up_wheels() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        c.on_move(1.0, 0.0);
        let cmd = c.tick(DT, 1);
        assert!(cmd.setpoints.iter().all(|s| *s > 0.0));
        // Straight ahead: uniform mix.
        assert_eq!(cmd.setpoints[0], cmd.setpoints[1]);
    }

    #[test]
    fn heading_error_selects_inside_pair() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        // Target heading to the right (negative error → negative steer →
        // left pair inside per the mix convention s < 0).
        c.on_move(1.0, -1.0);
        let cmd = c.tick(DT, 1);
        assert!(
            cmd.setpoints[0] < cmd.setpoints[1],
            "left pair must be inside: {:?}",
            cmd.setpoints
        );
    }

    #[test]
    fn tight_turn_reduces_target_speed() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        c.on_move(2.0, 0.0);
        c.tick(DT, 1);
        let straight_target = c.motion().target_speed;

        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        c.on_move(2.0, 3.0); // nearly a U-turn
        c.tick(DT, 1);
        assert!(c.motion().target_speed < straight_target);
    }

    #[test]
    fn estop_zeroes_immediately_and_latches() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        c.on_move(2.0, 0.0);
        c.tick(DT, 1);

        let mut status = SafetyStatus::nominal(2);
        status.mode = SafetyMode::Estop;
        status.estop_active = true;
        c.on_safety(&status);

        let cmd = c.tick(DT, 3);
        assert_eq!(cmd.setpoints, [0.0; 4]);
        // Move commands are ignored while halted.
        c.on_move(2.0, 0.0);
        assert_eq!(c.tick(DT, 4).setpoints, [0.0; 4]);
    }

    #[test]
    fn degraded_caps_target_speed() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        let mut status = SafetyStatus::nominal(0);
        status.mode = SafetyMode::Degraded;
        status.reduced_max_speed = Some(0.5);
        c.on_safety(&status);
        c.on_move(2.0, 0.0);
        c.tick(DT, 1);
        assert!(c.motion().target_speed <= 0.5 + 1e-12);
    }

    #[test]
    fn nav_target_follows_waypoint_and_clears() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        let nav = NavStatus {
            path: vec![Vec3::ZERO, Vec3::planar(10.0, 0.0)],
            current_waypoint_index: 1,
            replanned: false,
            active: true,
            target_speed_mps: 1.0,
            timestamp_ns: 0,
        };
        c.on_nav(&nav);
        let cmd = c.tick(DT, 1);
        assert!(cmd.setpoints.iter().any(|s| *s > 0.0));

        let done = NavStatus {
            active: false,
            ..nav
        };
        c.on_nav(&done);
        c.tick(DT, 2);
        assert_eq!(c.motion().target_speed, 0.0);
    }

    #[test]
    fn waypoint_reached_emits_once_and_clears_target() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        let nav = NavStatus {
            path: vec![Vec3::ZERO, Vec3::planar(10.0, 0.0)],
            current_waypoint_index: 1,
            replanned: false,
            active: true,
            target_speed_mps: 1.0,
            timestamp_ns: 0,
        };
        c.on_nav(&nav);
        c.tick(DT, 1);
        assert!(c.take_waypoint_reached().is_none(), "still far away");

        // Exactly at the threshold distance counts as reached.
        c.on_pose(pose_at(9.5, 0.0, 0.0, 1_000_000_000));
        c.tick(DT, 2);
        let (index, position) = c.take_waypoint_reached().expect("waypoint reached");
        assert_eq!(index, 1);
        assert!((position.x - 9.5).abs() < 1e-9);
        // Target cleared: this tick onward decelerates.
        c.tick(DT, 3);
        assert_eq!(c.motion().target_speed, 0.0);
        assert!(c.take_waypoint_reached().is_none(), "event consumed");

        // A stale status for the same index must not re-arm the target.
        c.on_nav(&nav);
        c.tick(DT, 4);
        assert!(c.take_waypoint_reached().is_none());

        // The executor advancing to the next waypoint re-arms it.
        let advanced = NavStatus {
            path: vec![Vec3::ZERO, Vec3::planar(10.0, 0.0), Vec3::planar(10.0, 10.0)],
            current_waypoint_index: 2,
            ..nav
        };
        c.on_nav(&advanced);
        c.tick(DT, 5);
        assert!(c.motion().target_speed > 0.0);
    }

    #[test]
    fn measured_speed_tracks_pose_deltas() {
        let mut c = controller();
        c.on_pose(pose_at(0.0, 0.0, 0.0, 0));
        c.tick(DT, 0);
        // 1 m in 1 s → 1 m/s.
        c.on_pose(pose_at(1.0, 0.0, 0.0, 1_000_000_000));
        c.on_move(1.0, 0.0);
        c.tick(DT, 1);
        assert!((c.motion().speed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn curvature_zero_on_straight_path() {
        let path = [Vec3::ZERO, Vec3::planar(5.0, 0.0), Vec3::planar(10.0, 0.0)];
        assert_eq!(path_curvature(&path, 1), 0.0);
        // Right-angle turn has nonzero curvature.
        let bent = [Vec3::ZERO, Vec3::planar(5.0, 0.0), Vec3::planar(5.0, 5.0)];
        assert!(path_curvature(&bent, 1).abs() > 0.1);
    }
}
