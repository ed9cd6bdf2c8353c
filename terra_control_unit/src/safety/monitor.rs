//! The safety monitor: canonical safety state and its transitions.
//!
//! Runs a 5 Hz check loop over the latest subsystem snapshots. Violations
//! activate immediately; they clear only after their underlying condition
//! has stayed false for the hysteresis duration. Any critical violation (or
//! an explicit command) enters ESTOP; ESTOP leaves only through an explicit
//! reset, and the reset fails while any critical violation remains.

use heapless::Vec as BoundedVec;
use tracing::{error, info, warn};

use terra_common::config::{SafetyConfig, MAX_SAFE_DISTANCE, MAX_SPEED_LIMIT};
use terra_common::geometry::Polygon;
use terra_common::types::command::SafetyLimits;
use terra_common::types::motor::MotorStatus;
use terra_common::types::obstacle::Obstacle;
use terra_common::types::pose::Pose;
use terra_common::types::safety::{
    EstopReason, EstopRecord, SafetyMode, SafetyStatus, ViolationEvent, ViolationFlags,
    ViolationKind,
};

use crate::safety::watchdog::{WatchdogState, WatchdogTimer};

/// Kept emergency-stop records.
const ESTOP_HISTORY: usize = 8;

/// Result of one check-loop pass.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Violation activations and (hysteresis-delayed) clears, in order.
    pub events: Vec<ViolationEvent>,
    /// Set when this pass entered ESTOP.
    pub estop: Option<EstopRecord>,
    /// Whether mode or the active set changed (status republish needed).
    pub changed: bool,
}

/// The safety monitor. Single writer of [`SafetyStatus`].
pub struct SafetyMonitor {
    cfg: SafetyConfig,
    watchdog: WatchdogTimer,
    mode: SafetyMode,
    /// Published violation set (clear side delayed by hysteresis).
    active: ViolationFlags,
    /// Per-kind monotonic time the condition was last observed false.
    false_since: [Option<u64>; ViolationKind::ALL.len()],
    last_estop: Option<EstopRecord>,
    history: BoundedVec<EstopRecord, ESTOP_HISTORY>,
    last_check_ns: u64,
    /// Operator-adjustable speed ceiling [m/s].
    max_speed_limit: f64,
    /// Configured vehicle maximum (never exceeded by updates) [m/s].
    configured_max_speed: f64,

    // Latest snapshots from the mesh.
    pose: Option<Pose>,
    motors: Option<MotorStatus>,
    battery_pct: Option<f64>,
    obstacles: Vec<Obstacle>,
    boundary: Polygon,
}

impl SafetyMonitor {
    pub fn new(
        cfg: SafetyConfig,
        watchdog_timeout_ms: u64,
        max_speed_mps: f64,
        boundary: Polygon,
        now_ns: u64,
    ) -> Self {
        Self {
            watchdog: WatchdogTimer::new(watchdog_timeout_ms, now_ns),
            mode: SafetyMode::Normal,
            active: ViolationFlags::empty(),
            false_since: [None; ViolationKind::ALL.len()],
            last_estop: None,
            history: BoundedVec::new(),
            last_check_ns: now_ns,
            max_speed_limit: max_speed_mps,
            configured_max_speed: max_speed_mps,
            pose: None,
            motors: None,
            battery_pct: None,
            obstacles: Vec::new(),
            boundary,
            cfg,
        }
    }

    // ── Input snapshots ─────────────────────────────────────────────

    pub fn on_pose(&mut self, pose: Pose) {
        self.pose = Some(pose);
    }

    pub fn on_motors(&mut self, status: MotorStatus) {
        self.motors = Some(status);
    }

    pub fn on_battery(&mut self, level_pct: f64) {
        self.battery_pct = Some(level_pct);
    }

    pub fn on_obstacles(&mut self, obstacles: Vec<Obstacle>) {
        self.obstacles = obstacles;
    }

    pub fn set_boundary(&mut self, boundary: Polygon) {
        self.boundary = boundary;
    }

    /// Reset the liveness watchdog (happens strictly before any publish of
    /// the downstream state).
    pub fn feed_watchdog(&mut self, now_ns: u64) {
        self.watchdog.reset(now_ns);
    }

    pub fn mode(&self) -> SafetyMode {
        self.mode
    }

    /// Canonical status snapshot.
    pub fn status(&self) -> SafetyStatus {
        SafetyStatus {
            mode: self.mode,
            estop_active: self.mode == SafetyMode::Estop,
            violations: self.active.kinds(),
            last_estop: self.last_estop.clone(),
            last_check_ns: self.last_check_ns,
            reduced_max_speed: self.reduced_max_speed(),
        }
    }

    fn reduced_max_speed(&self) -> Option<f64> {
        match self.mode {
            SafetyMode::Degraded => {
                Some(self.max_speed_limit * self.cfg.degraded_speed_factor)
            }
            _ if self.max_speed_limit < self.configured_max_speed => {
                Some(self.max_speed_limit)
            }
            _ => None,
        }
    }

    // ── Runtime limit updates ───────────────────────────────────────

    /// Apply a bounds-checked `update_safety_limits` command.
    pub fn update_limits(&mut self, limits: &SafetyLimits) -> Result<(), String> {
        if let Some(v) = limits.max_speed_mps {
            if v <= 0.0 || v > self.configured_max_speed {
                return Err(format!(
                    "max_speed_mps={v} out of range (0, {}]",
                    self.configured_max_speed
                ));
            }
        }
        if let Some(v) = limits.obstacle_safe_distance_m {
            if v <= 0.0 || v > MAX_SAFE_DISTANCE {
                return Err(format!(
                    "obstacle_safe_distance_m={v} out of range (0, {MAX_SAFE_DISTANCE}]"
                ));
            }
        }
        if let Some(v) = limits.human_safe_distance_m {
            if v <= 0.0 || v > MAX_SAFE_DISTANCE {
                return Err(format!(
                    "human_safe_distance_m={v} out of range (0, {MAX_SAFE_DISTANCE}]"
                ));
            }
        }
        if let Some(v) = limits.max_incline_deg {
            if v <= 0.0 || v > 45.0 {
                return Err(format!("max_incline_deg={v} out of range (0, 45]"));
            }
        }
        // All present fields validated; apply atomically.
        if let Some(v) = limits.max_speed_mps {
            self.max_speed_limit = v.min(MAX_SPEED_LIMIT);
        }
        if let Some(v) = limits.obstacle_safe_distance_m {
            self.cfg.obstacle_safe_distance_m = v;
        }
        if let Some(v) = limits.human_safe_distance_m {
            self.cfg.human_safe_distance_m = v;
        }
        if let Some(v) = limits.max_incline_deg {
            self.cfg.max_incline_deg = v;
        }
        info!("safety limits updated");
        Ok(())
    }

    // ── Check loop ──────────────────────────────────────────────────

    /// Instantaneous violation conditions from the latest snapshots.
    fn raw_conditions(&self, now_ns: u64) -> ViolationFlags {
        let mut raw = ViolationFlags::empty();

        if let Some(pose) = self.pose {
            for o in &self.obstacles {
                let surface = (o.position.distance_xy(pose.position) - o.size).max(0.0);
                if surface <= self.cfg.obstacle_safe_distance_m {
                    raw |= ViolationFlags::OBSTACLE_PROXIMITY;
                }
                if o.kind.is_living() && surface <= self.cfg.human_safe_distance_m {
                    raw |= ViolationFlags::HUMAN_PROXIMITY;
                }
            }

            if self.cfg.boundary_enforcement_enabled
                && self.boundary.is_valid()
                && !self.boundary.contains(pose.position)
            {
                raw |= ViolationFlags::BOUNDARY_VIOLATION;
            }

            if pose.tilt() > self.cfg.max_incline_deg.to_radians() {
                raw |= ViolationFlags::TILT_EXCEEDED;
            }
        }

        if let Some(motors) = &self.motors {
            if motors.max_temperature() > self.cfg.motor_critical_temp_c {
                raw |= ViolationFlags::MOTOR_OVERHEAT;
            }
            if motors.max_current() > self.cfg.motor_over_current_a {
                raw |= ViolationFlags::MOTOR_OVERCURRENT;
            }
        }

        if let Some(pct) = self.battery_pct {
            if pct < self.cfg.battery_critical_pct {
                raw |= ViolationFlags::BATTERY_CRITICAL;
            } else if pct < self.cfg.battery_low_pct {
                raw |= ViolationFlags::BATTERY_LOW;
            }
        }

        match self.watchdog.state(now_ns) {
            WatchdogState::Ok => {}
            WatchdogState::CommunicationLoss => raw |= ViolationFlags::COMMUNICATION_LOSS,
            WatchdogState::Expired => {
                raw |= ViolationFlags::COMMUNICATION_LOSS | ViolationFlags::WATCHDOG_TIMEOUT;
            }
        }

        raw
    }

    /// Run one 5 Hz check pass.
    pub fn check(&mut self, now_ns: u64) -> CheckReport {
        self.last_check_ns = now_ns;
        let raw = self.raw_conditions(now_ns);
        let hysteresis_ns = self.cfg.hysteresis_duration_ms * 1_000_000;

        let mut report = CheckReport::default();
        let before = self.active;

        for (i, kind) in ViolationKind::ALL.iter().enumerate() {
            let flag = kind.flag();
            if raw.contains(flag) {
                self.false_since[i] = None;
                if !self.active.contains(flag) {
                    self.active |= flag;
                    warn!(violation = kind.label(), "safety violation active");
                    report.events.push(ViolationEvent {
                        kind: *kind,
                        active: true,
                        timestamp_ns: now_ns,
                    });
                }
            } else if self.active.contains(flag) {
                // Clear only after the condition holds false for the
                // hysteresis duration.
                let since = *self.false_since[i].get_or_insert(now_ns);
                if now_ns.saturating_sub(since) >= hysteresis_ns {
                    self.active &= !flag;
                    self.false_since[i] = None;
                    info!(violation = kind.label(), "safety violation cleared");
                    report.events.push(ViolationEvent {
                        kind: *kind,
                        active: false,
                        timestamp_ns: now_ns,
                    });
                }
            } else {
                self.false_since[i] = None;
            }
        }

        // Mode transitions. ESTOP is entered on any critical violation and
        // left only via explicit reset.
        if self.mode != SafetyMode::Estop && self.active.any_critical() {
            let kind = self
                .active
                .kinds()
                .into_iter()
                .find(|k| k.is_critical())
                .expect("critical flag present");
            report.estop = Some(self.enter_estop(
                EstopReason::Violation(kind),
                "safety_monitor",
                now_ns,
            ));
        } else {
            match self.mode {
                SafetyMode::Normal if !self.active.is_empty() => {
                    self.mode = SafetyMode::Degraded;
                    warn!("safety mode degraded");
                }
                SafetyMode::Degraded if self.active.is_empty() => {
                    self.mode = SafetyMode::Normal;
                    info!("safety mode normal");
                }
                _ => {}
            }
        }

        report.changed = before != self.active || report.estop.is_some();
        report
    }

    fn enter_estop(&mut self, reason: EstopReason, source: &str, now_ns: u64) -> EstopRecord {
        self.mode = SafetyMode::Estop;
        let record = EstopRecord {
            when_ns: now_ns,
            reason,
            source: source.to_string(),
        };
        error!(
            reason = record.reason.label(),
            source = record.source,
            "EMERGENCY STOP"
        );
        if self.history.is_full() {
            // Drop the oldest record.
            self.history.rotate_left(1);
            self.history.pop();
        }
        let _ = self.history.push(record.clone());
        self.last_estop = Some(record.clone());
        record
    }

    /// Explicit emergency stop (operator command or internal fault path).
    ///
    /// Returns the record when this call performed the transition; `None`
    /// when already stopped.
    pub fn trigger_estop(
        &mut self,
        reason: EstopReason,
        source: &str,
        now_ns: u64,
    ) -> Option<EstopRecord> {
        if self.mode == SafetyMode::Estop {
            return None;
        }
        Some(self.enter_estop(reason, source, now_ns))
    }

    /// Explicit reset out of ESTOP.
    ///
    /// Fails with the offending kinds while any critical condition is still
    /// instantaneously present; a hysteresis-held latch whose condition has
    /// already gone false does not block the reset.
    pub fn try_reset(&mut self, now_ns: u64) -> Result<(), Vec<ViolationKind>> {
        if self.mode != SafetyMode::Estop {
            return Ok(());
        }
        let blocking: Vec<ViolationKind> = self
            .raw_conditions(now_ns)
            .kinds()
            .into_iter()
            .filter(|k| k.is_critical())
            .collect();
        if !blocking.is_empty() {
            warn!(?blocking, "estop reset refused");
            return Err(blocking);
        }
        // Clear the critical latches; non-critical conditions re-enter
        // through the normal degraded path.
        self.watchdog.reset(now_ns);
        self.active &= !ViolationFlags::critical();
        self.mode = if self.active.is_empty() {
            SafetyMode::Normal
        } else {
            SafetyMode::Degraded
        };
        info!("estop reset accepted");
        Ok(())
    }

    /// Emergency-stop history, oldest first.
    pub fn estop_history(&self) -> &[EstopRecord] {
        &self.history
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use terra_common::geometry::Vec3;
    use terra_common::types::obstacle::ObstacleKind;

    const MS: u64 = 1_000_000;

    fn cfg() -> SafetyConfig {
        let toml = r#"
obstacle_safe_distance_m = 3.0
human_safe_distance_m = 5.0
max_incline_deg = 20.0
hysteresis_duration_ms = 1000
"#;
        toml::from_str(toml).unwrap()
    }

    fn monitor() -> SafetyMonitor {
        SafetyMonitor::new(cfg(), 2_000, 2.0, Polygon::default(), 0)
    }

    fn pose_at(x: f64, y: f64) -> Pose {
        Pose {
            position: Vec3::planar(x, y),
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            position_uncertainty: 0.1,
            orientation_uncertainty: 0.01,
            timestamp_ns: 0,
        }
    }

    fn obstacle_at(x: f64, y: f64, kind: ObstacleKind) -> Obstacle {
        Obstacle {
            id: 1,
            position: Vec3::planar(x, y),
            size: 0.5,
            velocity: Vec3::ZERO,
            confidence: 0.9,
            kind,
            last_seen_ns: 0,
        }
    }

    /// Keep the watchdog quiet for monitor tests that are not about it.
    fn feed(m: &mut SafetyMonitor, now_ns: u64) {
        m.feed_watchdog(now_ns);
    }

    #[test]
    fn nominal_check_is_quiet() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        feed(&mut m, 0);
        let r = m.check(100 * MS);
        assert!(r.events.is_empty());
        assert!(r.estop.is_none());
        assert_eq!(m.mode(), SafetyMode::Normal);
    }

    #[test]
    fn human_proximity_forces_estop() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        m.on_obstacles(vec![obstacle_at(2.0, 0.0, ObstacleKind::Human)]);
        feed(&mut m, 0);
        let r = m.check(100 * MS);

        assert_eq!(m.mode(), SafetyMode::Estop);
        let estop = r.estop.expect("estop entered");
        assert_eq!(
            estop.reason,
            EstopReason::Violation(ViolationKind::HumanProximity)
        );
        assert!(r
            .events
            .iter()
            .any(|e| e.kind == ViolationKind::HumanProximity && e.active));
        // Obstacle proximity also fires at 1.5 m surface distance.
        assert!(m.status().violations.contains(&ViolationKind::ObstacleProximity));
    }

    #[test]
    fn non_critical_violation_degrades() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        m.on_obstacles(vec![obstacle_at(2.5, 0.0, ObstacleKind::Static)]);
        feed(&mut m, 0);
        m.check(100 * MS);
        assert_eq!(m.mode(), SafetyMode::Degraded);
        let status = m.status();
        assert_eq!(status.reduced_max_speed, Some(1.0)); // 2.0 × 0.5
        assert!(!status.estop_active);
    }

    #[test]
    fn violation_clears_only_after_hysteresis() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        m.on_obstacles(vec![obstacle_at(2.5, 0.0, ObstacleKind::Static)]);
        feed(&mut m, 0);
        m.check(100 * MS);
        assert_eq!(m.mode(), SafetyMode::Degraded);

        // Obstacle gone; condition false but hysteresis holds for 1 s.
        m.on_obstacles(vec![]);
        feed(&mut m, 200 * MS);
        let r = m.check(300 * MS);
        assert!(r.events.is_empty(), "no clear inside the hysteresis window");
        assert_eq!(m.mode(), SafetyMode::Degraded);

        feed(&mut m, 1_200 * MS);
        let r = m.check(1_400 * MS);
        assert!(r
            .events
            .iter()
            .any(|e| e.kind == ViolationKind::ObstacleProximity && !e.active));
        assert_eq!(m.mode(), SafetyMode::Normal);
    }

    #[test]
    fn condition_flapping_restarts_hysteresis() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        m.on_obstacles(vec![obstacle_at(2.5, 0.0, ObstacleKind::Static)]);
        feed(&mut m, 0);
        m.check(100 * MS);

        m.on_obstacles(vec![]);
        feed(&mut m, 150 * MS);
        m.check(200 * MS);
        // Condition returns before the window elapses.
        m.on_obstacles(vec![obstacle_at(2.5, 0.0, ObstacleKind::Static)]);
        feed(&mut m, 800 * MS);
        m.check(900 * MS);
        // Gone again: the window must restart, not resume.
        m.on_obstacles(vec![]);
        feed(&mut m, 1_000 * MS);
        let r = m.check(1_100 * MS);
        assert!(r.events.iter().all(|e| e.active || e.kind != ViolationKind::ObstacleProximity));
        assert_eq!(m.mode(), SafetyMode::Degraded);
    }

    #[test]
    fn watchdog_sequence_comm_loss_then_estop() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        feed(&mut m, 0);

        // 0.8 × 2000 ms = 1600 ms: communication loss.
        let r = m.check(1_700 * MS);
        assert!(r
            .events
            .iter()
            .any(|e| e.kind == ViolationKind::CommunicationLoss && e.active));
        assert_eq!(m.mode(), SafetyMode::Degraded);
        assert!(r.estop.is_none());

        // Past the full timeout: watchdog violation and ESTOP.
        let r = m.check(2_100 * MS);
        assert!(r
            .events
            .iter()
            .any(|e| e.kind == ViolationKind::WatchdogTimeout && e.active));
        let estop = r.estop.expect("watchdog expiry must estop");
        assert_eq!(
            estop.reason,
            EstopReason::Violation(ViolationKind::WatchdogTimeout)
        );
    }

    #[test]
    fn operator_estop_and_reset_cycle() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        feed(&mut m, 0);
        let rec = m
            .trigger_estop(EstopReason::Operator("test stop".into()), "link:operator", 100 * MS)
            .expect("first trigger transitions");
        assert_eq!(rec.source, "link:operator");
        assert_eq!(m.mode(), SafetyMode::Estop);
        // Second trigger is a no-op.
        assert!(m
            .trigger_estop(EstopReason::Operator("again".into()), "link:operator", 200 * MS)
            .is_none());

        feed(&mut m, 300 * MS);
        m.try_reset(300 * MS).expect("no critical violations remain");
        assert_eq!(m.mode(), SafetyMode::Normal);
    }

    #[test]
    fn reset_refused_while_critical_persists() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        m.on_obstacles(vec![obstacle_at(1.0, 0.0, ObstacleKind::Human)]);
        feed(&mut m, 0);
        m.check(100 * MS);
        assert_eq!(m.mode(), SafetyMode::Estop);

        feed(&mut m, 200 * MS);
        let blocked = m.try_reset(200 * MS).unwrap_err();
        assert!(blocked.contains(&ViolationKind::HumanProximity));
        assert_eq!(m.mode(), SafetyMode::Estop);

        // Human leaves; reset now succeeds.
        m.on_obstacles(vec![]);
        feed(&mut m, 300 * MS);
        m.check(400 * MS);
        feed(&mut m, 500 * MS);
        m.try_reset(500 * MS).expect("clear after human left");
        assert_ne!(m.mode(), SafetyMode::Estop);
    }

    #[test]
    fn battery_thresholds() {
        let mut m = monitor();
        m.on_pose(pose_at(0.0, 0.0));
        m.on_battery(15.0);
        feed(&mut m, 0);
        m.check(100 * MS);
        assert_eq!(m.mode(), SafetyMode::Degraded);

        m.on_battery(5.0);
        feed(&mut m, 200 * MS);
        let r = m.check(300 * MS);
        assert!(r.estop.is_some(), "critical battery must estop");
    }

    #[test]
    fn tilt_violation_is_critical() {
        let mut m = monitor();
        let mut p = pose_at(0.0, 0.0);
        p.roll = 0.3;
        p.pitch = 0.25; // tilt ≈ 22° > 20°
        m.on_pose(p);
        feed(&mut m, 0);
        let r = m.check(100 * MS);
        assert!(matches!(
            r.estop.map(|e| e.reason),
            Some(EstopReason::Violation(ViolationKind::TiltExceeded))
        ));
    }

    #[test]
    fn boundary_violation_outside_polygon() {
        let boundary = Polygon::new(vec![
            Vec3::planar(0.0, 0.0),
            Vec3::planar(10.0, 0.0),
            Vec3::planar(10.0, 10.0),
            Vec3::planar(0.0, 10.0),
        ]);
        let mut m = SafetyMonitor::new(cfg(), 2_000, 2.0, boundary, 0);
        m.on_pose(pose_at(15.0, 5.0));
        feed(&mut m, 0);
        m.check(100 * MS);
        assert!(m
            .status()
            .violations
            .contains(&ViolationKind::BoundaryViolation));
        assert_eq!(m.mode(), SafetyMode::Degraded);
    }

    #[test]
    fn limit_updates_bounds_checked() {
        let mut m = monitor();
        assert!(m
            .update_limits(&SafetyLimits {
                max_speed_mps: Some(1.5),
                ..SafetyLimits::default()
            })
            .is_ok());
        assert_eq!(m.status().reduced_max_speed, Some(1.5));

        assert!(m
            .update_limits(&SafetyLimits {
                max_speed_mps: Some(99.0),
                ..SafetyLimits::default()
            })
            .is_err());
    }

    #[test]
    fn estop_history_is_bounded() {
        let mut m = monitor();
        for i in 0..20u64 {
            m.trigger_estop(
                EstopReason::Operator(format!("stop {i}")),
                "test",
                i * 100 * MS,
            );
            m.try_reset(i * 100 * MS + 50 * MS).unwrap();
        }
        assert_eq!(m.estop_history().len(), ESTOP_HISTORY);
    }
}
