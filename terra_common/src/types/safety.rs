//! Safety state: violations, modes, emergency-stop records.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// One kind of safety violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ObstacleProximity,
    HumanProximity,
    BoundaryViolation,
    MotorOverheat,
    MotorOvercurrent,
    BatteryLow,
    BatteryCritical,
    TiltExceeded,
    CommunicationLoss,
    WatchdogTimeout,
}

impl ViolationKind {
    /// Every kind, in flag-bit order.
    pub const ALL: [ViolationKind; 10] = [
        ViolationKind::ObstacleProximity,
        ViolationKind::HumanProximity,
        ViolationKind::BoundaryViolation,
        ViolationKind::MotorOverheat,
        ViolationKind::MotorOvercurrent,
        ViolationKind::BatteryLow,
        ViolationKind::BatteryCritical,
        ViolationKind::TiltExceeded,
        ViolationKind::CommunicationLoss,
        ViolationKind::WatchdogTimeout,
    ];

    /// Critical kinds force an immediate emergency stop.
    #[inline]
    pub const fn is_critical(&self) -> bool {
        matches!(
            self,
            ViolationKind::HumanProximity
                | ViolationKind::TiltExceeded
                | ViolationKind::WatchdogTimeout
                | ViolationKind::BatteryCritical
        )
    }

    /// Corresponding bit in [`ViolationFlags`].
    pub const fn flag(&self) -> ViolationFlags {
        match self {
            ViolationKind::ObstacleProximity => ViolationFlags::OBSTACLE_PROXIMITY,
            ViolationKind::HumanProximity => ViolationFlags::HUMAN_PROXIMITY,
            ViolationKind::BoundaryViolation => ViolationFlags::BOUNDARY_VIOLATION,
            ViolationKind::MotorOverheat => ViolationFlags::MOTOR_OVERHEAT,
            ViolationKind::MotorOvercurrent => ViolationFlags::MOTOR_OVERCURRENT,
            ViolationKind::BatteryLow => ViolationFlags::BATTERY_LOW,
            ViolationKind::BatteryCritical => ViolationFlags::BATTERY_CRITICAL,
            ViolationKind::TiltExceeded => ViolationFlags::TILT_EXCEEDED,
            ViolationKind::CommunicationLoss => ViolationFlags::COMMUNICATION_LOSS,
            ViolationKind::WatchdogTimeout => ViolationFlags::WATCHDOG_TIMEOUT,
        }
    }

    /// Stable snake_case label used in logs and telemetry.
    pub const fn label(&self) -> &'static str {
        match self {
            ViolationKind::ObstacleProximity => "obstacle_proximity",
            ViolationKind::HumanProximity => "human_proximity",
            ViolationKind::BoundaryViolation => "boundary_violation",
            ViolationKind::MotorOverheat => "motor_overheat",
            ViolationKind::MotorOvercurrent => "motor_overcurrent",
            ViolationKind::BatteryLow => "battery_low",
            ViolationKind::BatteryCritical => "battery_critical",
            ViolationKind::TiltExceeded => "tilt_exceeded",
            ViolationKind::CommunicationLoss => "communication_loss",
            ViolationKind::WatchdogTimeout => "watchdog_timeout",
        }
    }
}

bitflags! {
    /// Active violation set, one bit per [`ViolationKind`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ViolationFlags: u16 {
        const OBSTACLE_PROXIMITY = 1 << 0;
        const HUMAN_PROXIMITY    = 1 << 1;
        const BOUNDARY_VIOLATION = 1 << 2;
        const MOTOR_OVERHEAT     = 1 << 3;
        const MOTOR_OVERCURRENT  = 1 << 4;
        const BATTERY_LOW        = 1 << 5;
        const BATTERY_CRITICAL   = 1 << 6;
        const TILT_EXCEEDED      = 1 << 7;
        const COMMUNICATION_LOSS = 1 << 8;
        const WATCHDOG_TIMEOUT   = 1 << 9;
    }
}

impl ViolationFlags {
    /// All bits whose kind is critical.
    pub fn critical() -> ViolationFlags {
        ViolationKind::ALL
            .iter()
            .filter(|k| k.is_critical())
            .fold(ViolationFlags::empty(), |acc, k| acc | k.flag())
    }

    /// Whether any critical violation is present.
    #[inline]
    pub fn any_critical(&self) -> bool {
        self.intersects(Self::critical())
    }

    /// Expand to the kinds that are set, in canonical order.
    pub fn kinds(&self) -> Vec<ViolationKind> {
        ViolationKind::ALL
            .iter()
            .copied()
            .filter(|k| self.contains(k.flag()))
            .collect()
    }
}

/// Safety monitor operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// No violations; full envelope available.
    Normal,
    /// Non-critical violation present; reduced speed envelope.
    Degraded,
    /// Emergency stop; motors zeroed, implements disabled.
    Estop,
}

/// Why an emergency stop was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstopReason {
    /// A critical violation fired.
    Violation(ViolationKind),
    /// Explicit operator command with free-text reason.
    Operator(String),
}

impl EstopReason {
    /// Stable label for telemetry (`human_proximity`, `operator`, …).
    pub fn label(&self) -> &str {
        match self {
            EstopReason::Violation(kind) => kind.label(),
            EstopReason::Operator(_) => "operator",
        }
    }
}

/// Record of one emergency-stop activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstopRecord {
    /// Monotonic timestamp of activation [ns].
    pub when_ns: u64,
    pub reason: EstopReason,
    /// Originating subsystem or client identifier.
    pub source: String,
}

/// Event published on `safety.violation` / `safety.violation.cleared`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    /// True on activation, false on (hysteresis-cleared) deactivation.
    pub active: bool,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

/// Canonical safety state snapshot, owned by the safety monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub mode: SafetyMode,
    pub estop_active: bool,
    /// Active violations in canonical order.
    pub violations: Vec<ViolationKind>,
    pub last_estop: Option<EstopRecord>,
    /// Monotonic timestamp of the last check loop [ns].
    pub last_check_ns: u64,
    /// Reduced speed ceiling while degraded [m/s].
    pub reduced_max_speed: Option<f64>,
}

impl SafetyStatus {
    pub fn nominal(timestamp_ns: u64) -> Self {
        Self {
            mode: SafetyMode::Normal,
            estop_active: false,
            violations: Vec::new(),
            last_estop: None,
            last_check_ns: timestamp_ns,
            reduced_max_speed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_mapping_is_bijective() {
        let mut seen = ViolationFlags::empty();
        for kind in ViolationKind::ALL {
            let f = kind.flag();
            assert!(!seen.intersects(f), "duplicate flag for {kind:?}");
            seen |= f;
        }
        assert_eq!(seen, ViolationFlags::all());
    }

    #[test]
    fn critical_set_matches_kinds() {
        let crit = ViolationFlags::critical();
        assert!(crit.contains(ViolationFlags::HUMAN_PROXIMITY));
        assert!(crit.contains(ViolationFlags::TILT_EXCEEDED));
        assert!(crit.contains(ViolationFlags::WATCHDOG_TIMEOUT));
        assert!(crit.contains(ViolationFlags::BATTERY_CRITICAL));
        assert!(!crit.contains(ViolationFlags::OBSTACLE_PROXIMITY));
        assert!(!crit.contains(ViolationFlags::COMMUNICATION_LOSS));
    }

    #[test]
    fn kinds_round_trip() {
        let flags = ViolationFlags::BATTERY_LOW | ViolationFlags::TILT_EXCEEDED;
        let kinds = flags.kinds();
        assert_eq!(kinds, vec![ViolationKind::BatteryLow, ViolationKind::TiltExceeded]);
    }

    #[test]
    fn estop_reason_labels() {
        assert_eq!(
            EstopReason::Violation(ViolationKind::HumanProximity).label(),
            "human_proximity"
        );
        assert_eq!(EstopReason::Operator("test".into()).label(), "operator");
    }
}
