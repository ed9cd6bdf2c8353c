//! Configuration loading and validation.
//!
//! One TOML file (`terra.toml`) is loaded once at startup. Parsing is strict
//! (`deny_unknown_fields`), every numeric option is bounds-checked against
//! the named constants below, and defaults are supplied per field so a
//! minimal config stays short.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::geometry::{Polygon, Vec3};

/// Log level for configuration.
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for the tracing env-filter.
    pub const fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Unknown field in TOML (strict parsing with `deny_unknown_fields`).
    #[error("Unknown field: {0}")]
    UnknownField(String),
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::UnknownField` for unrecognised options
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(format!("{}: {}", path.display(), e))
            }
        })?;

        toml::from_str(&content).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("unknown field") {
                ConfigError::UnknownField(format!("{}: {}", path.display(), msg))
            } else {
                ConfigError::ParseError(format!("{}: {}", path.display(), msg))
            }
        })
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Numeric bounds constants ───────────────────────────────────────

/// Maximum configurable vehicle speed [m/s].
pub const MAX_SPEED_LIMIT: f64 = 10.0;
/// Maximum configurable acceleration [m/s²].
pub const MAX_ACCEL_LIMIT: f64 = 5.0;
/// Maximum configurable watchdog timeout [ms].
pub const MAX_WATCHDOG_TIMEOUT_MS: u64 = 60_000;
/// Minimum configurable watchdog timeout [ms].
pub const MIN_WATCHDOG_TIMEOUT_MS: u64 = 100;
/// Maximum safe-distance radius [m].
pub const MAX_SAFE_DISTANCE: f64 = 100.0;
/// Maximum incline limit [deg].
pub const MAX_INCLINE_LIMIT_DEG: f64 = 45.0;
/// Maximum planner grid resolution [m].
pub const MAX_GRID_RESOLUTION: f64 = 5.0;
/// Maximum command freshness window [ms].
pub const MAX_FRESHNESS_WINDOW_MS: u64 = 3_600_000;

// ─── [machine] ──────────────────────────────────────────────────────

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Machine identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    /// Machine display name.
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

// ─── [watchdog] ─────────────────────────────────────────────────────

fn default_watchdog_timeout_ms() -> u64 {
    2_000
}

/// Liveness watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Hard timeout; expiry is a critical violation [ms].
    #[serde(default = "default_watchdog_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_watchdog_timeout_ms(),
        }
    }
}

impl WatchdogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WATCHDOG_TIMEOUT_MS..=MAX_WATCHDOG_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.timeout_ms={} out of range [{MIN_WATCHDOG_TIMEOUT_MS}, {MAX_WATCHDOG_TIMEOUT_MS}]",
                self.timeout_ms
            )));
        }
        Ok(())
    }
}

// ─── [motion] ───────────────────────────────────────────────────────

fn default_min_speed() -> f64 {
    0.1
}
fn default_kp_speed() -> f64 {
    1.2
}
fn default_ki_speed() -> f64 {
    0.4
}
fn default_kd_speed() -> f64 {
    0.05
}
fn default_integral_limit() -> f64 {
    1.0
}
fn default_kp_steer() -> f64 {
    1.5
}
fn default_kff_curvature() -> f64 {
    0.3
}
fn default_steer_max_rad() -> f64 {
    0.6
}
fn default_slew_max_per_s() -> f64 {
    2.0
}
fn default_turn_slow_threshold_rad() -> f64 {
    0.2
}
fn default_turn_slow_max_reduction() -> f64 {
    0.7
}
fn default_terrain_rough_threshold() -> f64 {
    0.3
}
fn default_terrain_max_reduction() -> f64 {
    0.5
}
fn default_estop_stop_timeout_ms() -> u64 {
    500
}

/// Motion controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionConfig {
    /// Speed envelope [m/s].
    pub max_speed_mps: f64,
    /// Floor for the terrain/turn speed reductions [m/s].
    #[serde(default = "default_min_speed")]
    pub min_speed_mps: f64,
    /// Acceleration envelope [m/s²].
    pub max_accel_mps2: f64,
    /// Deceleration envelope [m/s²].
    pub max_decel_mps2: f64,
    /// Speed PID proportional gain.
    #[serde(default = "default_kp_speed")]
    pub kp_speed: f64,
    /// Speed PID integral gain (0 = disabled).
    #[serde(default = "default_ki_speed")]
    pub ki_speed: f64,
    /// Speed PID derivative gain (0 = disabled).
    #[serde(default = "default_kd_speed")]
    pub kd_speed: f64,
    /// Anti-windup clamp on the integral accumulator.
    #[serde(default = "default_integral_limit")]
    pub integral_limit: f64,
    /// Steering proportional gain on heading error.
    #[serde(default = "default_kp_steer")]
    pub kp_steer: f64,
    /// Steering feedforward gain on path curvature.
    #[serde(default = "default_kff_curvature")]
    pub kff_curvature: f64,
    /// Steering command clamp [rad].
    #[serde(default = "default_steer_max_rad")]
    pub steer_max_rad: f64,
    /// Maximum normalised wheel-speed change per second.
    #[serde(default = "default_slew_max_per_s")]
    pub slew_max_per_s: f64,
    /// Heading error above which turn slow-down begins [rad].
    #[serde(default = "default_turn_slow_threshold_rad")]
    pub turn_slow_threshold_rad: f64,
    /// Maximum fractional speed reduction in tight turns.
    #[serde(default = "default_turn_slow_max_reduction")]
    pub turn_slow_max_reduction: f64,
    /// Roughness estimate above which terrain slow-down begins.
    #[serde(default = "default_terrain_rough_threshold")]
    pub terrain_rough_threshold: f64,
    /// Maximum fractional speed reduction on rough terrain.
    #[serde(default = "default_terrain_max_reduction")]
    pub terrain_max_reduction: f64,
    /// All motors must reach zero target within this budget after ESTOP [ms].
    #[serde(default = "default_estop_stop_timeout_ms")]
    pub estop_stop_timeout_ms: u64,
}

impl MotionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_speed_mps <= 0.0 || self.max_speed_mps > MAX_SPEED_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "motion.max_speed_mps={} out of range (0, {MAX_SPEED_LIMIT}]",
                self.max_speed_mps
            )));
        }
        if self.min_speed_mps < 0.0 || self.min_speed_mps >= self.max_speed_mps {
            return Err(ConfigError::ValidationError(format!(
                "motion.min_speed_mps={} must be in [0, max_speed_mps)",
                self.min_speed_mps
            )));
        }
        for (name, v) in [
            ("max_accel_mps2", self.max_accel_mps2),
            ("max_decel_mps2", self.max_decel_mps2),
        ] {
            if v <= 0.0 || v > MAX_ACCEL_LIMIT {
                return Err(ConfigError::ValidationError(format!(
                    "motion.{name}={v} out of range (0, {MAX_ACCEL_LIMIT}]"
                )));
            }
        }
        for (name, v) in [
            ("kp_speed", self.kp_speed),
            ("ki_speed", self.ki_speed),
            ("kd_speed", self.kd_speed),
            ("kp_steer", self.kp_steer),
            ("kff_curvature", self.kff_curvature),
        ] {
            if !(0.0..=100.0).contains(&v) {
                return Err(ConfigError::ValidationError(format!(
                    "motion.{name}={v} out of range [0, 100]"
                )));
            }
        }
        for (name, v) in [
            ("turn_slow_max_reduction", self.turn_slow_max_reduction),
            ("terrain_max_reduction", self.terrain_max_reduction),
        ] {
            if !(0.0..1.0).contains(&v) {
                return Err(ConfigError::ValidationError(format!(
                    "motion.{name}={v} out of range [0, 1)"
                )));
            }
        }
        if self.slew_max_per_s <= 0.0 {
            return Err(ConfigError::ValidationError(
                "motion.slew_max_per_s must be > 0".to_string(),
            ));
        }
        if self.steer_max_rad <= 0.0 || self.steer_max_rad > std::f64::consts::FRAC_PI_2 {
            return Err(ConfigError::ValidationError(format!(
                "motion.steer_max_rad={} out of range (0, π/2]",
                self.steer_max_rad
            )));
        }
        Ok(())
    }
}

// ─── [safety] ───────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_battery_low_pct() -> f64 {
    20.0
}
fn default_battery_critical_pct() -> f64 {
    8.0
}
fn default_motor_critical_temp_c() -> f64 {
    85.0
}
fn default_motor_over_current_a() -> f64 {
    12.0
}
fn default_hysteresis_duration_ms() -> u64 {
    1_000
}
fn default_degraded_speed_factor() -> f64 {
    0.5
}

/// Safety monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Any obstacle inside this radius is a violation [m].
    pub obstacle_safe_distance_m: f64,
    /// Humans/animals inside this radius force ESTOP [m].
    pub human_safe_distance_m: f64,
    #[serde(default = "default_true")]
    pub boundary_enforcement_enabled: bool,
    #[serde(default = "default_battery_low_pct")]
    pub battery_low_pct: f64,
    #[serde(default = "default_battery_critical_pct")]
    pub battery_critical_pct: f64,
    /// Tilt limit [deg].
    pub max_incline_deg: f64,
    #[serde(default = "default_motor_critical_temp_c")]
    pub motor_critical_temp_c: f64,
    #[serde(default = "default_motor_over_current_a")]
    pub motor_over_current_a: f64,
    /// A violation's condition must stay false this long before clearing [ms].
    #[serde(default = "default_hysteresis_duration_ms")]
    pub hysteresis_duration_ms: u64,
    /// Max-speed multiplier while degraded.
    #[serde(default = "default_degraded_speed_factor")]
    pub degraded_speed_factor: f64,
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("obstacle_safe_distance_m", self.obstacle_safe_distance_m),
            ("human_safe_distance_m", self.human_safe_distance_m),
        ] {
            if v <= 0.0 || v > MAX_SAFE_DISTANCE {
                return Err(ConfigError::ValidationError(format!(
                    "safety.{name}={v} out of range (0, {MAX_SAFE_DISTANCE}]"
                )));
            }
        }
        if self.human_safe_distance_m < self.obstacle_safe_distance_m {
            return Err(ConfigError::ValidationError(
                "safety.human_safe_distance_m must be >= obstacle_safe_distance_m".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.battery_low_pct)
            || !(0.0..=100.0).contains(&self.battery_critical_pct)
        {
            return Err(ConfigError::ValidationError(
                "safety battery thresholds must be in [0, 100]".to_string(),
            ));
        }
        if self.battery_critical_pct >= self.battery_low_pct {
            return Err(ConfigError::ValidationError(
                "safety.battery_critical_pct must be < battery_low_pct".to_string(),
            ));
        }
        if self.max_incline_deg <= 0.0 || self.max_incline_deg > MAX_INCLINE_LIMIT_DEG {
            return Err(ConfigError::ValidationError(format!(
                "safety.max_incline_deg={} out of range (0, {MAX_INCLINE_LIMIT_DEG}]",
                self.max_incline_deg
            )));
        }
        if !(0.0..=1.0).contains(&self.degraded_speed_factor) {
            return Err(ConfigError::ValidationError(
                "safety.degraded_speed_factor must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── [localisation] ─────────────────────────────────────────────────

fn default_gps_quality_threshold() -> f64 {
    0.5
}
fn default_vo_improvement_factor() -> f64 {
    0.8
}
fn default_drift_rate() -> f64 {
    0.05
}
fn default_max_uncertainty() -> f64 {
    50.0
}
fn default_min_uncertainty() -> f64 {
    0.02
}
fn default_gyro_weight() -> f64 {
    0.98
}

/// Localisation filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalisationConfig {
    /// GPS drives absolute position strictly above this quality.
    #[serde(default = "default_gps_quality_threshold")]
    pub gps_quality_threshold: f64,
    /// Lower bound of the multiplicative uncertainty reduction from VO.
    #[serde(default = "default_vo_improvement_factor")]
    pub visual_odometry_improvement_factor: f64,
    /// Uncertainty growth while dead reckoning [m/s].
    #[serde(default = "default_drift_rate")]
    pub dead_reckoning_drift_mps: f64,
    /// Uncertainty ceiling (also the no-fix initial value) [m].
    #[serde(default = "default_max_uncertainty")]
    pub max_position_uncertainty_m: f64,
    /// Sensor-floor uncertainty no refinement can beat [m].
    #[serde(default = "default_min_uncertainty")]
    pub min_position_uncertainty_m: f64,
    /// Complementary filter weight on the gyro path.
    #[serde(default = "default_gyro_weight")]
    pub gyro_weight: f64,
}

impl Default for LocalisationConfig {
    fn default() -> Self {
        Self {
            gps_quality_threshold: default_gps_quality_threshold(),
            visual_odometry_improvement_factor: default_vo_improvement_factor(),
            dead_reckoning_drift_mps: default_drift_rate(),
            max_position_uncertainty_m: default_max_uncertainty(),
            min_position_uncertainty_m: default_min_uncertainty(),
            gyro_weight: default_gyro_weight(),
        }
    }
}

impl LocalisationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("gps_quality_threshold", self.gps_quality_threshold),
            (
                "visual_odometry_improvement_factor",
                self.visual_odometry_improvement_factor,
            ),
            ("gyro_weight", self.gyro_weight),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::ValidationError(format!(
                    "localisation.{name}={v} out of range [0, 1]"
                )));
            }
        }
        if self.dead_reckoning_drift_mps <= 0.0 {
            return Err(ConfigError::ValidationError(
                "localisation.dead_reckoning_drift_mps must be > 0".to_string(),
            ));
        }
        if self.min_position_uncertainty_m <= 0.0
            || self.min_position_uncertainty_m >= self.max_position_uncertainty_m
        {
            return Err(ConfigError::ValidationError(
                "localisation uncertainty floor must be in (0, ceiling)".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── [obstacles] ────────────────────────────────────────────────────

fn default_fusion_radius() -> f64 {
    1.0
}
fn default_association_radius() -> f64 {
    2.0
}
fn default_decay_rate() -> f64 {
    0.2
}
fn default_min_confidence() -> f64 {
    0.15
}
fn default_position_alpha() -> f64 {
    0.4
}

/// Obstacle map configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObstacleConfig {
    /// Concurrent detections closer than this merge into one [m].
    #[serde(default = "default_fusion_radius")]
    pub fusion_radius_m: f64,
    /// Nearest-neighbour association gate [m].
    #[serde(default = "default_association_radius")]
    pub association_radius_m: f64,
    /// Linear confidence decay while unmatched [1/s].
    #[serde(default = "default_decay_rate")]
    pub confidence_decay_rate_per_s: f64,
    /// Tracks below this confidence are dropped.
    #[serde(default = "default_min_confidence")]
    pub min_obstacle_confidence: f64,
    /// EMA weight of a new measurement on track position.
    #[serde(default = "default_position_alpha")]
    pub position_smoothing_alpha: f64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            fusion_radius_m: default_fusion_radius(),
            association_radius_m: default_association_radius(),
            confidence_decay_rate_per_s: default_decay_rate(),
            min_obstacle_confidence: default_min_confidence(),
            position_smoothing_alpha: default_position_alpha(),
        }
    }
}

impl ObstacleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fusion_radius_m <= 0.0 || self.association_radius_m <= 0.0 {
            return Err(ConfigError::ValidationError(
                "obstacles radii must be > 0".to_string(),
            ));
        }
        if self.confidence_decay_rate_per_s <= 0.0 {
            return Err(ConfigError::ValidationError(
                "obstacles.confidence_decay_rate_per_s must be > 0".to_string(),
            ));
        }
        for (name, v) in [
            ("min_obstacle_confidence", self.min_obstacle_confidence),
            ("position_smoothing_alpha", self.position_smoothing_alpha),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::ValidationError(format!(
                    "obstacles.{name}={v} out of range [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

// ─── [navigation] ───────────────────────────────────────────────────

fn default_waypoint_threshold() -> f64 {
    0.5
}
fn default_corridor_width() -> f64 {
    2.0
}
fn default_grid_resolution() -> f64 {
    0.5
}
fn default_safety_margin() -> f64 {
    0.5
}

/// Path planner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationConfig {
    /// Distance at which a waypoint counts as reached [m].
    #[serde(default = "default_waypoint_threshold")]
    pub waypoint_reached_threshold_m: f64,
    /// Full corridor width for clearance checks [m].
    #[serde(default = "default_corridor_width")]
    pub safety_corridor_width_m: f64,
    /// Planner grid cell size [m].
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution_m: f64,
    /// Obstacle inflation margin for path validation [m].
    #[serde(default = "default_safety_margin")]
    pub safety_margin_m: f64,
    /// Field polygon vertices `[x, y]`; may be replaced at runtime by
    /// `set_boundaries`.
    #[serde(default)]
    pub field_boundary: Vec<[f64; 2]>,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            waypoint_reached_threshold_m: default_waypoint_threshold(),
            safety_corridor_width_m: default_corridor_width(),
            grid_resolution_m: default_grid_resolution(),
            safety_margin_m: default_safety_margin(),
            field_boundary: Vec::new(),
        }
    }
}

impl NavigationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waypoint_reached_threshold_m <= 0.0 {
            return Err(ConfigError::ValidationError(
                "navigation.waypoint_reached_threshold_m must be > 0".to_string(),
            ));
        }
        if self.safety_corridor_width_m <= 0.0 {
            return Err(ConfigError::ValidationError(
                "navigation.safety_corridor_width_m must be > 0".to_string(),
            ));
        }
        if self.grid_resolution_m <= 0.0 || self.grid_resolution_m > MAX_GRID_RESOLUTION {
            return Err(ConfigError::ValidationError(format!(
                "navigation.grid_resolution_m={} out of range (0, {MAX_GRID_RESOLUTION}]",
                self.grid_resolution_m
            )));
        }
        if self.safety_margin_m < 0.0 {
            return Err(ConfigError::ValidationError(
                "navigation.safety_margin_m must be >= 0".to_string(),
            ));
        }
        if !self.field_boundary.is_empty() && self.field_boundary.len() < 3 {
            return Err(ConfigError::ValidationError(
                "navigation.field_boundary needs at least 3 vertices".to_string(),
            ));
        }
        Ok(())
    }

    /// Field polygon from the configured vertex list.
    pub fn boundary_polygon(&self) -> Polygon {
        Polygon::new(
            self.field_boundary
                .iter()
                .map(|[x, y]| Vec3::planar(*x, *y))
                .collect(),
        )
    }
}

// ─── [implements] ───────────────────────────────────────────────────

fn default_blade_accel() -> f64 {
    0.4
}
fn default_blade_decel() -> f64 {
    0.25
}
fn default_cutter_engage_max_speed() -> f64 {
    0.5
}

/// Implement coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImplementsConfig {
    /// Blade spin-up rate [fraction of full speed per second].
    #[serde(default = "default_blade_accel")]
    pub blade_accel_per_s: f64,
    /// Blade deceleration rate during shutdown [fraction per second].
    #[serde(default = "default_blade_decel")]
    pub blade_decel_per_s: f64,
    /// Cutter engagement is gated below this ground speed [m/s].
    #[serde(default = "default_cutter_engage_max_speed")]
    pub cutter_engage_max_speed_mps: f64,
}

impl Default for ImplementsConfig {
    fn default() -> Self {
        Self {
            blade_accel_per_s: default_blade_accel(),
            blade_decel_per_s: default_blade_decel(),
            cutter_engage_max_speed_mps: default_cutter_engage_max_speed(),
        }
    }
}

impl ImplementsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blade_accel_per_s <= 0.0 || self.blade_decel_per_s <= 0.0 {
            return Err(ConfigError::ValidationError(
                "implements blade rates must be > 0".to_string(),
            ));
        }
        if self.cutter_engage_max_speed_mps < 0.0 {
            return Err(ConfigError::ValidationError(
                "implements.cutter_engage_max_speed_mps must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── [link] ─────────────────────────────────────────────────────────

fn default_bind_addr() -> String {
    "127.0.0.1:7700".to_string()
}
fn default_freshness_window_ms() -> u64 {
    300_000
}
fn default_session_ttl_ms() -> u64 {
    3_600_000
}
fn default_offline_queue_ttl_s() -> u64 {
    604_800
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_telemetry_interval_ms() -> u64 {
    1_000
}

/// Command channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Envelope freshness window (also the replay window) [ms].
    #[serde(default = "default_freshness_window_ms")]
    pub command_freshness_window_ms: u64,
    /// Session lifetime [ms].
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    /// Offline queue entry lifetime [s].
    #[serde(default = "default_offline_queue_ttl_s")]
    pub offline_queue_ttl_s: u64,
    /// Whether a disconnected client may queue non-critical commands.
    #[serde(default = "default_true")]
    pub offline_operation_enabled: bool,
    /// Bounded-backoff reconnect budget.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Telemetry push cadence [ms].
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
    /// Server certificate file (JSON attestation document).
    #[serde(default)]
    pub server_cert_path: Option<String>,
    /// CA attestation key file (hex).
    #[serde(default)]
    pub ca_key_path: Option<String>,
    /// Directory of trusted client certificates keyed by CN.
    #[serde(default)]
    pub trusted_clients_dir: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            command_freshness_window_ms: default_freshness_window_ms(),
            session_ttl_ms: default_session_ttl_ms(),
            offline_queue_ttl_s: default_offline_queue_ttl_s(),
            offline_operation_enabled: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            server_cert_path: None,
            ca_key_path: None,
            trusted_clients_dir: None,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_freshness_window_ms == 0
            || self.command_freshness_window_ms > MAX_FRESHNESS_WINDOW_MS
        {
            return Err(ConfigError::ValidationError(format!(
                "link.command_freshness_window_ms={} out of range (0, {MAX_FRESHNESS_WINDOW_MS}]",
                self.command_freshness_window_ms
            )));
        }
        if self.session_ttl_ms == 0 {
            return Err(ConfigError::ValidationError(
                "link.session_ttl_ms must be > 0".to_string(),
            ));
        }
        if self.telemetry_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "link.telemetry_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── [operation] ────────────────────────────────────────────────────

fn default_cancel_budget_ms() -> u64 {
    1_000
}
fn default_work_speed() -> f64 {
    0.8
}

/// Operation coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationConfig {
    /// Everything must wind down within this budget on cancel [ms].
    #[serde(default = "default_cancel_budget_ms")]
    pub cancel_budget_ms: u64,
    /// Target ground speed while working a segment [m/s].
    #[serde(default = "default_work_speed")]
    pub work_speed_mps: f64,
    /// Unload point `[x, y]`, if the field has one.
    #[serde(default)]
    pub unload_point: Option<[f64; 2]>,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            cancel_budget_ms: default_cancel_budget_ms(),
            work_speed_mps: default_work_speed(),
            unload_point: None,
        }
    }
}

impl OperationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cancel_budget_ms == 0 {
            return Err(ConfigError::ValidationError(
                "operation.cancel_budget_ms must be > 0".to_string(),
            ));
        }
        if self.work_speed_mps <= 0.0 {
            return Err(ConfigError::ValidationError(
                "operation.work_speed_mps must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── [monitoring] ───────────────────────────────────────────────────

fn default_metrics_interval_ms() -> u64 {
    5_000
}

/// Monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: default_metrics_interval_ms(),
        }
    }
}

// ─── TerraConfig ────────────────────────────────────────────────────

/// Top-level configuration — loaded once from `terra.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerraConfig {
    pub machine: MachineConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    pub motion: MotionConfig,
    pub safety: SafetyConfig,
    #[serde(default)]
    pub localisation: LocalisationConfig,
    #[serde(default)]
    pub obstacles: ObstacleConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub implements: ImplementsConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub operation: OperationConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl TerraConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "machine.name cannot be empty".to_string(),
            ));
        }
        self.watchdog.validate()?;
        self.motion.validate()?;
        self.safety.validate()?;
        self.localisation.validate()?;
        self.obstacles.validate()?;
        self.navigation.validate()?;
        self.implements.validate()?;
        self.link.validate()?;
        self.operation.validate()?;
        Ok(())
    }

    /// Load and validate from a TOML file.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Self::load(path)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[machine]
name = "terra-test"

[motion]
max_speed_mps = 2.0
max_accel_mps2 = 1.0
max_decel_mps2 = 2.0

[safety]
obstacle_safe_distance_m = 3.0
human_safe_distance_m = 5.0
max_incline_deg = 20.0
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let f = write_config(MINIMAL);
        let cfg = TerraConfig::load_validated(f.path()).unwrap();
        assert_eq!(cfg.machine.name, "terra-test");
        assert_eq!(cfg.machine.log_level, LogLevel::Info);
        assert_eq!(cfg.watchdog.timeout_ms, 2_000);
        assert_eq!(cfg.link.command_freshness_window_ms, 300_000);
        assert_eq!(cfg.obstacles.fusion_radius_m, 1.0);
        assert!(cfg.link.offline_operation_enabled);
    }

    #[test]
    fn file_not_found() {
        let result = TerraConfig::load(Path::new("/nonexistent/terra.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn unknown_field_rejected() {
        let f = write_config(&format!("{MINIMAL}\n[machine2]\nx = 1\n"));
        let result = TerraConfig::load(f.path());
        assert!(matches!(result, Err(ConfigError::UnknownField(_))));
    }

    #[test]
    fn battery_threshold_ordering_enforced() {
        let bad = MINIMAL.replace(
            "max_incline_deg = 20.0",
            "max_incline_deg = 20.0\nbattery_low_pct = 5.0\nbattery_critical_pct = 10.0",
        );
        let f = write_config(&bad);
        let result = TerraConfig::load_validated(f.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn speed_out_of_bounds_rejected() {
        let bad = MINIMAL.replace("max_speed_mps = 2.0", "max_speed_mps = 50.0");
        let f = write_config(&bad);
        assert!(matches!(
            TerraConfig::load_validated(f.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn human_distance_must_dominate() {
        let bad = MINIMAL.replace("human_safe_distance_m = 5.0", "human_safe_distance_m = 1.0");
        let f = write_config(&bad);
        assert!(matches!(
            TerraConfig::load_validated(f.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn boundary_polygon_round_trip() {
        let with_boundary = format!(
            "{MINIMAL}\n[navigation]\nfield_boundary = [[0.0, 0.0], [100.0, 0.0], [100.0, 50.0], [0.0, 50.0]]\n"
        );
        let f = write_config(&with_boundary);
        let cfg = TerraConfig::load_validated(f.path()).unwrap();
        let poly = cfg.navigation.boundary_polygon();
        assert!(poly.contains(crate::geometry::Vec3::planar(50.0, 25.0)));
        assert!(!poly.contains(crate::geometry::Vec3::planar(150.0, 25.0)));
    }

    #[test]
    fn two_vertex_boundary_rejected() {
        let bad = format!("{MINIMAL}\n[navigation]\nfield_boundary = [[0.0, 0.0], [1.0, 1.0]]\n");
        let f = write_config(&bad);
        assert!(matches!(
            TerraConfig::load_validated(f.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
