//! Motor bus endpoint.
//!
//! The only consumer of `motor.command`. Wheel motors approach their
//! setpoints with a bounded per-tick slew, the electrical/thermal response
//! is modelled per wheel, and the aggregate snapshot is published on
//! `motor.status.updated` every tick.

use terra_common::config::TerraConfig;
#[cfg(test)]
use terra_common::consts::NUM_WHEELS;
use terra_common::types::motor::{MotorCommand, MotorHealth, MotorStatus};

use crate::drivers::simulation::SimWorld;

/// Wheel track width for the skid-steer yaw model [m].
const TRACK_WIDTH_M: f64 = 1.2;
/// Ambient temperature the windings cool toward [°C].
const AMBIENT_C: f64 = 20.0;
/// Idle current draw per motor [A].
const IDLE_CURRENT_A: f64 = 0.4;
/// Current per unit normalised speed [A].
const LOAD_CURRENT_A: f64 = 9.0;

/// Motor bus endpoint state.
pub struct MotorEndpoint {
    status: MotorStatus,
    /// Maximum normalised speed change per second.
    slew_max_per_s: f64,
    /// Vehicle speed at normalised wheel speed 1.0 [m/s].
    max_speed_mps: f64,
    critical_temp_c: f64,
    over_current_a: f64,
    /// Ground truth to integrate against (simulation backend only).
    world: Option<SimWorld>,
}

impl MotorEndpoint {
    pub fn new(config: &TerraConfig, world: Option<SimWorld>) -> Self {
        Self {
            status: MotorStatus::idle(0),
            slew_max_per_s: config.motion.slew_max_per_s,
            max_speed_mps: config.motion.max_speed_mps,
            critical_temp_c: config.safety.motor_critical_temp_c,
            over_current_a: config.safety.motor_over_current_a,
            world,
        }
    }

    /// Latest snapshot.
    pub fn status(&self) -> &MotorStatus {
        &self.status
    }

    /// Accept new setpoints; each is clamped to `[0, 1]` on ingress.
    pub fn apply_command(&mut self, cmd: &MotorCommand) {
        for (motor, setpoint) in self.status.motors.iter_mut().zip(cmd.setpoints) {
            motor.target_speed = setpoint.clamp(0.0, 1.0);
        }
    }

    /// Advance all motors by `dt` seconds and return the new snapshot.
    pub fn tick(&mut self, dt: f64, now_ns: u64) -> MotorStatus {
        let max_step = self.slew_max_per_s * dt;
        for motor in &mut self.status.motors {
            let delta = (motor.target_speed - motor.current_speed).clamp(-max_step, max_step);
            motor.current_speed = (motor.current_speed + delta).clamp(0.0, 1.0);

            motor.current_amps = IDLE_CURRENT_A + LOAD_CURRENT_A * motor.current_speed;
            // First-order thermal response: load heating against ambient cooling.
            let heating = 0.6 * motor.current_amps * motor.current_speed;
            let cooling = 0.05 * (motor.temperature_c - AMBIENT_C);
            motor.temperature_c += (heating - cooling) * dt;

            motor.health = if motor.temperature_c > self.critical_temp_c
                || motor.current_amps > self.over_current_a
            {
                MotorHealth::Critical
            } else if motor.temperature_c > 0.9 * self.critical_temp_c
                || motor.current_amps > 0.9 * self.over_current_a
            {
                MotorHealth::Warning
            } else {
                MotorHealth::Good
            };
        }
        self.status.timestamp_ns = now_ns;

        if let Some(world) = &self.world {
            let m = &self.status.motors;
            let left = (m[0].current_speed + m[2].current_speed) / 2.0;
            let right = (m[1].current_speed + m[3].current_speed) / 2.0;
            let speed = (left + right) / 2.0 * self.max_speed_mps;
            let yaw_rate = (right - left) * self.max_speed_mps / TRACK_WIDTH_M;
            world.integrate(speed, yaw_rate, dt);
        }

        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> TerraConfig {
        // Build through TOML so defaults apply exactly as in production.
        let toml = r#"
[machine]
name = "test"

[motion]
max_speed_mps = 2.0
max_accel_mps2 = 1.0
max_decel_mps2 = 2.0
slew_max_per_s = 2.0

[safety]
obstacle_safe_distance_m = 3.0
human_safe_distance_m = 5.0
max_incline_deg = 20.0
"#;
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn slew_bounds_per_tick_change() {
        let cfg = test_config();
        let mut ep = MotorEndpoint::new(&cfg, None);
        ep.apply_command(&MotorCommand {
            setpoints: [1.0; NUM_WHEELS],
            timestamp_ns: 0,
        });

        let before = ep.status().motors[0].current_speed;
        let st = ep.tick(0.02, 1);
        let step = st.motors[0].current_speed - before;
        // slew_max_per_s = 2.0 → max 0.04 per 20 ms tick.
        assert!(step > 0.0);
        assert!(step <= 2.0 * 0.02 + 1e-12);
    }

    #[test]
    fn setpoints_clamped_on_ingress() {
        let cfg = test_config();
        let mut ep = MotorEndpoint::new(&cfg, None);
        ep.apply_command(&MotorCommand {
            setpoints: [3.0, -1.0, 0.5, 0.5],
            timestamp_ns: 0,
        });
        assert_eq!(ep.status().motors[0].target_speed, 1.0);
        assert_eq!(ep.status().motors[1].target_speed, 0.0);
    }

    #[test]
    fn all_wheels_reach_zero_within_estop_budget() {
        let cfg = test_config();
        let mut ep = MotorEndpoint::new(&cfg, None);
        // Spin up to half speed.
        ep.apply_command(&MotorCommand {
            setpoints: [0.5; NUM_WHEELS],
            timestamp_ns: 0,
        });
        for _ in 0..50 {
            ep.tick(0.02, 1);
        }
        // Emergency stop: zero targets. With slew 2.0/s a 0.5 drop takes
        // 250 ms, well inside the 500 ms budget.
        ep.apply_command(&MotorCommand::stop(2));
        let ticks = (cfg.motion.estop_stop_timeout_ms as f64 / 20.0) as usize;
        for _ in 0..ticks {
            ep.tick(0.02, 3);
        }
        for motor in ep.status().motors {
            assert!(motor.current_speed.abs() < 1e-9);
            assert_eq!(motor.target_speed, 0.0);
        }
    }

    #[test]
    fn sustained_load_heats_motors() {
        let cfg = test_config();
        let mut ep = MotorEndpoint::new(&cfg, None);
        ep.apply_command(&MotorCommand {
            setpoints: [1.0; NUM_WHEELS],
            timestamp_ns: 0,
        });
        for _ in 0..5_000 {
            ep.tick(0.02, 1);
        }
        assert!(ep.status().motors[0].temperature_c > AMBIENT_C + 10.0);
    }

    #[test]
    fn differential_speeds_turn_the_world() {
        let cfg = test_config();
        let world = SimWorld::new();
        let mut ep = MotorEndpoint::new(&cfg, Some(world.clone()));
        // Right pair slower → clockwise (negative) yaw.
        ep.apply_command(&MotorCommand {
            setpoints: [0.8, 0.4, 0.8, 0.4],
            timestamp_ns: 0,
        });
        for _ in 0..100 {
            ep.tick(0.02, 1);
        }
        assert!(world.with(|s| s.heading) < 0.0);
    }
}
