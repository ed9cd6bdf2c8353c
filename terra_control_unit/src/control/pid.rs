//! Speed PID with clamped anti-windup integral.
//!
//! Zero Ki disables integral; zero Kd disables derivative.

/// Internal state of the speed PID.
///
/// Preserves the integral accumulator and previous error across cycles.
/// Must be reset on mode change or emergency stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidState {
    /// Integral accumulator.
    integral: f64,
    /// Previous speed error (for derivative).
    prev_error: f64,
}

impl PidState {
    /// Reset all internal state to zero.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current integral accumulator (diagnostics and tests).
    #[inline]
    pub const fn integral(&self) -> f64 {
        self.integral
    }
}

/// PID gains for the speed loop.
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain (0 = disabled).
    pub ki: f64,
    /// Derivative gain (0 = disabled).
    pub kd: f64,
    /// Anti-windup clamp on the integral accumulator.
    pub integral_limit: f64,
    /// Acceleration command clamp, positive side [m/s²].
    pub accel_max: f64,
    /// Acceleration command clamp, negative side [m/s²].
    pub decel_max: f64,
}

/// Compute one PID cycle.
///
/// # Arguments
/// - `state`: Mutable PID internal state.
/// - `gains`: PID gains.
/// - `error`: Current speed error (target − actual) [m/s].
/// - `dt`: Cycle period [s].
///
/// # Returns
/// Acceleration command, clamped to `[-decel_max, accel_max]` [m/s²].
#[inline]
pub fn pid_compute(state: &mut PidState, gains: &PidGains, error: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }

    let p_term = gains.kp * error;

    let i_term = if gains.ki != 0.0 {
        // Anti-windup: the accumulator itself is clamped, so a long
        // saturation phase cannot build up unbounded correction.
        state.integral =
            (state.integral + error * dt).clamp(-gains.integral_limit, gains.integral_limit);
        gains.ki * state.integral
    } else {
        state.integral = 0.0;
        0.0
    };

    let d_term = if gains.kd != 0.0 {
        gains.kd * (error - state.prev_error) / dt
    } else {
        0.0
    };
    state.prev_error = error;

    (p_term + i_term + d_term).clamp(-gains.decel_max, gains.accel_max)
}

// ─── Tests ──────────────────────────────────────────────────────────
