//! Individual implement models: cutter, loader, transport lock.

use terra_common::config::ImplementsConfig;
use terra_common::types::status::{CutterStatus, LoaderStatus};

/// Blade speed considered "at speed".
const BLADE_AT_SPEED: f64 = 0.95;
/// Blade speed considered stopped.
const BLADE_STOPPED: f64 = 0.01;
/// Hopper fill rate while cutting and loading [fraction/s].
const FILL_RATE: f64 = 0.01;
/// Hopper drain rate while unloading [fraction/s].
const DRAIN_RATE: f64 = 0.1;

/// The cutter: a blade that ramps between 0 and full speed.
#[derive(Debug)]
pub struct Cutter {
    engaged: bool,
    blade_speed: f64,
    accel_per_s: f64,
    decel_per_s: f64,
    engage_max_speed_mps: f64,
}

impl Cutter {
    pub fn new(cfg: &ImplementsConfig) -> Self {
        Self {
            engaged: false,
            blade_speed: 0.0,
            accel_per_s: cfg.blade_accel_per_s,
            decel_per_s: cfg.blade_decel_per_s,
            engage_max_speed_mps: cfg.cutter_engage_max_speed_mps,
        }
    }

    /// Engagement predicate: vehicle slow enough and blades clear (stopped).
    pub fn safe_to_engage(&self, vehicle_speed_mps: f64) -> bool {
        vehicle_speed_mps <= self.engage_max_speed_mps && self.is_stopped()
    }

    /// Request blade start; refused unless the predicate holds.
    pub fn request_start(&mut self, vehicle_speed_mps: f64) -> bool {
        if self.engaged {
            return true;
        }
        if !self.safe_to_engage(vehicle_speed_mps) {
            return false;
        }
        self.engaged = true;
        true
    }

    pub fn request_stop(&mut self) {
        self.engaged = false;
    }

    /// Immediate disable (emergency path): no ramp.
    pub fn force_stop(&mut self) {
        self.engaged = false;
        self.blade_speed = 0.0;
    }

    /// Ramp the blade toward its commanded state.
    pub fn tick(&mut self, dt: f64) {
        if self.engaged {
            self.blade_speed = (self.blade_speed + self.accel_per_s * dt).min(1.0);
        } else {
            self.blade_speed = (self.blade_speed - self.decel_per_s * dt).max(0.0);
        }
    }

    pub fn is_at_speed(&self) -> bool {
        self.blade_speed >= BLADE_AT_SPEED
    }

    pub fn is_stopped(&self) -> bool {
        self.blade_speed <= BLADE_STOPPED
    }

    pub fn status(&self) -> CutterStatus {
        CutterStatus {
            engaged: self.engaged,
            blade_speed: self.blade_speed,
        }
    }
}

/// The loader: collects cut material into the hopper.
#[derive(Debug, Default)]
pub struct Loader {
    running: bool,
    fill_level: f64,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_stopped(&self) -> bool {
        !self.running
    }

    pub fn fill_level(&self) -> f64 {
        self.fill_level
    }

    /// Accumulate while running behind a spinning cutter.
    pub fn tick_collect(&mut self, dt: f64, cutting: bool) {
        if self.running && cutting {
            self.fill_level = (self.fill_level + FILL_RATE * dt).min(1.0);
        }
    }

    /// Drain the hopper; returns true once empty.
    pub fn tick_unload(&mut self, dt: f64) -> bool {
        self.fill_level = (self.fill_level - DRAIN_RATE * dt).max(0.0);
        self.fill_level <= f64::EPSILON
    }

    pub fn status(&self) -> LoaderStatus {
        LoaderStatus {
            running: self.running,
            fill_level: self.fill_level,
        }
    }
}

/// The transport lock securing cargo.
#[derive(Debug, Default)]
pub struct TransportLock {
    engaged: bool,
}

impl TransportLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&mut self) {
        self.engaged = true;
    }

    pub fn release(&mut self) {
        self.engaged = false;
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }
}
