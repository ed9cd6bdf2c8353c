//! Phase state machine over the implement set.

use tracing::{info, warn};

use terra_common::config::ImplementsConfig;
use terra_common::types::operation::{OperationKind, OperationPhase};
use terra_common::types::status::ImplementsStatus;

use crate::units::{Cutter, Loader, TransportLock};

/// External event that can move the phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Operation coordinator starts an operation of the given kind.
    StartOperation(OperationKind),
    /// Path executor reached a wait point.
    AtWaitPoint,
    /// Path executor reached the unload point.
    AtUnloadPoint,
    /// Work at the current hold point is done; resume the active phase.
    ResumeWork,
    /// Operation coordinator ends the operation (also on path complete).
    StopOperation,
}

/// Result of a phase transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition accepted — new phase.
    Ok(OperationPhase),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

/// Coordinates cutter, loader and transport lock across phases.
pub struct ImplementCoordinator {
    phase: OperationPhase,
    kind: Option<OperationKind>,
    cutter: Cutter,
    loader: Loader,
    transport: TransportLock,
    /// Latest vehicle ground speed, for the engagement gate [m/s].
    vehicle_speed_mps: f64,
}

impl ImplementCoordinator {
    pub fn new(cfg: &ImplementsConfig) -> Self {
        Self {
            phase: OperationPhase::Idle,
            kind: None,
            cutter: Cutter::new(cfg),
            loader: Loader::new(),
            transport: TransportLock::new(),
            vehicle_speed_mps: 0.0,
        }
    }

    #[inline]
    pub fn phase(&self) -> OperationPhase {
        self.phase
    }

    pub fn set_vehicle_speed(&mut self, speed_mps: f64) {
        self.vehicle_speed_mps = speed_mps;
    }

    /// Attempt a phase transition for an external event.
    pub fn handle_event(&mut self, event: PhaseEvent) -> TransitionResult {
        use OperationPhase::*;
        use PhaseEvent::*;

        let next = match (self.phase, event) {
            (Idle, StartOperation(kind)) => {
                self.kind = Some(kind);
                Startup
            }

            (Active, AtWaitPoint) => Waiting,
            (Waiting, ResumeWork) => Active,

            (Active, AtUnloadPoint) => {
                // Both cutting implements stop before unloading begins.
                self.cutter.request_stop();
                self.loader.stop();
                Unloading
            }
            (Unloading, ResumeWork) => Active,

            (Active, StopOperation) | (Waiting, StopOperation) | (Unloading, StopOperation)
            | (Startup, StopOperation) => {
                self.cutter.request_stop();
                self.loader.stop();
                Shutdown
            }

            _ => return TransitionResult::Rejected(invalid_transition_reason(self.phase, event)),
        };

        info!(from = ?self.phase, to = ?next, "implement phase transition");
        self.phase = next;
        TransitionResult::Ok(next)
    }

    /// Emergency disable: everything off immediately, cargo stays locked.
    pub fn emergency_disable(&mut self) {
        warn!("implements disabled by emergency stop");
        self.cutter.force_stop();
        self.loader.stop();
        self.phase = OperationPhase::Idle;
        self.kind = None;
    }

    /// Advance the implement set by `dt` seconds.
    ///
    /// Internal (non-event) phase progress happens here: startup completes
    /// once the implement chain is ready, shutdown completes once the
    /// blades stop.
    pub fn tick(&mut self, dt: f64, now_ns: u64) -> ImplementsStatus {
        match self.phase {
            OperationPhase::Idle | OperationPhase::Waiting => {}
            OperationPhase::Startup => self.tick_startup(),
            OperationPhase::Active => {
                // Loader follows the cutter in loading operations.
                if self.kind == Some(OperationKind::Loading)
                    && self.cutter.is_at_speed()
                    && self.loader.is_stopped()
                {
                    self.loader.start();
                }
            }
            OperationPhase::Unloading => {
                // Discharge only once both implements have stopped.
                if self.cutter.is_stopped() && self.loader.is_stopped() {
                    self.transport.release();
                    self.loader.tick_unload(dt);
                }
            }
            OperationPhase::Shutdown => {
                if self.cutter.is_stopped() {
                    info!("implement shutdown complete");
                    self.phase = OperationPhase::Idle;
                    self.kind = None;
                }
            }
        }

        self.cutter.tick(dt);
        self.loader
            .tick_collect(dt, self.cutter.is_at_speed());

        ImplementsStatus {
            phase: self.phase,
            cutter: self.cutter.status(),
            loader: self.loader.status(),
            transport_locked: self.transport.is_engaged(),
            timestamp_ns: now_ns,
        }
    }

    /// Startup sequencing per operation kind; cutter first, loader gated on
    /// blade speed, transport lock on cargo secured.
    fn tick_startup(&mut self) {
        match self.kind {
            Some(OperationKind::Cutting) => {
                if self.cutter.request_start(self.vehicle_speed_mps) && self.cutter.is_at_speed() {
                    self.enter_active();
                }
            }
            Some(OperationKind::Loading) => {
                if self.cutter.request_start(self.vehicle_speed_mps) && self.cutter.is_at_speed() {
                    self.loader.start();
                    self.enter_active();
                }
            }
            Some(OperationKind::Transport) => {
                // Cargo secured before any motion phase.
                self.transport.engage();
                self.enter_active();
            }
            None => {
                warn!("startup phase with no operation kind");
                self.phase = OperationPhase::Idle;
            }
        }
    }

    fn enter_active(&mut self) {
        info!(kind = ?self.kind, "implements active");
        self.phase = OperationPhase::Active;
    }

    // Direct implement control (operator `control_implement` command).

    pub fn manual_cutter(&mut self, start: bool) -> bool {
        if start {
            self.cutter.request_start(self.vehicle_speed_mps)
        } else {
            self.cutter.request_stop();
            true
        }
    }

    pub fn manual_loader(&mut self, start: bool) -> bool {
        // The loader never runs without blades at speed.
        if start {
            if !self.cutter.is_at_speed() {
                return false;
            }
            self.loader.start();
        } else {
            self.loader.stop();
        }
        true
    }

    pub fn manual_transport(&mut self, engage: bool) {
        if engage {
            self.transport.engage();
        } else {
            self.transport.release();
        }
    }
}

fn invalid_transition_reason(phase: OperationPhase, event: PhaseEvent) -> &'static str {
    use OperationPhase::*;
    match (phase, event) {
        (Idle, _) => "Idle: only StartOperation allowed",
        (Startup, _) => "Startup: only StopOperation allowed",
        (Active, PhaseEvent::StartOperation(_)) => "Active: operation already running",
        (Active, _) => "Active: invalid event",
        (Waiting, _) => "Waiting: only ResumeWork or StopOperation allowed",
        (Unloading, _) => "Unloading: only ResumeWork or StopOperation allowed",
        (Shutdown, _) => "Shutdown: no events accepted until idle",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
