//! Operation state machine and segment planning.

use tracing::{info, warn};
use uuid::Uuid;

use terra_common::config::OperationConfig;
use terra_common::geometry::Vec3;
use terra_common::types::operation::{
    OperationKind, OperationPhase, OperationState, OperationStatus, Segment, SegmentTask,
};

/// Parameters supplied to `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationParams {
    /// Route to work, in order.
    pub waypoints: Vec<Vec3>,
    /// Ground speed override [m/s].
    pub speed_mps: Option<f64>,
}

/// Event driving the operation state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    Start(OperationKind, OperationParams),
    Pause,
    Resume,
    Cancel,
    /// Path executor consumed the final waypoint of the active segment.
    SegmentPathComplete,
    /// Hopper discharged at the unload point.
    UnloadFinished,
    /// Safety monitor entered ESTOP.
    SafetyEstop,
    /// Safety monitor returned to a motion-permitting mode.
    SafetyCleared,
}

/// Side effect the task layer must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Install the given waypoints in the path executor.
    SetPath { waypoints: Vec<Vec3>, speed: f64 },
    /// Cancel the active path and zero the motion target.
    CancelPath,
    /// Send a phase event to the implement coordinator.
    ImplementsStart(OperationKind),
    ImplementsAtUnloadPoint,
    ImplementsResume,
    ImplementsStop,
}

/// One running operation.
#[derive(Debug, Clone)]
struct ActiveOperation {
    id: Uuid,
    kind: OperationKind,
    segments: Vec<Segment>,
    segment_index: usize,
    speed_mps: f64,
    /// Set while paused because of safety rather than the operator.
    paused_for_safety: bool,
}

/// The operation coordinator state machine.
pub struct OperationCoordinator {
    cfg: OperationConfig,
    state: OperationState,
    active: Option<ActiveOperation>,
    /// Last phase reported by the implement coordinator.
    implement_phase: OperationPhase,
}

impl OperationCoordinator {
    pub fn new(cfg: OperationConfig) -> Self {
        Self {
            cfg,
            state: OperationState::Idle,
            active: None,
            implement_phase: OperationPhase::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn set_implement_phase(&mut self, phase: OperationPhase) {
        self.implement_phase = phase;
    }

    /// Build the segment plan for an operation.
    fn plan_segments(&self, kind: OperationKind, params: &OperationParams) -> Vec<Segment> {
        let mut segments = vec![Segment {
            waypoints: params.waypoints.clone(),
            task: match kind {
                OperationKind::Transport => SegmentTask::Travel,
                _ => SegmentTask::Work,
            },
        }];
        // Loading runs discharge at the configured unload point.
        if kind == OperationKind::Loading {
            if let Some([x, y]) = self.cfg.unload_point {
                segments.push(Segment {
                    waypoints: vec![Vec3::planar(x, y)],
                    task: SegmentTask::Unload,
                });
            }
        }
        segments
    }

    /// Apply one event; returns the side effects to carry out, or an error
    /// string when the event is invalid in the current state.
    ///
    /// Every `(state, event)` pair has exactly one outcome.
    pub fn handle(&mut self, event: OperationEvent) -> Result<Vec<Effect>, String> {
        use OperationEvent::*;
        use OperationState::*;

        match (self.state, event) {
            // ── Start ───────────────────────────────────────────────
            (Idle | Complete | Cancelled, Start(kind, params)) => {
                if params.waypoints.is_empty() {
                    return Err("operation needs at least one waypoint".to_string());
                }
                let segments = self.plan_segments(kind, &params);
                let speed = params.speed_mps.unwrap_or(self.cfg.work_speed_mps);
                let first = segments[0].waypoints.clone();
                let op = ActiveOperation {
                    id: Uuid::new_v4(),
                    kind,
                    segments,
                    segment_index: 0,
                    speed_mps: speed,
                    paused_for_safety: false,
                };
                info!(id = %op.id, ?kind, segments = op.segments.len(), "operation started");
                self.active = Some(op);
                self.state = Running;
                Ok(vec![
                    Effect::ImplementsStart(kind),
                    Effect::SetPath {
                        waypoints: first,
                        speed,
                    },
                ])
            }
            (Running | Paused, Start(..)) => Err("operation already active".to_string()),

            // ── Pause / resume ──────────────────────────────────────
            (Running, Pause) => {
                self.state = Paused;
                if let Some(op) = &mut self.active {
                    op.paused_for_safety = false;
                }
                info!("operation paused by operator");
                Ok(vec![Effect::CancelPath])
            }
            (Paused, Resume) => {
                let op = self.active.as_mut().ok_or("no active operation")?;
                if op.paused_for_safety {
                    return Err("paused for safety; waiting for clearance".to_string());
                }
                self.state = Running;
                let segment = &op.segments[op.segment_index];
                info!("operation resumed");
                Ok(vec![Effect::SetPath {
                    waypoints: segment.waypoints.clone(),
                    speed: op.speed_mps,
                }])
            }
            (Idle | Complete | Cancelled, Pause | Resume) => {
                Err("no operation to pause/resume".to_string())
            }
            (Running, Resume) => Ok(vec![]), // already running
            (Paused, Pause) => Ok(vec![]),   // already paused

            // ── Cancel ──────────────────────────────────────────────
            (Running | Paused, Cancel) => {
                self.state = Cancelled;
                info!("operation cancelled");
                Ok(vec![Effect::CancelPath, Effect::ImplementsStop])
            }
            (Idle | Complete | Cancelled, Cancel) => Err("no operation to cancel".to_string()),

            // ── Segment progress ────────────────────────────────────
            (Running, SegmentPathComplete) => {
                let op = self.active.as_mut().ok_or("no active operation")?;
                let finished = &op.segments[op.segment_index];
                match finished.task {
                    SegmentTask::Unload => {
                        // Arrived at the unload point; discharge before the
                        // next segment.
                        Ok(vec![Effect::ImplementsAtUnloadPoint])
                    }
                    SegmentTask::Work | SegmentTask::Travel => self.advance_segment(),
                }
            }
            (Running, UnloadFinished) => {
                let mut effects = vec![Effect::ImplementsResume];
                effects.extend(self.advance_segment()?);
                Ok(effects)
            }
            (Idle | Paused | Complete | Cancelled, SegmentPathComplete | UnloadFinished) => {
                // Stale executor events after pause/cancel are ignored.
                Ok(vec![])
            }

            // ── Safety ──────────────────────────────────────────────
            (Running, SafetyEstop) => {
                self.state = Paused;
                if let Some(op) = &mut self.active {
                    op.paused_for_safety = true;
                }
                warn!("operation paused for safety");
                Ok(vec![Effect::CancelPath])
            }
            (Paused, SafetyCleared) => {
                let op = self.active.as_mut().ok_or("no active operation")?;
                if !op.paused_for_safety {
                    return Ok(vec![]); // operator pause holds
                }
                op.paused_for_safety = false;
                self.state = Running;
                let segment = &op.segments[op.segment_index];
                info!("safety cleared; operation resumed");
                Ok(vec![Effect::SetPath {
                    waypoints: segment.waypoints.clone(),
                    speed: op.speed_mps,
                }])
            }
            (Paused, SafetyEstop) => {
                if let Some(op) = &mut self.active {
                    op.paused_for_safety = true;
                }
                Ok(vec![])
            }
            (_, SafetyEstop) | (_, SafetyCleared) => Ok(vec![]),
        }
    }

    fn advance_segment(&mut self) -> Result<Vec<Effect>, String> {
        let op = self.active.as_mut().ok_or("no active operation")?;
        op.segment_index += 1;
        if op.segment_index >= op.segments.len() {
            info!(id = %op.id, "operation complete");
            self.state = OperationState::Complete;
            return Ok(vec![Effect::ImplementsStop]);
        }
        let segment = &op.segments[op.segment_index];
        info!(index = op.segment_index, "advancing to next segment");
        Ok(vec![Effect::SetPath {
            waypoints: segment.waypoints.clone(),
            speed: op.speed_mps,
        }])
    }

    /// Cancel-budget deadline for wind-down [ms].
    pub fn cancel_budget_ms(&self) -> u64 {
        self.cfg.cancel_budget_ms
    }

    /// Status snapshot.
    pub fn status(&self, now_ns: u64) -> OperationStatus {
        match &self.active {
            Some(op) => {
                let done = match self.state {
                    OperationState::Complete => op.segments.len(),
                    _ => op.segment_index,
                };
                OperationStatus {
                    id: op.id,
                    kind: op.kind,
                    state: self.state,
                    phase: self.implement_phase,
                    segment_index: op.segment_index.min(op.segments.len().saturating_sub(1)),
                    segment_count: op.segments.len(),
                    progress: done as f64 / op.segments.len().max(1) as f64,
                    paused_for_safety: op.paused_for_safety,
                    timestamp_ns: now_ns,
                }
            }
            None => OperationStatus {
                id: Uuid::nil(),
                kind: OperationKind::Cutting,
                state: self.state,
                phase: self.implement_phase,
                segment_index: 0,
                segment_count: 0,
                progress: 0.0,
                paused_for_safety: false,
                timestamp_ns: now_ns,
            },
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> OperationConfig {
        OperationConfig {
            unload_point: Some([50.0, 0.0]),
            ..OperationConfig::default()
        }
    }

    fn params() -> OperationParams {
        OperationParams {
            waypoints: vec![Vec3::planar(10.0, 0.0), Vec3::planar(10.0, 10.0)],
            speed_mps: None,
        }
    }

    fn coordinator() -> OperationCoordinator {
        OperationCoordinator::new(cfg())
    }

    #[test]
    fn start_produces_implements_and_path_effects() {
        let mut c = coordinator();
        let effects = c
            .handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        assert_eq!(c.state(), OperationState::Running);
        assert!(matches!(effects[0], Effect::ImplementsStart(OperationKind::Cutting)));
        assert!(matches!(effects[1], Effect::SetPath { .. }));
    }

    #[test]
    fn loading_plan_appends_unload_segment() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Loading, params()))
            .unwrap();
        let status = c.status(0);
        assert_eq!(status.segment_count, 2);
    }

    #[test]
    fn double_start_rejected() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        assert!(c
            .handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .is_err());
    }

    #[test]
    fn empty_waypoints_rejected() {
        let mut c = coordinator();
        assert!(c
            .handle(OperationEvent::Start(
                OperationKind::Cutting,
                OperationParams {
                    waypoints: vec![],
                    speed_mps: None
                }
            ))
            .is_err());
        assert_eq!(c.state(), OperationState::Idle);
    }

    #[test]
    fn cutting_completes_after_single_segment() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        let effects = c.handle(OperationEvent::SegmentPathComplete).unwrap();
        assert_eq!(c.state(), OperationState::Complete);
        assert!(effects.contains(&Effect::ImplementsStop));
        assert_eq!(c.status(0).progress, 1.0);
    }

    #[test]
    fn loading_runs_unload_cycle() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Loading, params()))
            .unwrap();

        // Work segment done → drive to unload point.
        let effects = c.handle(OperationEvent::SegmentPathComplete).unwrap();
        assert!(matches!(effects[0], Effect::SetPath { .. }));
        assert_eq!(c.state(), OperationState::Running);

        // Arrived at the unload point → discharge.
        let effects = c.handle(OperationEvent::SegmentPathComplete).unwrap();
        assert_eq!(effects, vec![Effect::ImplementsAtUnloadPoint]);

        // Discharge done → operation complete (no further segments).
        let effects = c.handle(OperationEvent::UnloadFinished).unwrap();
        assert!(effects.contains(&Effect::ImplementsResume));
        assert_eq!(c.state(), OperationState::Complete);
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        let effects = c.handle(OperationEvent::Pause).unwrap();
        assert_eq!(effects, vec![Effect::CancelPath]);
        assert_eq!(c.state(), OperationState::Paused);

        let effects = c.handle(OperationEvent::Resume).unwrap();
        assert_eq!(c.state(), OperationState::Running);
        assert!(matches!(effects[0], Effect::SetPath { .. }));
    }

    #[test]
    fn safety_pause_blocks_operator_resume_until_cleared() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        c.handle(OperationEvent::SafetyEstop).unwrap();
        assert_eq!(c.state(), OperationState::Paused);
        assert!(c.status(0).paused_for_safety);

        // Operator resume is refused while safety holds the pause.
        assert!(c.handle(OperationEvent::Resume).is_err());

        let effects = c.handle(OperationEvent::SafetyCleared).unwrap();
        assert_eq!(c.state(), OperationState::Running);
        assert!(matches!(effects[0], Effect::SetPath { .. }));
    }

    #[test]
    fn operator_pause_survives_safety_clearance() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        c.handle(OperationEvent::Pause).unwrap();
        let effects = c.handle(OperationEvent::SafetyCleared).unwrap();
        assert!(effects.is_empty());
        assert_eq!(c.state(), OperationState::Paused);
    }

    #[test]
    fn cancel_from_running_and_paused() {
        for pause_first in [false, true] {
            let mut c = coordinator();
            c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
                .unwrap();
            if pause_first {
                c.handle(OperationEvent::Pause).unwrap();
            }
            let effects = c.handle(OperationEvent::Cancel).unwrap();
            assert_eq!(c.state(), OperationState::Cancelled);
            assert!(effects.contains(&Effect::CancelPath));
            assert!(effects.contains(&Effect::ImplementsStop));
        }
    }

    #[test]
    fn restart_after_completion() {
        let mut c = coordinator();
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        c.handle(OperationEvent::SegmentPathComplete).unwrap();
        assert_eq!(c.state(), OperationState::Complete);
        assert!(c
            .handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .is_ok());
    }

    #[test]
    fn stale_executor_events_ignored_when_not_running() {
        let mut c = coordinator();
        assert_eq!(c.handle(OperationEvent::SegmentPathComplete).unwrap(), vec![]);
        c.handle(OperationEvent::Start(OperationKind::Cutting, params()))
            .unwrap();
        c.handle(OperationEvent::Pause).unwrap();
        assert_eq!(c.handle(OperationEvent::SegmentPathComplete).unwrap(), vec![]);
    }
}
