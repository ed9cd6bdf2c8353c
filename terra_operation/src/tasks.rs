//! Mesh wiring for the operation coordinator.
//!
//! Request topics:
//!
//! - `operation.start` - `{"kind": "cutting"|"loading"|"transport",
//!   "waypoints": [[x, y], …], "speed": f}`.
//! - `operation.pause` / `operation.resume` / `operation.cancel` - `{}`.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use terra_common::clock::monotonic_ns;
use terra_common::config::TerraConfig;
use terra_common::consts::{
    REQ_IMPLEMENTS_EVENT, REQ_NAV_CANCEL, REQ_NAV_SET_PATH, REQ_OPERATION_CANCEL,
    REQ_OPERATION_PAUSE, REQ_OPERATION_RESUME, REQ_OPERATION_START, SUPERVISOR_RATE_HZ,
    TOPIC_IMPLEMENTS_STATUS, TOPIC_OPERATION_STATUS, TOPIC_PATH_COMPLETE, TOPIC_SAFETY_STATUS,
};
use terra_common::geometry::Vec3;
use terra_common::types::bus::BusMessage;
use terra_common::types::operation::{OperationKind, OperationPhase};
use terra_common::types::safety::SafetyMode;
use terra_mesh::{Mesh, RequestJob, RequestOutcome, DEFAULT_STATUS_TIMEOUT};

use crate::coordinator::{Effect, OperationCoordinator, OperationEvent, OperationParams};

/// Carry out the side effects of a state transition.
async fn run_effects(mesh: &Mesh, effects: Vec<Effect>, cancel_budget_ms: u64) {
    for effect in effects {
        let (topic, payload, timeout) = match effect {
            Effect::SetPath { waypoints, speed } => {
                let pts: Vec<[f64; 2]> = waypoints.iter().map(|w| [w.x, w.y]).collect();
                (
                    REQ_NAV_SET_PATH,
                    serde_json::json!({ "waypoints": pts, "speed": speed }),
                    DEFAULT_STATUS_TIMEOUT,
                )
            }
            Effect::CancelPath => (
                REQ_NAV_CANCEL,
                serde_json::json!({}),
                Duration::from_millis(cancel_budget_ms),
            ),
            Effect::ImplementsStart(kind) => {
                let kind = match kind {
                    OperationKind::Cutting => "cutting",
                    OperationKind::Loading => "loading",
                    OperationKind::Transport => "transport",
                };
                (
                    REQ_IMPLEMENTS_EVENT,
                    serde_json::json!({ "event": "start_operation", "kind": kind }),
                    DEFAULT_STATUS_TIMEOUT,
                )
            }
            Effect::ImplementsAtUnloadPoint => (
                REQ_IMPLEMENTS_EVENT,
                serde_json::json!({ "event": "at_unload_point" }),
                DEFAULT_STATUS_TIMEOUT,
            ),
            Effect::ImplementsResume => (
                REQ_IMPLEMENTS_EVENT,
                serde_json::json!({ "event": "resume_work" }),
                DEFAULT_STATUS_TIMEOUT,
            ),
            Effect::ImplementsStop => (
                REQ_IMPLEMENTS_EVENT,
                serde_json::json!({ "event": "stop_operation" }),
                Duration::from_millis(cancel_budget_ms),
            ),
        };
        match mesh.request(topic, BusMessage::Value(payload), timeout).await {
            RequestOutcome::Ok(_) => {}
            RequestOutcome::NoHandler => warn!(topic, "no handler for operation effect"),
            RequestOutcome::Timeout => warn!(topic, "operation effect timed out"),
            RequestOutcome::HandlerError(e) => warn!(topic, error = e, "operation effect failed"),
        }
    }
}

fn parse_start(payload: &BusMessage) -> Result<(OperationKind, OperationParams), String> {
    let BusMessage::Value(v) = payload else {
        return Err("expected value payload".to_string());
    };
    let kind = match v.get("kind").and_then(|k| k.as_str()) {
        Some("cutting") => OperationKind::Cutting,
        Some("loading") => OperationKind::Loading,
        Some("transport") => OperationKind::Transport,
        other => return Err(format!("bad operation kind {other:?}")),
    };
    let waypoints: Vec<Vec3> = v
        .get("waypoints")
        .and_then(|w| w.as_array())
        .ok_or("missing waypoints")?
        .iter()
        .map(|p| {
            let x = p.get(0).and_then(|v| v.as_f64()).ok_or("bad waypoint")?;
            let y = p.get(1).and_then(|v| v.as_f64()).ok_or("bad waypoint")?;
            Ok::<Vec3, String>(Vec3::planar(x, y))
        })
        .collect::<Result<_, _>>()?;
    Ok((
        kind,
        OperationParams {
            waypoints,
            speed_mps: v.get("speed").and_then(|s| s.as_f64()),
        },
    ))
}

/// Spawn the operation coordinator task.
pub fn spawn_operation(mesh: Mesh, config: &TerraConfig) -> JoinHandle<()> {
    let mut coordinator = OperationCoordinator::new(config.operation.clone());
    let cancel_budget_ms = config.operation.cancel_budget_ms;

    let (_s1, mut path_complete) = mesh.subscribe(TOPIC_PATH_COMPLETE);
    let (_s2, mut safety) = mesh.subscribe(TOPIC_SAFETY_STATUS);
    let (_s3, mut implements) = mesh.subscribe(TOPIC_IMPLEMENTS_STATUS);
    let start = mesh.register_handler(REQ_OPERATION_START);
    let pause = mesh.register_handler(REQ_OPERATION_PAUSE);
    let resume = mesh.register_handler(REQ_OPERATION_RESUME);
    let cancel = mesh.register_handler(REQ_OPERATION_CANCEL);
    let period = Duration::from_micros(1_000_000 / SUPERVISOR_RATE_HZ);
    info!("operation coordinator started");

    tokio::spawn(async move {
        let (Ok((_h1, mut start_jobs)), Ok((_h2, mut pause_jobs)), Ok((_h3, mut resume_jobs)), Ok((_h4, mut cancel_jobs))) =
            (start, pause, resume, cancel)
        else {
            warn!("operation request handlers already taken; not started");
            return;
        };

        // Edge detection for safety transitions and unload completion.
        let mut last_estop = false;
        let mut unload_pending = false;

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    mesh.publish(
                        TOPIC_OPERATION_STATUS,
                        BusMessage::Operation(coordinator.status(monotonic_ns())),
                    );
                }
                msg = path_complete.recv() => match msg {
                    Some(_) => {
                        match coordinator.handle(OperationEvent::SegmentPathComplete) {
                            Ok(effects) => {
                                unload_pending = effects
                                    .iter()
                                    .any(|e| *e == Effect::ImplementsAtUnloadPoint);
                                run_effects(&mesh, effects, cancel_budget_ms).await;
                            }
                            Err(e) => warn!(error = e, "segment completion rejected"),
                        }
                    }
                    None => break,
                },
                msg = safety.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Safety(status) = env.payload {
                            let estop = status.mode == SafetyMode::Estop;
                            if estop != last_estop {
                                last_estop = estop;
                                let event = if estop {
                                    OperationEvent::SafetyEstop
                                } else {
                                    OperationEvent::SafetyCleared
                                };
                                if let Ok(effects) = coordinator.handle(event) {
                                    run_effects(&mesh, effects, cancel_budget_ms).await;
                                }
                            }
                        }
                    }
                    None => break,
                },
                msg = implements.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Implements(status) = env.payload {
                            coordinator.set_implement_phase(status.phase);
                            // Discharge complete: empty hopper while unloading.
                            if unload_pending
                                && status.phase == OperationPhase::Unloading
                                && status.loader.fill_level <= f64::EPSILON
                            {
                                unload_pending = false;
                                if let Ok(effects) =
                                    coordinator.handle(OperationEvent::UnloadFinished)
                                {
                                    run_effects(&mesh, effects, cancel_budget_ms).await;
                                }
                            }
                        }
                    }
                    None => break,
                },
                job = start_jobs.recv() => match job {
                    Some(job) => {
                        let RequestJob { payload, reply, .. } = job;
                        let result = parse_start(&payload).and_then(|(kind, params)| {
                            coordinator
                                .handle(OperationEvent::Start(kind, params))
                        });
                        match result {
                            Ok(effects) => {
                                run_effects(&mesh, effects, cancel_budget_ms).await;
                                let _ = reply.send(Ok(BusMessage::Value(
                                    serde_json::json!({ "ok": true }),
                                )));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    None => break,
                },
                job = pause_jobs.recv() => match job {
                    Some(job) => {
                        respond_simple(&mesh, &mut coordinator, OperationEvent::Pause, job, cancel_budget_ms).await;
                    }
                    None => break,
                },
                job = resume_jobs.recv() => match job {
                    Some(job) => {
                        respond_simple(&mesh, &mut coordinator, OperationEvent::Resume, job, cancel_budget_ms).await;
                    }
                    None => break,
                },
                job = cancel_jobs.recv() => match job {
                    Some(job) => {
                        respond_simple(&mesh, &mut coordinator, OperationEvent::Cancel, job, cancel_budget_ms).await;
                    }
                    None => break,
                },
            }
        }
    })
}

async fn respond_simple(
    mesh: &Mesh,
    coordinator: &mut OperationCoordinator,
    event: OperationEvent,
    job: RequestJob,
    cancel_budget_ms: u64,
) {
    match coordinator.handle(event) {
        Ok(effects) => {
            run_effects(mesh, effects, cancel_budget_ms).await;
            let _ = job
                .reply
                .send(Ok(BusMessage::Value(serde_json::json!({ "ok": true }))));
        }
        Err(e) => {
            let _ = job.reply.send(Err(e));
        }
    }
}
