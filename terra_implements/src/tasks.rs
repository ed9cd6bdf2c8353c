//! Mesh wiring for the implement coordinator.
//!
//! Request topic `implements.event` accepts phase events from the operation
//! coordinator: `{"event": "start_operation", "kind": "cutting"}`,
//! `{"event": "at_wait_point"}`, `{"event": "at_unload_point"}`,
//! `{"event": "resume_work"}`, `{"event": "stop_operation"}`.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use terra_common::clock::monotonic_ns;
use terra_common::config::TerraConfig;
use terra_common::consts::{
    REQ_IMPLEMENTS_EVENT, TOPIC_ESTOP_ACTIVATED, TOPIC_IMPLEMENTS_STATUS, TOPIC_MOTOR_STATUS,
};
use terra_common::types::bus::BusMessage;
use terra_common::types::command::{Command, ImplementAction, ImplementKind};
use terra_common::types::operation::OperationKind;
use terra_mesh::{Mesh, RequestJob};

use crate::coordinator::{ImplementCoordinator, PhaseEvent, TransitionResult};

/// Implement status tick rate.
const IMPLEMENTS_RATE_HZ: u64 = 10;

fn parse_event(payload: &BusMessage) -> Result<PhaseEvent, String> {
    let BusMessage::Value(v) = payload else {
        return Err("expected value payload".to_string());
    };
    let event = v
        .get("event")
        .and_then(|e| e.as_str())
        .ok_or("missing event")?;
    match event {
        "start_operation" => {
            let kind = match v.get("kind").and_then(|k| k.as_str()) {
                Some("cutting") => OperationKind::Cutting,
                Some("loading") => OperationKind::Loading,
                Some("transport") => OperationKind::Transport,
                other => return Err(format!("bad operation kind {other:?}")),
            };
            Ok(PhaseEvent::StartOperation(kind))
        }
        "at_wait_point" => Ok(PhaseEvent::AtWaitPoint),
        "at_unload_point" => Ok(PhaseEvent::AtUnloadPoint),
        "resume_work" => Ok(PhaseEvent::ResumeWork),
        "stop_operation" => Ok(PhaseEvent::StopOperation),
        other => Err(format!("unknown event {other:?}")),
    }
}

fn handle_event_request(coordinator: &mut ImplementCoordinator, job: RequestJob) {
    let reply = match parse_event(&job.payload) {
        Ok(event) => match coordinator.handle_event(event) {
            TransitionResult::Ok(phase) => Ok(BusMessage::Value(
                serde_json::json!({ "ok": true, "phase": format!("{phase:?}").to_lowercase() }),
            )),
            TransitionResult::Rejected(reason) => Err(reason.to_string()),
        },
        Err(e) => Err(e),
    };
    let _ = job.reply.send(reply);
}

fn handle_manual(coordinator: &mut ImplementCoordinator, command: &Command) {
    let Command::ControlImplement {
        implement, action, ..
    } = command
    else {
        return;
    };
    let accepted = match (implement, action) {
        (ImplementKind::Cutter, ImplementAction::Start) => coordinator.manual_cutter(true),
        (ImplementKind::Cutter, ImplementAction::Stop) => coordinator.manual_cutter(false),
        (ImplementKind::Loader, ImplementAction::Start) => coordinator.manual_loader(true),
        (ImplementKind::Loader, ImplementAction::Stop) => coordinator.manual_loader(false),
        (ImplementKind::Transport, ImplementAction::Engage) => {
            coordinator.manual_transport(true);
            true
        }
        (ImplementKind::Transport, ImplementAction::Release) => {
            coordinator.manual_transport(false);
            true
        }
        _ => {
            warn!(?implement, ?action, "unsupported implement action");
            false
        }
    };
    if !accepted {
        warn!(?implement, ?action, "implement action refused");
    }
}

/// Spawn the implement coordinator task.
pub fn spawn_implements(mesh: Mesh, config: &TerraConfig) -> JoinHandle<()> {
    let mut coordinator = ImplementCoordinator::new(&config.implements);
    let max_speed = config.motion.max_speed_mps;

    let (_s1, mut estops) = mesh.subscribe(TOPIC_ESTOP_ACTIVATED);
    let (_s2, mut motors) = mesh.subscribe(TOPIC_MOTOR_STATUS);
    let (_s3, mut commands) = mesh.subscribe("command.*");
    let events = mesh.register_handler(REQ_IMPLEMENTS_EVENT);
    let period = Duration::from_micros(1_000_000 / IMPLEMENTS_RATE_HZ);
    let dt = 1.0 / IMPLEMENTS_RATE_HZ as f64;
    info!("implement coordinator started");

    tokio::spawn(async move {
        let Ok((_h, mut event_jobs)) = events else {
            warn!("implements request handler already taken; not started");
            return;
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = coordinator.tick(dt, monotonic_ns());
                    mesh.publish(TOPIC_IMPLEMENTS_STATUS, BusMessage::Implements(status));
                }
                msg = estops.recv() => match msg {
                    Some(_) => coordinator.emergency_disable(),
                    None => break,
                },
                msg = motors.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::MotorStatus(status) = env.payload {
                            let mean: f64 = status
                                .motors
                                .iter()
                                .map(|m| m.current_speed)
                                .sum::<f64>()
                                / status.motors.len() as f64;
                            coordinator.set_vehicle_speed(mean * max_speed);
                        }
                    }
                    None => break,
                },
                msg = commands.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Command(envelope) = env.payload {
                            handle_manual(&mut coordinator, &envelope.command);
                        }
                    }
                    None => break,
                },
                job = event_jobs.recv() => match job {
                    Some(job) => handle_event_request(&mut coordinator, job),
                    None => break,
                },
            }
        }
    })
}
