//! Emergency-stop propagation through the mesh.
//!
//! Exercises the safety monitor and motion controller tasks end to end:
//! a human detection near the vehicle must drive the safety state to ESTOP
//! and force all four wheel setpoints to zero.

use std::time::Duration;
use uuid::Uuid;

use terra_common::clock::monotonic_ns;
use terra_common::config::TerraConfig;
use terra_common::consts::{
    TOPIC_ESTOP_ACTIVATED, TOPIC_MOTOR_COMMAND, TOPIC_OBSTACLE_MAP_UPDATED, TOPIC_POSE_UPDATED,
    TOPIC_SAFETY_STATUS,
};
use terra_common::geometry::Vec3;
use terra_common::metrics::Metrics;
use terra_common::types::bus::BusMessage;
use terra_common::types::command::{Command, CommandEnvelope};
use terra_common::types::obstacle::{Obstacle, ObstacleKind, ObstacleMapSnapshot};
use terra_common::types::pose::Pose;
use terra_common::types::safety::{EstopReason, SafetyMode, ViolationKind};
use terra_control_unit::tasks::{spawn_motion_controller, spawn_safety_monitor};
use terra_mesh::Mesh;

fn config() -> TerraConfig {
    toml::from_str(
        r#"
[machine]
name = "itest"

[motion]
max_speed_mps = 2.0
max_accel_mps2 = 1.0
max_decel_mps2 = 2.0

[safety]
obstacle_safe_distance_m = 3.0
human_safe_distance_m = 5.0
max_incline_deg = 20.0
"#,
    )
    .unwrap()
}

fn pose_at(x: f64, y: f64) -> Pose {
    Pose {
        position: Vec3::planar(x, y),
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        position_uncertainty: 0.1,
        orientation_uncertainty: 0.01,
        timestamp_ns: monotonic_ns(),
    }
}

fn human_at(x: f64, y: f64) -> ObstacleMapSnapshot {
    ObstacleMapSnapshot {
        obstacles: vec![Obstacle {
            id: 1,
            position: Vec3::planar(x, y),
            size: 0.4,
            velocity: Vec3::ZERO,
            confidence: 0.95,
            kind: ObstacleKind::Human,
            last_seen_ns: monotonic_ns(),
        }],
        timestamp_ns: monotonic_ns(),
    }
}

fn envelope(command: Command) -> CommandEnvelope {
    CommandEnvelope {
        id: Uuid::new_v4(),
        command,
        timestamp_ms: 0,
        signature: String::new(),
        nonce: None,
    }
}

#[tokio::test]
async fn human_proximity_estops_and_zeroes_motors() {
    let mesh = Mesh::new(Metrics::new());
    let cfg = config();
    let (_sub_estop, mut estop_rx) = mesh.subscribe(TOPIC_ESTOP_ACTIVATED);
    let (_sub_motor, mut motor_rx) = mesh.subscribe(TOPIC_MOTOR_COMMAND);

    let _safety = spawn_safety_monitor(mesh.clone(), &cfg, Metrics::new());
    let _motion = spawn_motion_controller(mesh.clone(), &cfg);

    // Vehicle moving under a manual command.
    mesh.publish(TOPIC_POSE_UPDATED, BusMessage::Pose(pose_at(0.0, 0.0)));
    mesh.publish(
        "command.move",
        BusMessage::Command(envelope(Command::Move {
            speed: 1.0,
            direction: 0.0,
        })),
    );

    // The controller must be driving before the violation is injected.
    let mut moving = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(400);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(100), motor_rx.recv()).await {
            Ok(Some(env)) => {
                if let BusMessage::MotorCommand(cmd) = env.payload {
                    if cmd.setpoints.iter().any(|s| *s > 0.0) {
                        moving = true;
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    assert!(moving, "controller must spin up before the test injects a human");

    // Inject a human two metres ahead.
    mesh.publish(
        TOPIC_OBSTACLE_MAP_UPDATED,
        BusMessage::ObstacleMap(human_at(2.0, 0.0)),
    );

    // The 5 Hz check loop must fire and escalate within its next period.
    let estop = tokio::time::timeout(Duration::from_millis(400), estop_rx.recv())
        .await
        .expect("estop must activate in time")
        .expect("channel open");
    match estop.payload {
        BusMessage::Estop(record) => {
            assert_eq!(
                record.reason,
                EstopReason::Violation(ViolationKind::HumanProximity)
            );
            assert_eq!(record.source, "safety_monitor");
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // Drain motor commands until the controller has observed the stop; the
    // setpoints must then be all-zero and stay that way.
    let mut zeroed = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(400);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(100), motor_rx.recv()).await {
            Ok(Some(env)) => {
                if let BusMessage::MotorCommand(cmd) = env.payload {
                    if cmd.setpoints == [0.0; 4] {
                        zeroed = true;
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    assert!(zeroed, "motor setpoints must drop to zero after estop");
}

#[tokio::test]
async fn operator_estop_then_reset_round_trip() {
    let mesh = Mesh::new(Metrics::new());
    let cfg = config();
    let (_sub, mut status_rx) = mesh.subscribe(TOPIC_SAFETY_STATUS);
    let _safety = spawn_safety_monitor(mesh.clone(), &cfg, Metrics::new());

    mesh.publish(TOPIC_POSE_UPDATED, BusMessage::Pose(pose_at(0.0, 0.0)));
    mesh.publish(
        "command.emergency_stop",
        BusMessage::Command(envelope(Command::EmergencyStop {
            reason: "operator test".into(),
        })),
    );

    // Wait for an estop-active status snapshot.
    let mut saw_estop = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(300), status_rx.recv()).await {
            Ok(Some(env)) => {
                if let BusMessage::Safety(s) = env.payload {
                    if s.mode == SafetyMode::Estop {
                        saw_estop = true;
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    assert!(saw_estop, "estop status must be published");

    mesh.publish(
        "command.reset_emergency",
        BusMessage::Command(envelope(Command::ResetEmergency {})),
    );

    let mut saw_normal = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(300), status_rx.recv()).await {
            Ok(Some(env)) => {
                if let BusMessage::Safety(s) = env.payload {
                    if s.mode == SafetyMode::Normal {
                        saw_normal = true;
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    assert!(saw_normal, "reset must return the monitor to normal");
}
