//! Mesh wiring for the motion controller and safety monitor.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use terra_common::clock::monotonic_ns;
use terra_common::config::TerraConfig;
use terra_common::consts::{
    CONTROL_RATE_HZ, SAFETY_CHECK_RATE_HZ, TOPIC_ESTOP_ACTIVATED, TOPIC_ESTOP_RESET,
    TOPIC_MOTOR_COMMAND, TOPIC_MOTOR_STATUS, TOPIC_NAV_STATUS, TOPIC_OBSTACLE_MAP_UPDATED,
    TOPIC_POSE_UPDATED, TOPIC_SAFETY_STATUS, TOPIC_SAFETY_VIOLATION,
    TOPIC_SAFETY_VIOLATION_CLEARED, TOPIC_WAYPOINT_REACHED,
};
use terra_common::geometry::Polygon;
use terra_common::metrics::{Metrics, METRIC_ESTOP_COUNT};
use terra_common::types::bus::BusMessage;
use terra_common::types::command::Command;
use terra_common::types::safety::EstopReason;
use terra_common::types::sensor::SensorSample;
use terra_mesh::Mesh;

use crate::motion::MotionController;
use crate::safety::monitor::SafetyMonitor;

// ─── Motion controller task ─────────────────────────────────────────

/// Spawn the 50 Hz motion control loop. Sole writer of `motor.command`;
/// publishes `motion.waypoint_reached` when its target is consumed.
pub fn spawn_motion_controller(mesh: Mesh, config: &TerraConfig) -> JoinHandle<()> {
    let mut ctrl = MotionController::new(
        config.motion.clone(),
        config.safety.max_incline_deg,
        config.navigation.waypoint_reached_threshold_m,
    );
    let (_s1, mut poses) = mesh.subscribe(TOPIC_POSE_UPDATED);
    let (_s2, mut nav) = mesh.subscribe(TOPIC_NAV_STATUS);
    let (_s3, mut safety) = mesh.subscribe(TOPIC_SAFETY_STATUS);
    let (_s4, mut commands) = mesh.subscribe("command.*");
    let (_s5, mut imu) = mesh.subscribe("sensor.imu.updated");
    let period = Duration::from_micros(1_000_000 / CONTROL_RATE_HZ);
    let dt = 1.0 / CONTROL_RATE_HZ as f64;
    info!("motion controller started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ns = monotonic_ns();
                    let cmd = ctrl.tick(dt, now_ns);
                    mesh.publish(TOPIC_MOTOR_COMMAND, BusMessage::MotorCommand(cmd));
                    if let Some((index, position)) = ctrl.take_waypoint_reached() {
                        mesh.publish(
                            TOPIC_WAYPOINT_REACHED,
                            BusMessage::WaypointReached {
                                index,
                                position,
                                timestamp_ns: now_ns,
                            },
                        );
                    }
                }
                msg = poses.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Pose(pose) = env.payload {
                            ctrl.on_pose(pose);
                        }
                    }
                    None => break,
                },
                msg = nav.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Nav(status) = env.payload {
                            ctrl.on_nav(&status);
                        }
                    }
                    None => break,
                },
                msg = safety.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Safety(status) = env.payload {
                            ctrl.on_safety(&status);
                        }
                    }
                    None => break,
                },
                msg = commands.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Command(envelope) = env.payload {
                            match envelope.command {
                                Command::Move { speed, direction } => ctrl.on_move(speed, direction),
                                Command::Stop {} => ctrl.on_stop(),
                                _ => {}
                            }
                        }
                    }
                    None => break,
                },
                msg = imu.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Sensor(SensorSample::Imu { acceleration, .. }) = env.payload {
                            ctrl.on_accel(acceleration);
                        }
                    }
                    None => break,
                },
            }
        }
    })
}

// ─── Safety monitor task ────────────────────────────────────────────

/// Spawn the safety monitor: liveness watchdog plus the 5 Hz check loop.
///
/// The monitor publishes only after its internal transition, so subscribers
/// never observe a downstream state change before the monitor itself.
pub fn spawn_safety_monitor(mesh: Mesh, config: &TerraConfig, metrics: Metrics) -> JoinHandle<()> {
    let boundary = if config.navigation.field_boundary.is_empty() {
        Polygon::default()
    } else {
        config.navigation.boundary_polygon()
    };
    let mut monitor = SafetyMonitor::new(
        config.safety.clone(),
        config.watchdog.timeout_ms,
        config.motion.max_speed_mps,
        boundary,
        monotonic_ns(),
    );

    let (_s1, mut poses) = mesh.subscribe(TOPIC_POSE_UPDATED);
    let (_s2, mut motors) = mesh.subscribe(TOPIC_MOTOR_STATUS);
    let (_s3, mut obstacles) = mesh.subscribe(TOPIC_OBSTACLE_MAP_UPDATED);
    let (_s4, mut sensors) = mesh.subscribe("sensor.*");
    let (_s5, mut commands) = mesh.subscribe("command.*");
    let period = Duration::from_micros(1_000_000 / SAFETY_CHECK_RATE_HZ);
    info!("safety monitor started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ns = monotonic_ns();
                    let report = monitor.check(now_ns);
                    for event in &report.events {
                        let topic = if event.active {
                            TOPIC_SAFETY_VIOLATION
                        } else {
                            TOPIC_SAFETY_VIOLATION_CLEARED
                        };
                        mesh.publish(topic, BusMessage::Violation(*event));
                    }
                    if let Some(record) = report.estop {
                        metrics.incr(METRIC_ESTOP_COUNT);
                        mesh.publish(TOPIC_ESTOP_ACTIVATED, BusMessage::Estop(record));
                    }
                    // Status at the fixed check rate, transition or not.
                    mesh.publish(TOPIC_SAFETY_STATUS, BusMessage::Safety(monitor.status()));
                }
                msg = poses.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::Pose(pose) = env.payload {
                            monitor.on_pose(pose);
                        }
                    }
                    None => break,
                },
                msg = motors.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::MotorStatus(status) = env.payload {
                            // Control-loop completion counts as liveness.
                            monitor.feed_watchdog(monotonic_ns());
                            monitor.on_motors(status);
                        }
                    }
                    None => break,
                },
                msg = obstacles.recv() => match msg {
                    Some(env) => {
                        if let BusMessage::ObstacleMap(snap) = env.payload {
                            monitor.on_obstacles(snap.obstacles);
                        }
                    }
                    None => break,
                },
                msg = sensors.recv() => match msg {
                    Some(env) => {
                        monitor.feed_watchdog(monotonic_ns());
                        if let BusMessage::Sensor(SensorSample::Battery { level_pct, .. }) = env.payload {
                            monitor.on_battery(level_pct);
                        }
                    }
                    None => break,
                },
                msg = commands.recv() => match msg {
                    Some(env) => {
                        monitor.feed_watchdog(monotonic_ns());
                        if let BusMessage::Command(envelope) = env.payload {
                            handle_command(&mesh, &mut monitor, &metrics, &envelope.command);
                        }
                    }
                    None => break,
                },
            }
        }
    })
}

fn handle_command(mesh: &Mesh, monitor: &mut SafetyMonitor, metrics: &Metrics, command: &Command) {
    let now_ns = monotonic_ns();
    match command {
        Command::EmergencyStop { reason } => {
            if let Some(record) =
                monitor.trigger_estop(EstopReason::Operator(reason.clone()), "operator", now_ns)
            {
                metrics.incr(METRIC_ESTOP_COUNT);
                mesh.publish(TOPIC_ESTOP_ACTIVATED, BusMessage::Estop(record));
                mesh.publish(TOPIC_SAFETY_STATUS, BusMessage::Safety(monitor.status()));
            }
        }
        Command::ResetEmergency {} => match monitor.try_reset(now_ns) {
            Ok(()) => {
                mesh.publish(
                    TOPIC_ESTOP_RESET,
                    BusMessage::EstopReset {
                        timestamp_ns: now_ns,
                    },
                );
                mesh.publish(TOPIC_SAFETY_STATUS, BusMessage::Safety(monitor.status()));
            }
            Err(blocking) => {
                warn!(?blocking, "estop reset refused");
            }
        },
        Command::UpdateSafetyLimits { limits } => {
            match monitor.update_limits(limits) {
                Ok(()) => {
                    mesh.publish(TOPIC_SAFETY_STATUS, BusMessage::Safety(monitor.status()));
                }
                Err(e) => warn!(error = e, "safety limit update rejected"),
            }
        }
        Command::SetBoundaries { points } => {
            monitor.set_boundary(Polygon::new(points.clone()));
        }
        _ => {}
    }
}
