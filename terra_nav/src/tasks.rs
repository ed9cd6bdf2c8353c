//! Mesh wiring for the navigation subsystems.
//!
//! Three tasks: the localisation filter (10 Hz), the obstacle map (20 Hz)
//! and the navigator (pose/obstacle-driven). Request topics served by the
//! navigator:
//!
//! - `navigation.set_path` - `{waypoints: [[x, y], …], speed}`; plans from
//!   the current pose through the waypoints.
//! - `navigation.cancel` - clears the active path.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use terra_common::clock::monotonic_ns;
use terra_common::config::TerraConfig;
use terra_common::consts::{
    LOCALISATION_RATE_HZ, OBSTACLE_RATE_HZ, REQ_NAV_CANCEL, REQ_NAV_SET_PATH,
    REQ_OBSTACLE_CORRIDOR, TOPIC_NAV_BOUNDARY_VIOLATION, TOPIC_NAV_STATUS,
    TOPIC_OBSTACLE_MAP_UPDATED, TOPIC_PATH_COMPLETE, TOPIC_POSE_UPDATED,
};
use terra_common::geometry::{Polygon, Vec3};
use terra_common::metrics::{Metrics, METRIC_REPLAN_COUNT, METRIC_STALE_SAMPLES_DROPPED};
use terra_common::types::bus::BusMessage;
use terra_common::types::command::Command;
use terra_common::types::obstacle::{Obstacle, ObstacleMapSnapshot};
use terra_common::types::pose::Pose;
use terra_common::types::sensor::SensorSample;
use terra_common::types::status::NavStatus;
use terra_mesh::{Mesh, RequestJob};

use crate::localisation::LocalisationFilter;
use crate::obstacle::ObstacleMap;
use crate::planner::{AdvanceEvent, PathExecutor, PathPlanner};

// ─── Localisation task ──────────────────────────────────────────────

/// Spawn the localisation filter task.
pub fn spawn_localisation(mesh: Mesh, config: &TerraConfig, metrics: Metrics) -> JoinHandle<()> {
    let mut filter = LocalisationFilter::new(config.localisation.clone(), monotonic_ns());
    let (_sub, mut samples) = mesh.subscribe("sensor.*");
    let period = Duration::from_micros(1_000_000 / LOCALISATION_RATE_HZ);
    info!("localisation filter started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pose = filter.tick(monotonic_ns());
                    mesh.publish(TOPIC_POSE_UPDATED, BusMessage::Pose(pose));
                }
                msg = samples.recv() => match msg {
                    Some(envelope) => {
                        if let BusMessage::Sensor(sample) = envelope.payload {
                            if !filter.ingest(&sample) {
                                metrics.incr(METRIC_STALE_SAMPLES_DROPPED);
                            }
                        }
                    }
                    None => break,
                },
            }
        }
    })
}

// ─── Obstacle map task ──────────────────────────────────────────────

/// Spawn the obstacle map task.
///
/// Serves `obstacle.corridor_query` requests:
/// `{"start": [x, y], "end": [x, y], "width": w}` → the tracked obstacles
/// whose bounding volume intersects the swept rectangle.
pub fn spawn_obstacle_map(mesh: Mesh, config: &TerraConfig) -> JoinHandle<()> {
    let mut map = ObstacleMap::new(config.obstacles.clone(), monotonic_ns());
    let (_sub, mut samples) = mesh.subscribe("sensor.*");
    let corridor = mesh.register_handler(REQ_OBSTACLE_CORRIDOR);
    let period = Duration::from_micros(1_000_000 / OBSTACLE_RATE_HZ);
    info!("obstacle map started");

    tokio::spawn(async move {
        let Ok((_h, mut corridor_jobs)) = corridor else {
            warn!("corridor query handler already taken; obstacle map not started");
            return;
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = map.tick(monotonic_ns());
                    mesh.publish(TOPIC_OBSTACLE_MAP_UPDATED, BusMessage::ObstacleMap(snapshot));
                }
                msg = samples.recv() => match msg {
                    Some(envelope) => {
                        if let BusMessage::Sensor(sample) = envelope.payload {
                            match sample {
                                SensorSample::LidarClusters { detections, .. }
                                | SensorSample::Ultrasonic { detections, .. }
                                | SensorSample::CameraDetections { detections, .. } => {
                                    map.ingest(&detections);
                                }
                                _ => {}
                            }
                        }
                    }
                    None => break,
                },
                job = corridor_jobs.recv() => match job {
                    Some(job) => {
                        let reply = parse_corridor(&job.payload).map(|(start, end, width)| {
                            BusMessage::ObstacleMap(ObstacleMapSnapshot {
                                obstacles: map.corridor_query(start, end, width),
                                timestamp_ns: monotonic_ns(),
                            })
                        });
                        let _ = job.reply.send(reply);
                    }
                    None => break,
                },
            }
        }
    })
}

fn parse_corridor(payload: &BusMessage) -> Result<(Vec3, Vec3, f64), String> {
    let BusMessage::Value(v) = payload else {
        return Err("expected value payload".to_string());
    };
    let point = |key: &str| -> Result<Vec3, String> {
        let p = v.get(key).and_then(|p| p.as_array()).ok_or("missing point")?;
        let x = p.get(0).and_then(|v| v.as_f64()).ok_or("bad point")?;
        let y = p.get(1).and_then(|v| v.as_f64()).ok_or("bad point")?;
        Ok(Vec3::planar(x, y))
    };
    let width = v
        .get("width")
        .and_then(|w| w.as_f64())
        .ok_or("missing width")?;
    Ok((point("start")?, point("end")?, width))
}

// ─── Navigator task ─────────────────────────────────────────────────

struct Navigator {
    planner: PathPlanner,
    executor: PathExecutor,
    mesh: Mesh,
    metrics: Metrics,
    boundary_enforcement: bool,
    safety_margin_m: f64,
    default_speed_mps: f64,
    target_speed_mps: f64,
    pose: Option<Pose>,
    obstacles: Vec<Obstacle>,
    /// Edge detection for boundary violation publishes.
    out_of_bounds: bool,
}

impl Navigator {
    fn publish_status(&self, replanned: bool) {
        self.mesh.publish(
            TOPIC_NAV_STATUS,
            BusMessage::Nav(NavStatus {
                path: self.executor.path().to_vec(),
                current_waypoint_index: self.executor.current_index(),
                replanned,
                active: self.executor.is_active(),
                target_speed_mps: if self.executor.is_active() {
                    self.target_speed_mps
                } else {
                    0.0
                },
                timestamp_ns: monotonic_ns(),
            }),
        );
    }

    /// Plan from the current pose through a waypoint list and install it.
    fn install_route(&mut self, waypoints: &[Vec3], speed: Option<f64>) -> Result<(), String> {
        let pose = self.pose.ok_or("no pose estimate yet")?;
        if waypoints.is_empty() {
            return Err("empty waypoint list".to_string());
        }
        let mut full: Vec<Vec3> = Vec::new();
        let mut from = pose.position;
        for (i, wp) in waypoints.iter().enumerate() {
            let leg = self
                .planner
                .plan(from, *wp, &self.obstacles)
                .map_err(|e| format!("leg {i}: {e}"))?;
            // Skip the duplicated joint point between consecutive legs.
            let skip = usize::from(!full.is_empty());
            full.extend(leg.into_iter().skip(skip));
            from = *wp;
        }
        self.executor.set_path(full);
        self.target_speed_mps = speed.unwrap_or(self.default_speed_mps);
        self.publish_status(false);
        Ok(())
    }

    fn on_pose(&mut self, pose: Pose) {
        self.pose = Some(pose);
        self.check_boundary(pose);
        match self.executor.advance(pose.position) {
            AdvanceEvent::None => {}
            // The motion controller owns `motion.waypoint_reached`; the
            // executor just moves the index on and republishes its status.
            AdvanceEvent::WaypointReached(_) => {
                self.publish_status(false);
            }
            AdvanceEvent::Complete => {
                info!("path complete");
                self.mesh.publish(
                    TOPIC_PATH_COMPLETE,
                    BusMessage::PathComplete {
                        timestamp_ns: pose.timestamp_ns,
                    },
                );
                self.target_speed_mps = 0.0;
                self.publish_status(false);
            }
        }
    }

    fn check_boundary(&mut self, pose: Pose) {
        if !self.boundary_enforcement || !self.planner.boundary().is_valid() {
            return;
        }
        let outside = !self.planner.boundary().contains(pose.position);
        if outside && !self.out_of_bounds {
            warn!("vehicle left the field boundary");
            self.mesh.publish(
                TOPIC_NAV_BOUNDARY_VIOLATION,
                BusMessage::BoundaryViolation {
                    position: pose.position,
                    timestamp_ns: pose.timestamp_ns,
                },
            );
        }
        self.out_of_bounds = outside;
    }

    fn on_obstacles(&mut self, obstacles: Vec<Obstacle>) {
        self.obstacles = obstacles;
        let Some(pose) = self.pose else { return };
        if !self.executor.is_active() {
            return;
        }
        if !self
            .executor
            .remaining_blocked(pose.position, &self.obstacles, self.safety_margin_m)
        {
            return;
        }
        let Some(goal) = self.executor.final_goal() else {
            return;
        };
        info!("remaining path obstructed; replanning");
        match self.planner.plan(pose.position, goal, &self.obstacles) {
            Ok(path) => {
                self.executor.set_replanned_path(path);
                self.metrics.incr(METRIC_REPLAN_COUNT);
                self.publish_status(true);
            }
            Err(e) => {
                warn!(error = %e, "replan failed; cancelling path");
                self.executor.cancel();
                self.target_speed_mps = 0.0;
                self.publish_status(false);
            }
        }
    }

    fn on_command(&mut self, command: &Command) {
        match command {
            Command::Navigate { waypoints } => {
                if let Err(e) = self.install_route(waypoints, None) {
                    warn!(error = %e, "navigate command failed");
                }
            }
            Command::Stop {} => {
                self.executor.cancel();
                self.target_speed_mps = 0.0;
                self.publish_status(false);
            }
            Command::SetBoundaries { points } => {
                // Same polygon twice is a no-op by construction.
                self.planner.set_boundary(Polygon::new(points.clone()));
                info!(vertices = points.len(), "field boundary updated");
            }
            _ => {}
        }
    }

    fn on_set_path_request(&mut self, job: RequestJob) {
        let result = (|| -> Result<(), String> {
            let BusMessage::Value(ref v) = job.payload else {
                return Err("expected value payload".to_string());
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
            let speed = v.get("speed").and_then(|s| s.as_f64());
            self.install_route(&waypoints, speed)
        })();
        let reply = match result {
            Ok(()) => Ok(BusMessage::Value(serde_json::json!({ "ok": true }))),
            Err(e) => Err(e),
        };
        let _ = job.reply.send(reply);
    }
}

/// Spawn the navigator task (planner + executor).
pub fn spawn_navigator(mesh: Mesh, config: &TerraConfig, metrics: Metrics) -> JoinHandle<()> {
    let mut nav = Navigator {
        planner: PathPlanner::new(config.navigation.clone()),
        executor: PathExecutor::new(config.navigation.waypoint_reached_threshold_m),
        mesh: mesh.clone(),
        metrics,
        boundary_enforcement: config.safety.boundary_enforcement_enabled,
        safety_margin_m: config.navigation.safety_margin_m,
        default_speed_mps: config.operation.work_speed_mps,
        target_speed_mps: 0.0,
        pose: None,
        obstacles: Vec::new(),
        out_of_bounds: false,
    };

    let (_s1, mut poses) = mesh.subscribe(TOPIC_POSE_UPDATED);
    let (_s2, mut maps) = mesh.subscribe(TOPIC_OBSTACLE_MAP_UPDATED);
    let (_s3, mut commands) = mesh.subscribe("command.*");
    let set_path = mesh.register_handler(REQ_NAV_SET_PATH);
    let cancel = mesh.register_handler(REQ_NAV_CANCEL);
    info!("navigator started");

    tokio::spawn(async move {
        let (Ok((_h1, mut set_path_jobs)), Ok((_h2, mut cancel_jobs))) = (set_path, cancel) else {
            warn!("navigator request handlers already taken; navigator not started");
            return;
        };
        // Fixed-rate status on top of the change-triggered publishes.
        let mut status_ticker = tokio::time::interval(Duration::from_secs(1));
        status_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = status_ticker.tick() => {
                    nav.publish_status(false);
                }
                msg = poses.recv() => match msg {
                    Some(envelope) => {
                        if let BusMessage::Pose(pose) = envelope.payload {
                            nav.on_pose(pose);
                        }
                    }
                    None => break,
                },
                msg = maps.recv() => match msg {
                    Some(envelope) => {
                        if let BusMessage::ObstacleMap(snap) = envelope.payload {
                            nav.on_obstacles(snap.obstacles);
                        }
                    }
                    None => break,
                },
                msg = commands.recv() => match msg {
                    Some(envelope) => {
                        if let BusMessage::Command(env) = envelope.payload {
                            nav.on_command(&env.command);
                        }
                    }
                    None => break,
                },
                job = set_path_jobs.recv() => match job {
                    Some(job) => nav.on_set_path_request(job),
                    None => break,
                },
                job = cancel_jobs.recv() => match job {
                    Some(job) => {
                        nav.executor.cancel();
                        nav.target_speed_mps = 0.0;
                        nav.publish_status(false);
                        let _ = job.reply.send(Ok(BusMessage::Value(serde_json::json!({ "ok": true }))));
                    }
                    None => break,
                },
            }
        }
    })
}
