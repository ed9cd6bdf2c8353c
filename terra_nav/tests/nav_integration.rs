//! Navigation scenarios: obstacle-triggered replanning through the mesh,
//! and sustained GPS loss in the localisation filter.

use std::time::Duration;

use terra_common::clock::monotonic_ns;
use terra_common::config::{LocalisationConfig, TerraConfig};
use terra_common::consts::{
    REQ_NAV_SET_PATH, TOPIC_NAV_STATUS, TOPIC_OBSTACLE_MAP_UPDATED, TOPIC_POSE_UPDATED,
};
use terra_common::geometry::{point_segment_distance, Vec3};
use terra_common::metrics::{Metrics, METRIC_REPLAN_COUNT};
use terra_common::types::bus::BusMessage;
use terra_common::types::obstacle::{Obstacle, ObstacleKind, ObstacleMapSnapshot};
use terra_common::types::pose::Pose;
use terra_common::types::sensor::SensorSample;
use terra_nav::localisation::LocalisationFilter;
use terra_nav::tasks::spawn_navigator;
use terra_mesh::{Mesh, RequestOutcome};

fn config() -> TerraConfig {
    toml::from_str(
        r#"
[machine]
name = "nav-test"

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

fn obstacle_at(x: f64, y: f64, size: f64) -> ObstacleMapSnapshot {
    ObstacleMapSnapshot {
        obstacles: vec![Obstacle {
            id: 7,
            position: Vec3::planar(x, y),
            size,
            velocity: Vec3::ZERO,
            confidence: 0.9,
            kind: ObstacleKind::Static,
            last_seen_ns: monotonic_ns(),
        }],
        timestamp_ns: monotonic_ns(),
    }
}

#[tokio::test]
async fn obstacle_on_remaining_path_triggers_replan() {
    let metrics = Metrics::new();
    let mesh = Mesh::new(metrics.clone());
    let cfg = config();
    let (_sub, mut nav_rx) = mesh.subscribe(TOPIC_NAV_STATUS);
    let _nav = spawn_navigator(mesh.clone(), &cfg, metrics.clone());

    // Give the navigator a pose, then install the path [(0,0),(10,0),(10,10)].
    mesh.publish(TOPIC_POSE_UPDATED, BusMessage::Pose(pose_at(0.0, 0.0)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = mesh
        .request(
            REQ_NAV_SET_PATH,
            BusMessage::Value(serde_json::json!({
                "waypoints": [[10.0, 0.0], [10.0, 10.0]],
                "speed": 1.0,
            })),
            Duration::from_secs(2),
        )
        .await;
    assert!(matches!(outcome, RequestOutcome::Ok(_)), "{outcome:?}");

    // Wait for the install status: active, not a replan.
    loop {
        let env = tokio::time::timeout(Duration::from_secs(1), nav_rx.recv())
            .await
            .expect("install status must arrive")
            .unwrap();
        if let BusMessage::Nav(status) = env.payload {
            if status.active {
                assert!(!status.replanned);
                break;
            }
        }
    }

    // Inject an obstacle blocking the first leg.
    mesh.publish(
        TOPIC_OBSTACLE_MAP_UPDATED,
        BusMessage::ObstacleMap(obstacle_at(5.0, 0.5, 1.0)),
    );

    // Expect a replanned status whose path clears the obstacle.
    let status = loop {
        let env = tokio::time::timeout(Duration::from_secs(2), nav_rx.recv())
            .await
            .expect("replanned status must arrive")
            .unwrap();
        if let BusMessage::Nav(status) = env.payload {
            if status.replanned {
                break status;
            }
        }
    };

    assert_eq!(status.current_waypoint_index, 1);
    assert!(status.active);
    let centre = Vec3::planar(5.0, 0.5);
    for pair in status.path.windows(2) {
        let d = point_segment_distance(centre, pair[0], pair[1]);
        assert!(
            d > 1.0 + cfg.navigation.safety_margin_m - 1e-9,
            "replanned segment too close to the obstacle: {d}"
        );
    }
    assert_eq!(metrics.get(METRIC_REPLAN_COUNT), 1.0);
}

#[tokio::test]
async fn unreachable_goal_cancels_the_path() {
    let metrics = Metrics::new();
    let mesh = Mesh::new(metrics.clone());
    let cfg = config();
    let (_sub, mut nav_rx) = mesh.subscribe(TOPIC_NAV_STATUS);
    let _nav = spawn_navigator(mesh.clone(), &cfg, metrics);

    mesh.publish(TOPIC_POSE_UPDATED, BusMessage::Pose(pose_at(0.0, 0.0)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = mesh
        .request(
            REQ_NAV_SET_PATH,
            BusMessage::Value(serde_json::json!({ "waypoints": [[10.0, 0.0]] })),
            Duration::from_secs(2),
        )
        .await;
    assert!(matches!(outcome, RequestOutcome::Ok(_)));
    // Wait until the path is installed.
    loop {
        let env = tokio::time::timeout(Duration::from_secs(1), nav_rx.recv())
            .await
            .expect("install status must arrive")
            .unwrap();
        if let BusMessage::Nav(status) = env.payload {
            if status.active {
                break;
            }
        }
    }

    // Box the goal in with overlapping obstacles.
    let ring: Vec<Obstacle> = (0..12)
        .map(|i| {
            let a = i as f64 * std::f64::consts::TAU / 12.0;
            Obstacle {
                id: 100 + i as u32,
                position: Vec3::planar(10.0 + 3.0 * a.cos(), 3.0 * a.sin()),
                size: 1.8,
                velocity: Vec3::ZERO,
                confidence: 0.9,
                kind: ObstacleKind::Static,
                last_seen_ns: monotonic_ns(),
            }
        })
        .collect();
    mesh.publish(
        TOPIC_OBSTACLE_MAP_UPDATED,
        BusMessage::ObstacleMap(ObstacleMapSnapshot {
            obstacles: ring,
            timestamp_ns: monotonic_ns(),
        }),
    );

    // The replan fails and the navigator cancels the path.
    let status = loop {
        let env = tokio::time::timeout(Duration::from_secs(5), nav_rx.recv())
            .await
            .expect("cancel status must arrive")
            .unwrap();
        if let BusMessage::Nav(status) = env.payload {
            if !status.active {
                break status;
            }
        }
    };
    assert_eq!(status.target_speed_mps, 0.0);
}

#[tokio::test]
async fn corridor_query_round_trip() {
    let mesh = Mesh::new(Metrics::new());
    let cfg = config();
    let _map = terra_nav::tasks::spawn_obstacle_map(mesh.clone(), &cfg);

    // Feed one lidar cluster and let a tick admit it.
    mesh.publish(
        "sensor.lidar.updated",
        BusMessage::Sensor(SensorSample::LidarClusters {
            detections: vec![terra_common::types::obstacle::Detection {
                position: Vec3::planar(5.0, 0.5),
                size: 0.5,
                confidence: 0.9,
                source: terra_common::types::obstacle::DetectionSource::Lidar,
                hint: None,
                timestamp_ns: monotonic_ns(),
            }],
            timestamp_ns: monotonic_ns(),
        }),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = mesh
        .request(
            terra_common::consts::REQ_OBSTACLE_CORRIDOR,
            BusMessage::Value(serde_json::json!({
                "start": [0.0, 0.0],
                "end": [10.0, 0.0],
                "width": 2.0,
            })),
            Duration::from_secs(1),
        )
        .await;
    match outcome {
        RequestOutcome::Ok(BusMessage::ObstacleMap(snap)) => {
            assert_eq!(snap.obstacles.len(), 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // A corridor elsewhere is clear.
    let outcome = mesh
        .request(
            terra_common::consts::REQ_OBSTACLE_CORRIDOR,
            BusMessage::Value(serde_json::json!({
                "start": [0.0, 20.0],
                "end": [10.0, 20.0],
                "width": 2.0,
            })),
            Duration::from_secs(1),
        )
        .await;
    match outcome {
        RequestOutcome::Ok(BusMessage::ObstacleMap(snap)) => {
            assert!(snap.obstacles.is_empty());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

/// Ten seconds of good GPS, then ten seconds below the quality threshold:
/// dead reckoning keeps the position advancing, the uncertainty strictly
/// grows each tick, and the orientation still follows the IMU.
#[test]
fn gps_loss_switches_to_dead_reckoning() {
    const S: u64 = 1_000_000_000;
    let cfg = LocalisationConfig::default();
    let mut filter = LocalisationFilter::new(cfg, 0);

    let mut ts = 0u64;
    // Phase one: strong fixes, vehicle driving east at 1 m/s.
    for i in 1..=100u64 {
        ts = i * S / 10;
        filter.ingest(&SensorSample::Gps {
            position: Vec3::planar(i as f64 * 0.1, 0.0),
            quality: 0.9,
            variance: 0.09,
            timestamp_ns: ts,
        });
        filter.ingest(&SensorSample::WheelOdometry {
            displacement: Vec3::planar(0.1, 0.0),
            speed: 1.0,
            variance: 0.001,
            timestamp_ns: ts,
        });
        filter.ingest(&SensorSample::Imu {
            angular_rate: Vec3::new(0.0, 0.0, 0.01),
            acceleration: Vec3::new(0.0, 0.0, 9.81),
            accel_roll: 0.0,
            accel_pitch: 0.0,
            variance: 0.001,
            timestamp_ns: ts,
        });
        filter.tick(ts);
    }
    let end_of_fix = filter.pose();
    assert!(end_of_fix.position.x > 8.0);
    assert!(end_of_fix.position_uncertainty < 1.0);

    // Phase two: quality collapses; fixes keep coming but must be ignored.
    let mut prev = filter.pose();
    let mut yaw_moved = false;
    for i in 101..=200u64 {
        ts = i * S / 10;
        filter.ingest(&SensorSample::Gps {
            position: Vec3::planar(0.0, 0.0), // wildly wrong fix
            quality: 0.1,
            variance: 0.09,
            timestamp_ns: ts,
        });
        filter.ingest(&SensorSample::WheelOdometry {
            displacement: Vec3::planar(0.1, 0.0),
            speed: 1.0,
            variance: 0.001,
            timestamp_ns: ts,
        });
        filter.ingest(&SensorSample::Imu {
            angular_rate: Vec3::new(0.0, 0.0, 0.05),
            acceleration: Vec3::new(0.0, 0.0, 9.81),
            accel_roll: 0.0,
            accel_pitch: 0.0,
            variance: 0.001,
            timestamp_ns: ts,
        });
        let pose = filter.tick(ts);
        assert!(
            pose.position_uncertainty > prev.position_uncertainty,
            "uncertainty must strictly grow while dead reckoning (tick {i})"
        );
        assert!(
            pose.position.distance_xy(prev.position) > 0.0,
            "dead reckoning must keep advancing"
        );
        if pose.yaw > prev.yaw {
            yaw_moved = true;
        }
        prev = pose;
    }
    assert!(yaw_moved, "orientation must still follow the IMU");
    // The bogus (0,0) fixes never captured the estimate.
    assert!(prev.position.x > end_of_fix.position.x);
}
