//! Obstacle detections and tracked obstacles.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;

/// Sensor that produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Lidar,
    Camera,
    Ultrasonic,
}

/// A raw (pre-association) detection from one sensor cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Detection {
    /// Position in the local ENU frame [m].
    pub position: Vec3,
    /// Bounding radius [m].
    pub size: f64,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    pub source: DetectionSource,
    /// Classification hint from an upstream classifier (camera only).
    pub hint: Option<ObstacleKind>,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

/// Classified kind of a tracked obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    Unknown,
    Static,
    Dynamic,
    Human,
    Animal,
    Vehicle,
}

impl ObstacleKind {
    /// Kinds that demand the tighter safe-distance policy.
    #[inline]
    pub const fn is_living(&self) -> bool {
        matches!(self, ObstacleKind::Human | ObstacleKind::Animal)
    }
}

/// A tracked obstacle as maintained by the obstacle map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: u32,
    /// Position in the local ENU frame [m].
    pub position: Vec3,
    /// Bounding radius [m].
    pub size: f64,
    /// Estimated velocity [m/s].
    pub velocity: Vec3,
    /// Track confidence in `[0, 1]`.
    pub confidence: f64,
    pub kind: ObstacleKind,
    /// Monotonic timestamp of the last matched detection [ns].
    pub last_seen_ns: u64,
}

impl Obstacle {
    /// Ground speed of the track [m/s].
    #[inline]
    pub fn speed(&self) -> f64 {
        self.velocity.norm_xy()
    }
}

/// Immutable snapshot of all tracked obstacles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObstacleMapSnapshot {
    pub obstacles: Vec<Obstacle>,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}
