//! Obstacle map: detection fusion, track association, classification.
//!
//! Per 20 Hz tick:
//!
//! 1. Group concurrent detections by proximity and fuse each group into one
//!    observation (confidence-weighted centroid, maximum size).
//! 2. Associate observations with tracks by nearest neighbour inside the
//!    association gate; matched tracks get an EMA position update, a
//!    finite-difference velocity and a confidence raise.
//! 3. Unmatched tracks coast on their last velocity and decay linearly;
//!    tracks below the confidence floor are dropped.
//! 4. Unmatched observations are admitted as new `Unknown` tracks.
//! 5. Moving tracks are classified by size/velocity profile (a camera hint
//!    for a living kind always wins); stationary tracks become `Static`.

use std::collections::HashMap;
use tracing::debug;

use terra_common::clock::ns_to_s;
use terra_common::config::ObstacleConfig;
use terra_common::geometry::{circle_intersects_corridor, Vec3};
use terra_common::types::obstacle::{
    Detection, Obstacle, ObstacleKind, ObstacleMapSnapshot,
};

/// Speed below which a track counts as stationary [m/s].
const STATIONARY_SPEED: f64 = 0.15;

/// One fused observation (output of the proximity grouping).
#[derive(Debug, Clone, Copy)]
struct FusedDetection {
    position: Vec3,
    size: f64,
    confidence: f64,
    hint: Option<ObstacleKind>,
    timestamp_ns: u64,
}

/// A tracked obstacle with bookkeeping.
#[derive(Debug, Clone, Copy)]
struct Track {
    obstacle: Obstacle,
    hint: Option<ObstacleKind>,
}

/// The obstacle map. Single writer of the tracked obstacle set.
pub struct ObstacleMap {
    cfg: ObstacleConfig,
    tracks: HashMap<u32, Track>,
    next_id: u32,
    pending: Vec<Detection>,
    last_tick_ns: u64,
}

impl ObstacleMap {
    pub fn new(cfg: ObstacleConfig, now_ns: u64) -> Self {
        Self {
            cfg,
            tracks: HashMap::new(),
            next_id: 1,
            pending: Vec::new(),
            last_tick_ns: now_ns,
        }
    }

    /// Buffer detections until the next tick.
    pub fn ingest(&mut self, detections: &[Detection]) {
        self.pending.extend_from_slice(detections);
    }

    /// Number of live tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Run one tick and return the published snapshot.
    pub fn tick(&mut self, now_ns: u64) -> ObstacleMapSnapshot {
        let dt = ns_to_s(now_ns.saturating_sub(self.last_tick_ns));
        self.last_tick_ns = now_ns;

        let detections = std::mem::take(&mut self.pending);
        let fused = self.fuse(detections);
        let matched_tracks = self.associate(&fused);
        self.age_unmatched(&matched_tracks, dt);
        self.classify();

        ObstacleMapSnapshot {
            obstacles: self.snapshot_vec(),
            timestamp_ns: now_ns,
        }
    }

    /// Sorted (by id) copy of the live tracks.
    fn snapshot_vec(&self) -> Vec<Obstacle> {
        let mut v: Vec<Obstacle> = self.tracks.values().map(|t| t.obstacle).collect();
        v.sort_by_key(|o| o.id);
        v
    }

    /// Greedy proximity grouping into confidence-weighted centroids.
    fn fuse(&self, detections: Vec<Detection>) -> Vec<FusedDetection> {
        let mut groups: Vec<Vec<Detection>> = Vec::new();
        'outer: for det in detections {
            for group in &mut groups {
                let centroid = Self::centroid(group);
                if centroid.distance_xy(det.position) <= self.cfg.fusion_radius_m {
                    group.push(det);
                    continue 'outer;
                }
            }
            groups.push(vec![det]);
        }

        groups
            .into_iter()
            .map(|group| {
                let total: f64 = group.iter().map(|d| d.confidence).sum();
                let mut pos = Vec3::ZERO;
                for d in &group {
                    pos = pos + d.position.scale(d.confidence / total.max(f64::EPSILON));
                }
                let size = group.iter().map(|d| d.size).fold(0.0, f64::max);
                let confidence = group
                    .iter()
                    .map(|d| d.confidence)
                    .fold(0.0, f64::max);
                // The most confident classifier hint wins the group.
                let hint = group
                    .iter()
                    .filter(|d| d.hint.is_some())
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                    .and_then(|d| d.hint);
                let timestamp_ns = group.iter().map(|d| d.timestamp_ns).max().unwrap_or(0);
                FusedDetection {
                    position: pos,
                    size,
                    confidence,
                    hint,
                    timestamp_ns,
                }
            })
            .collect()
    }

    fn centroid(group: &[Detection]) -> Vec3 {
        let mut c = Vec3::ZERO;
        for d in group {
            c = c + d.position;
        }
        c.scale(1.0 / group.len().max(1) as f64)
    }

    /// Nearest-neighbour association; returns the set of matched track ids.
    fn associate(&mut self, fused: &[FusedDetection]) -> Vec<u32> {
        let mut matched: Vec<u32> = Vec::new();
        for obs in fused {
            let nearest = self
                .tracks
                .iter()
                .filter(|(id, _)| !matched.contains(*id))
                .map(|(id, t)| (*id, t.obstacle.position.distance_xy(obs.position)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .filter(|(_, d)| *d <= self.cfg.association_radius_m);

            match nearest {
                Some((id, _)) => {
                    matched.push(id);
                    let track = self.tracks.get_mut(&id).unwrap();
                    let o = &mut track.obstacle;
                    let dt = ns_to_s(obs.timestamp_ns.saturating_sub(o.last_seen_ns));
                    if dt > 1e-3 {
                        let moved = obs.position - o.position;
                        o.velocity = moved.scale(1.0 / dt);
                    }
                    let a = self.cfg.position_smoothing_alpha;
                    o.position = o.position.scale(1.0 - a) + obs.position.scale(a);
                    o.size = o.size.max(obs.size);
                    if obs.confidence > o.confidence {
                        o.confidence += 0.5 * (obs.confidence - o.confidence);
                    }
                    o.last_seen_ns = obs.timestamp_ns;
                    if obs.hint.is_some() {
                        track.hint = obs.hint;
                    }
                }
                None => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1).max(1);
                    self.tracks.insert(
                        id,
                        Track {
                            obstacle: Obstacle {
                                id,
                                position: obs.position,
                                size: obs.size,
                                velocity: Vec3::ZERO,
                                confidence: obs.confidence,
                                kind: ObstacleKind::Unknown,
                                last_seen_ns: obs.timestamp_ns,
                            },
                            hint: obs.hint,
                        },
                    );
                    matched.push(id);
                    debug!(id, "admitted new obstacle track");
                }
            }
        }
        matched
    }

    /// Coast, decay and prune tracks that saw no detection this tick.
    fn age_unmatched(&mut self, matched: &[u32], dt: f64) {
        let decay = self.cfg.confidence_decay_rate_per_s * dt;
        let min = self.cfg.min_obstacle_confidence;
        self.tracks.retain(|id, track| {
            if matched.contains(id) {
                return true;
            }
            let o = &mut track.obstacle;
            o.position = o.position + o.velocity.scale(dt);
            o.confidence -= decay;
            if o.confidence < min {
                debug!(id, "dropped stale obstacle track");
                false
            } else {
                true
            }
        });
    }

    /// Size/velocity profile classification; a living hint always wins.
    fn classify(&mut self) {
        for track in self.tracks.values_mut() {
            let o = &mut track.obstacle;
            if let Some(hint) = track.hint {
                if hint.is_living() {
                    o.kind = hint;
                    continue;
                }
            }
            let speed = o.speed();
            o.kind = if speed <= STATIONARY_SPEED {
                ObstacleKind::Static
            } else if o.size < 0.6 && speed < 2.5 {
                ObstacleKind::Human
            } else if o.size < 1.2 && speed < 8.0 {
                ObstacleKind::Animal
            } else if o.size >= 1.2 || speed >= 3.0 {
                ObstacleKind::Vehicle
            } else {
                ObstacleKind::Dynamic
            };
        }
    }

    /// All tracks whose bounding volume intersects the swept rectangle from
    /// `start` to `end` with full width `width`.
    pub fn corridor_query(&self, start: Vec3, end: Vec3, width: f64) -> Vec<Obstacle> {
        let half = width / 2.0;
        let mut hits: Vec<Obstacle> = self
            .tracks
            .values()
            .filter(|t| {
                circle_intersects_corridor(t.obstacle.position, t.obstacle.size, start, end, half)
            })
            .map(|t| t.obstacle)
            .collect();
        hits.sort_by_key(|o| o.id);
        hits
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use terra_common::types::obstacle::DetectionSource;

    const MS: u64 = 1_000_000;

    fn map() -> ObstacleMap {
        ObstacleMap::new(ObstacleConfig::default(), 0)
    }

    fn det(x: f64, y: f64, conf: f64, ts: u64) -> Detection {
        Detection {
            position: Vec3::planar(x, y),
            size: 0.5,
            confidence: conf,
            source: DetectionSource::Lidar,
            hint: None,
            timestamp_ns: ts,
        }
    }

    #[test]
    fn new_detection_becomes_unknown_track() {
        let mut m = map();
        m.ingest(&[det(5.0, 0.0, 0.8, 50 * MS)]);
        let snap = m.tick(50 * MS);
        assert_eq!(snap.obstacles.len(), 1);
        assert_eq!(snap.obstacles[0].kind, ObstacleKind::Static);
        assert_eq!(m.track_count(), 1);
    }

    #[test]
    fn nearby_detections_fuse_into_one() {
        let mut m = map();
        m.ingest(&[det(5.0, 0.0, 0.8, 0), det(5.4, 0.1, 0.4, 0)]);
        let snap = m.tick(50 * MS);
        assert_eq!(snap.obstacles.len(), 1);
        // Weighted centroid leans toward the confident detection.
        assert!(snap.obstacles[0].position.x < 5.2);
    }

    #[test]
    fn distant_detections_stay_separate() {
        let mut m = map();
        m.ingest(&[det(5.0, 0.0, 0.8, 0), det(15.0, 0.0, 0.8, 0)]);
        let snap = m.tick(50 * MS);
        assert_eq!(snap.obstacles.len(), 2);
    }

    #[test]
    fn association_tracks_motion_and_velocity() {
        let mut m = map();
        m.ingest(&[det(5.0, 0.0, 0.8, 0)]);
        m.tick(0);
        // One second later, one metre further.
        m.ingest(&[det(6.0, 0.0, 0.8, 1_000 * MS)]);
        let snap = m.tick(1_000 * MS);
        assert_eq!(snap.obstacles.len(), 1, "must re-associate, not duplicate");
        let o = snap.obstacles[0];
        assert!(o.velocity.x > 0.5, "finite-difference velocity: {:?}", o.velocity);
        assert!(o.position.x > 5.0);
    }

    #[test]
    fn unmatched_track_decays_and_drops() {
        let cfg = ObstacleConfig::default();
        let mut m = map();
        m.ingest(&[det(5.0, 0.0, 0.4, 0)]);
        m.tick(0);
        // Decay 0.2/s from 0.4 crosses the 0.15 floor within ~1.3 s.
        let mut dropped_at = None;
        for i in 1..40u64 {
            let snap = m.tick(i * 100 * MS);
            if snap.obstacles.is_empty() {
                dropped_at = Some(i);
                break;
            }
        }
        let i = dropped_at.expect("track must eventually drop");
        let elapsed_s = i as f64 * 0.1;
        let expected_s = (0.4 - cfg.min_obstacle_confidence) / cfg.confidence_decay_rate_per_s;
        assert!((elapsed_s - expected_s).abs() < 0.3, "dropped after {elapsed_s}s");
    }

    #[test]
    fn camera_hint_pins_living_kind() {
        let mut m = map();
        m.ingest(&[Detection {
            hint: Some(ObstacleKind::Human),
            source: DetectionSource::Camera,
            ..det(3.0, 0.0, 0.9, 0)
        }]);
        let snap = m.tick(0);
        // Stationary, but the classifier hint wins.
        assert_eq!(snap.obstacles[0].kind, ObstacleKind::Human);
    }

    #[test]
    fn large_fast_track_classifies_as_vehicle() {
        let mut m = map();
        let mut d = det(0.0, 0.0, 0.9, 0);
        d.size = 2.0;
        m.ingest(&[d]);
        m.tick(0);
        let mut d2 = det(1.5, 0.0, 0.9, 1_000 * MS);
        d2.size = 2.0;
        m.ingest(&[d2]);
        let snap = m.tick(1_000 * MS);
        assert_eq!(snap.obstacles[0].kind, ObstacleKind::Vehicle);
    }

    #[test]
    fn corridor_query_hits_touching_tracks() {
        let mut m = map();
        m.ingest(&[det(5.0, 0.5, 0.9, 0), det(5.0, 8.0, 0.9, 0)]);
        m.tick(0);
        let hits = m.corridor_query(Vec3::ZERO, Vec3::planar(10.0, 0.0), 2.0);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].position.y - 0.5).abs() < 0.1);
    }
}
