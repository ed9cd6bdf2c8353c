//! Path planner and waypoint executor.
//!
//! Planning strategy:
//!
//! 1. If the direct corridor from start to goal is clear, the path is
//!    `[start, goal]`.
//! 2. Otherwise run an 8-connected grid search over the field polygon with
//!    obstacles inflated by the safety margin, smooth out collinear points,
//!    and validate the result against every obstacle.
//! 3. On validation failure, replan once with a coarser grid and a wider
//!    margin; if that also fails the goal is unreachable.
//!
//! All geometry is in the local ENU frame; ties between equally long paths
//! break toward the smallest cumulative heading change.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use thiserror::Error;
use tracing::{debug, warn};

use terra_common::config::NavigationConfig;
use terra_common::geometry::{circle_intersects_corridor, point_segment_distance, Polygon, Vec3};
use terra_common::types::obstacle::Obstacle;

/// Planning failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// No collision-free path exists, even with the conservative fallback.
    #[error("goal unreachable")]
    Unreachable,
    /// Start or goal lies outside the configured field polygon.
    #[error("point outside field boundary")]
    OutsideBoundary,
}

/// Collinearity tolerance for path smoothing [m].
const SMOOTHING_TOLERANCE_M: f64 = 0.05;
/// Fallback margin multiplier for the conservative replan.
const FALLBACK_MARGIN_FACTOR: f64 = 1.5;
/// Fallback grid coarsening factor.
const FALLBACK_GRID_FACTOR: f64 = 2.0;
/// Padding around start/goal when no field polygon is configured [m].
const UNBOUNDED_PADDING_M: f64 = 25.0;
/// Heading-change tie-break weight (small against metre-scale costs).
const TURN_PENALTY: f64 = 1e-3;

/// The path planner. Owns the field polygon.
pub struct PathPlanner {
    cfg: NavigationConfig,
    boundary: Polygon,
}

impl PathPlanner {
    pub fn new(cfg: NavigationConfig) -> Self {
        let boundary = cfg.boundary_polygon();
        Self { cfg, boundary }
    }

    /// Replace the field polygon (from `set_boundaries`).
    pub fn set_boundary(&mut self, boundary: Polygon) {
        self.boundary = boundary;
    }

    /// Current field polygon.
    pub fn boundary(&self) -> &Polygon {
        &self.boundary
    }

    /// Whether a point lies inside the field (vacuously true with no
    /// polygon configured).
    pub fn in_bounds(&self, p: Vec3) -> bool {
        !self.boundary.is_valid() || self.boundary.contains(p)
    }

    /// Plan a path from `start` to `goal` around the given obstacles.
    pub fn plan(
        &self,
        start: Vec3,
        goal: Vec3,
        obstacles: &[Obstacle],
    ) -> Result<Vec<Vec3>, PlanError> {
        if !self.in_bounds(start) || !self.in_bounds(goal) {
            return Err(PlanError::OutsideBoundary);
        }

        if self.corridor_clear(start, goal, obstacles, self.cfg.safety_margin_m) {
            return Ok(vec![start, goal]);
        }

        let first = self.grid_plan(
            start,
            goal,
            obstacles,
            self.cfg.grid_resolution_m,
            self.cfg.safety_margin_m,
        );
        if let Some(path) = first {
            let smoothed = smooth(path);
            if self.validate(&smoothed, obstacles, self.cfg.safety_margin_m) {
                return Ok(smoothed);
            }
            debug!("smoothed path failed validation; conservative replan");
        }

        // Conservative fallback: coarser grid, wider margin.
        let margin = self.cfg.safety_margin_m * FALLBACK_MARGIN_FACTOR;
        let fallback = self.grid_plan(
            start,
            goal,
            obstacles,
            self.cfg.grid_resolution_m * FALLBACK_GRID_FACTOR,
            margin,
        );
        match fallback {
            Some(path) => {
                let smoothed = smooth(path);
                if self.validate(&smoothed, obstacles, self.cfg.safety_margin_m) {
                    Ok(smoothed)
                } else {
                    warn!("fallback plan failed validation");
                    Err(PlanError::Unreachable)
                }
            }
            None => Err(PlanError::Unreachable),
        }
    }

    /// Whether the swept corridor between two points is free of obstacles
    /// with the given margin.
    pub fn corridor_clear(
        &self,
        start: Vec3,
        end: Vec3,
        obstacles: &[Obstacle],
        margin: f64,
    ) -> bool {
        let half = self.cfg.safety_corridor_width_m / 2.0 + margin;
        !obstacles
            .iter()
            .any(|o| circle_intersects_corridor(o.position, o.size, start, end, half))
    }

    /// Every segment keeps at least `margin` clearance from every obstacle
    /// and stays inside the field.
    fn validate(&self, path: &[Vec3], obstacles: &[Obstacle], margin: f64) -> bool {
        if path.len() < 2 {
            return false;
        }
        for p in path {
            if !self.in_bounds(*p) {
                return false;
            }
        }
        for pair in path.windows(2) {
            for o in obstacles {
                if point_segment_distance(o.position, pair[0], pair[1]) <= o.size + margin {
                    return false;
                }
            }
        }
        true
    }

    /// 8-connected A* over the planning window.
    fn grid_plan(
        &self,
        start: Vec3,
        goal: Vec3,
        obstacles: &[Obstacle],
        resolution: f64,
        margin: f64,
    ) -> Option<Vec<Vec3>> {
        let (min_x, min_y, max_x, max_y) = self.window(start, goal);
        let cols = (((max_x - min_x) / resolution).ceil() as usize).max(2);
        let rows = (((max_y - min_y) / resolution).ceil() as usize).max(2);
        if cols * rows > 4_000_000 {
            warn!(cols, rows, "planning window too large");
            return None;
        }

        let to_cell = |p: Vec3| -> (usize, usize) {
            let cx = (((p.x - min_x) / resolution).round() as isize).clamp(0, cols as isize - 1);
            let cy = (((p.y - min_y) / resolution).round() as isize).clamp(0, rows as isize - 1);
            (cx as usize, cy as usize)
        };
        let to_point = |c: (usize, usize)| -> Vec3 {
            Vec3::planar(min_x + c.0 as f64 * resolution, min_y + c.1 as f64 * resolution)
        };

        let blocked = |c: (usize, usize)| -> bool {
            let p = to_point(c);
            if !self.in_bounds(p) {
                return true;
            }
            obstacles
                .iter()
                .any(|o| o.position.distance_xy(p) <= o.size + margin)
        };

        let start_cell = to_cell(start);
        let goal_cell = to_cell(goal);
        if blocked(goal_cell) {
            return None;
        }

        let idx = |c: (usize, usize)| c.1 * cols + c.0;
        let mut g_score = vec![f64::INFINITY; cols * rows];
        let mut parent: Vec<Option<(usize, usize)>> = vec![None; cols * rows];
        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();

        g_score[idx(start_cell)] = 0.0;
        heap.push(Reverse(HeapEntry {
            f: start.distance_xy(goal),
            cell: start_cell,
        }));

        const NEIGHBOURS: [(isize, isize); 8] = [
            (1, 0),
            (-1, 0),
            (0, 1),
            (0, -1),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ];

        while let Some(Reverse(entry)) = heap.pop() {
            let cell = entry.cell;
            if cell == goal_cell {
                // Reconstruct, cell-centre points bracketed by exact
                // start/goal.
                let mut cells = vec![cell];
                let mut cur = cell;
                while let Some(p) = parent[idx(cur)] {
                    cells.push(p);
                    cur = p;
                }
                cells.reverse();
                let mut path: Vec<Vec3> = Vec::with_capacity(cells.len() + 2);
                path.push(start);
                path.extend(cells.into_iter().map(to_point));
                path.push(goal);
                return Some(path);
            }

            let g_here = g_score[idx(cell)];
            for (dx, dy) in NEIGHBOURS {
                let nx = cell.0 as isize + dx;
                let ny = cell.1 as isize + dy;
                if nx < 0 || ny < 0 || nx >= cols as isize || ny >= rows as isize {
                    continue;
                }
                let next = (nx as usize, ny as usize);
                if blocked(next) {
                    continue;
                }
                let step = ((dx * dx + dy * dy) as f64).sqrt() * resolution;
                // Tie-break toward straight paths: penalise direction change
                // relative to how we entered this cell.
                let turn = match parent[idx(cell)] {
                    Some(prev) => {
                        let in_dir = (
                            cell.0 as isize - prev.0 as isize,
                            cell.1 as isize - prev.1 as isize,
                        );
                        if in_dir == (dx, dy) {
                            0.0
                        } else {
                            TURN_PENALTY
                        }
                    }
                    None => 0.0,
                };
                let tentative = g_here + step + turn;
                if tentative < g_score[idx(next)] {
                    g_score[idx(next)] = tentative;
                    parent[idx(next)] = Some(cell);
                    heap.push(Reverse(HeapEntry {
                        f: tentative + to_point(next).distance_xy(goal),
                        cell: next,
                    }));
                }
            }
        }
        None
    }

    /// Planning window: field bounding box, or a padded box around
    /// start/goal when no polygon is configured.
    fn window(&self, start: Vec3, goal: Vec3) -> (f64, f64, f64, f64) {
        if let Some(bbox) = self.boundary.bounding_box() {
            if self.boundary.is_valid() {
                return bbox;
            }
        }
        (
            start.x.min(goal.x) - UNBOUNDED_PADDING_M,
            start.y.min(goal.y) - UNBOUNDED_PADDING_M,
            start.x.max(goal.x) + UNBOUNDED_PADDING_M,
            start.y.max(goal.y) + UNBOUNDED_PADDING_M,
        )
    }
}

/// Heap entry ordered by f-score.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapEntry {
    f: f64,
    cell: (usize, usize),
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.f
            .total_cmp(&other.f)
            .then_with(|| self.cell.cmp(&other.cell))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Remove points collinear with their neighbours within tolerance.
pub fn smooth(path: Vec<Vec3>) -> Vec<Vec3> {
    if path.len() <= 2 {
        return path;
    }
    let mut out: Vec<Vec3> = vec![path[0]];
    for i in 1..path.len() - 1 {
        let prev = *out.last().expect("never empty");
        let next = path[i + 1];
        if point_segment_distance(path[i], prev, next) > SMOOTHING_TOLERANCE_M {
            out.push(path[i]);
        }
    }
    out.push(path[path.len() - 1]);
    out
}

// ─── Executor ───────────────────────────────────────────────────────

/// Event produced by one executor advance step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdvanceEvent {
    /// Still driving toward the current waypoint.
    None,
    /// A waypoint was consumed; index is the waypoint just reached.
    WaypointReached(usize),
    /// The final waypoint was consumed.
    Complete,
}

/// Waypoint executor. Owns the active path and the monotone index.
pub struct PathExecutor {
    path: Vec<Vec3>,
    current_index: usize,
    active: bool,
    reached_threshold_m: f64,
}

impl PathExecutor {
    pub fn new(reached_threshold_m: f64) -> Self {
        Self {
            path: Vec::new(),
            current_index: 0,
            active: false,
            reached_threshold_m,
        }
    }

    /// Install a fresh path; the executor starts at index 0 (the start
    /// point itself, consumed on the first advance).
    pub fn set_path(&mut self, path: Vec<Vec3>) {
        self.current_index = 0;
        self.active = !path.is_empty();
        self.path = path;
    }

    /// Install a replanned path; index resets to 1 (the first waypoint past
    /// the current pose).
    pub fn set_replanned_path(&mut self, path: Vec<Vec3>) {
        self.active = path.len() > 1;
        self.current_index = if self.active { 1 } else { 0 };
        self.path = path;
    }

    /// Clear the path and deactivate.
    pub fn cancel(&mut self) {
        self.path.clear();
        self.current_index = 0;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn path(&self) -> &[Vec3] {
        &self.path
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Waypoint currently being driven to.
    pub fn current_target(&self) -> Option<Vec3> {
        if self.active {
            self.path.get(self.current_index).copied()
        } else {
            None
        }
    }

    /// Final waypoint of the active path.
    pub fn final_goal(&self) -> Option<Vec3> {
        if self.active {
            self.path.last().copied()
        } else {
            None
        }
    }

    /// Advance on a pose update. A waypoint exactly at the threshold
    /// distance counts as reached; the index never decreases.
    pub fn advance(&mut self, position: Vec3) -> AdvanceEvent {
        if !self.active {
            return AdvanceEvent::None;
        }
        let mut event = AdvanceEvent::None;
        while let Some(target) = self.path.get(self.current_index) {
            if position.distance_xy(*target) <= self.reached_threshold_m {
                event = AdvanceEvent::WaypointReached(self.current_index);
                self.current_index += 1;
            } else {
                break;
            }
        }
        if self.current_index >= self.path.len() {
            self.active = false;
            return AdvanceEvent::Complete;
        }
        event
    }

    /// Whether any obstacle blocks the remaining path within `margin`.
    pub fn remaining_blocked(&self, position: Vec3, obstacles: &[Obstacle], margin: f64) -> bool {
        if !self.active {
            return false;
        }
        let mut prev = position;
        for wp in &self.path[self.current_index.min(self.path.len())..] {
            for o in obstacles {
                if point_segment_distance(o.position, prev, *wp) <= o.size + margin {
                    return true;
                }
            }
            prev = *wp;
        }
        false
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
