//! Plane and small-vector geometry for the local East-North-Up frame.
//!
//! All navigation and safety geometry runs in metres in the local ENU frame
//! with the yaw angle measured counter-clockwise from East. Angles are kept
//! normalised to `(-π, π]`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Add, Mul, Neg, Sub};

// ─── Vec3 ───────────────────────────────────────────────────────────

/// Three-component vector, metres in the local ENU frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Vector in the ground plane (z = 0).
    #[inline]
    pub const fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    #[inline]
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Length of the ground-plane projection.
    #[inline]
    pub fn norm_xy(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    #[inline]
    pub fn dot(&self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance_to(&self, other: Vec3) -> f64 {
        (*self - other).norm()
    }

    /// Ground-plane distance to another point.
    #[inline]
    pub fn distance_xy(&self, other: Vec3) -> f64 {
        (*self - other).norm_xy()
    }

    #[inline]
    pub fn scale(&self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    /// Heading from this point to another, radians CCW from East.
    #[inline]
    pub fn bearing_to(&self, other: Vec3) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Rotate the ground-plane components by `yaw` radians.
    #[inline]
    pub fn rotated_xy(&self, yaw: f64) -> Vec3 {
        let (s, c) = yaw.sin_cos();
        Vec3::new(self.x * c - self.y * s, self.x * s + self.y * c, self.z)
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, k: f64) -> Vec3 {
        self.scale(k)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    #[inline]
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

// ─── Angles ─────────────────────────────────────────────────────────

/// Normalise an angle to `(-π, π]`.
#[inline]
pub fn normalize_angle(a: f64) -> f64 {
    let mut a = a % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Shortest signed angular difference `target − current`, in `(-π, π]`.
#[inline]
pub fn angle_diff(target: f64, current: f64) -> f64 {
    normalize_angle(target - current)
}

// ─── Segments & corridors ───────────────────────────────────────────

/// Ground-plane distance from point `p` to the segment `a`→`b`.
pub fn point_segment_distance(p: Vec3, a: Vec3, b: Vec3) -> f64 {
    let ab = b - a;
    let len2 = ab.x * ab.x + ab.y * ab.y;
    if len2 <= f64::EPSILON {
        return p.distance_xy(a);
    }
    let t = ((p.x - a.x) * ab.x + (p.y - a.y) * ab.y) / len2;
    let t = t.clamp(0.0, 1.0);
    let proj = Vec3::planar(a.x + ab.x * t, a.y + ab.y * t);
    p.distance_xy(proj)
}

/// Whether a circle (centre, radius) intersects the swept rectangle from
/// `start` to `end` with the given half-width.
pub fn circle_intersects_corridor(
    centre: Vec3,
    radius: f64,
    start: Vec3,
    end: Vec3,
    half_width: f64,
) -> bool {
    point_segment_distance(centre, start, end) <= half_width + radius
}

// ─── Polygon ────────────────────────────────────────────────────────

/// Simple ground-plane polygon, vertices in order (either winding).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Vec3>,
}

impl Polygon {
    pub fn new(vertices: Vec<Vec3>) -> Self {
        Self { vertices }
    }

    /// A polygon needs at least three vertices to bound any area.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3
    }

    /// Even-odd point-in-polygon test on the ground plane.
    ///
    /// Degenerate polygons (fewer than three vertices) contain nothing.
    pub fn contains(&self, p: Vec3) -> bool {
        if !self.is_valid() {
            return false;
        }
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let vi = self.vertices[i];
            let vj = self.vertices[j];
            if ((vi.y > p.y) != (vj.y > p.y))
                && (p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)`.
    pub fn bounding_box(&self) -> Option<(f64, f64, f64, f64)> {
        if self.vertices.is_empty() {
            return None;
        }
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for v in &self.vertices {
            min_x = min_x.min(v.x);
            min_y = min_y.min(v.y);
            max_x = max_x.max(v.x);
            max_y = max_y.max(v.y);
        }
        Some((min_x, min_y, max_x, max_y))
    }
}
