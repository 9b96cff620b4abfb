// 2D intersection tests used for arrival, collision, and path clearance.
//
// `Region` is a convex polygon (robot footprints are rotated rectangles, goal
// footprints are axis-aligned squares). Region overlap uses the separating
// axis test; touching boundaries count as intersecting. Segment tests use
// orientation signs with a collinear-overlap fallback, so a robot edge lying
// on a wall is a hit.
//
// See also: `world.rs` for how the four robot corners are derived from
// position, size and facing; `pathfinding.rs` for the clearance check.

use crate::types::{Point, Size};

/// A line segment between two points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
}

impl Segment {
    pub const fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    pub fn intersects(&self, other: &Segment) -> bool {
        segments_intersect(self.a, self.b, other.a, other.b)
    }

    /// Shortest distance from `p` to any point on the segment.
    pub fn distance_to(&self, p: Point) -> f64 {
        point_segment_distance(p, self.a, self.b)
    }
}

/// Sign of the cross product (b - a) × (c - a).
fn orientation(a: Point, b: Point, c: Point) -> i64 {
    let (ax, ay) = (i64::from(a.x), i64::from(a.y));
    let cross = (i64::from(b.x) - ax) * (i64::from(c.y) - ay)
        - (i64::from(b.y) - ay) * (i64::from(c.x) - ax);
    cross.signum()
}

/// `q` lies within the bounding box of `p`–`r` (used once collinear).
fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

/// True if segment p1–p2 and segment q1–q2 share at least one point.
pub fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 {
        return true;
    }
    (o1 == 0 && on_segment(p1, q1, p2))
        || (o2 == 0 && on_segment(p1, q2, p2))
        || (o3 == 0 && on_segment(q1, p1, q2))
        || (o4 == 0 && on_segment(q1, p2, q2))
}

pub fn point_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (px, py) = (f64::from(p.x), f64::from(p.y));
    let (ax, ay) = (f64::from(a.x), f64::from(a.y));
    let (bx, by) = (f64::from(b.x), f64::from(b.y));
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (px - ax).hypot(py - ay);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    (px - (ax + t * dx)).hypot(py - (ay + t * dy))
}

/// A convex polygon, corners in order (either winding).
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    corners: Vec<Point>,
}

impl Region {
    pub fn from_corners(corners: Vec<Point>) -> Self {
        Self { corners }
    }

    /// Axis-aligned rectangle of `size` centered on `center`.
    pub fn centered_rect(center: Point, size: Size) -> Self {
        let left = center.x - size.width / 2;
        let top = center.y - size.height / 2;
        Self::from_corners(vec![
            Point::new(left, top),
            Point::new(left + size.width, top),
            Point::new(left + size.width, top + size.height),
            Point::new(left, top + size.height),
        ])
    }

    pub fn corners(&self) -> &[Point] {
        &self.corners
    }

    /// The closed boundary, one segment per side.
    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        let n = self.corners.len();
        (0..n).map(move |i| Segment::new(self.corners[i], self.corners[(i + 1) % n]))
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    /// Separating-axis overlap test. Empty regions intersect nothing.
    pub fn intersects(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !self.has_separating_axis(other) && !other.has_separating_axis(self)
    }

    fn has_separating_axis(&self, other: &Region) -> bool {
        self.edges().any(|edge| {
            // Edge normal.
            let axis = (
                -f64::from(edge.b.y - edge.a.y),
                f64::from(edge.b.x - edge.a.x),
            );
            if axis == (0.0, 0.0) {
                return false;
            }
            let (min_a, max_a) = self.project(axis);
            let (min_b, max_b) = other.project(axis);
            max_a < min_b || max_b < min_a
        })
    }

    fn project(&self, axis: (f64, f64)) -> (f64, f64) {
        self.corners
            .iter()
            .map(|p| f64::from(p.x) * axis.0 + f64::from(p.y) * axis.1)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
    }
}
