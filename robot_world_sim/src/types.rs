// Core types shared across the simulation.
//
// Defines 2D integer coordinates (`Point`), footprint sizes (`Size`), the
// robot facing vector (`FrontVector`), object identifiers, and the robot pose
// that travels in sync messages. Coordinates are canvas pixels:
// - X: right (positive)
// - Y: down  (positive)
//
// All types derive `Serialize`/`Deserialize` so configuration files and
// debug dumps can carry them.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position in the world, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance.
    pub fn distance(self, other: Self) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        dx.hypot(dy)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Width and height of a rectangular footprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Half the diagonal: the radius of the circle the footprint sweeps
    /// when it rotates in place.
    pub fn half_diagonal(self) -> f64 {
        f64::from(self.width).hypot(f64::from(self.height)) / 2.0
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(20, 20)
    }
}

/// Facing direction of a robot: the vector from its previous position to
/// the point it is heading for. A zero vector faces along +X.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontVector {
    pub x: i32,
    pub y: i32,
}

impl FrontVector {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Vector pointing from `tail` to `head`.
    pub fn between(head: Point, tail: Point) -> Self {
        let d = head - tail;
        Self::new(d.x, d.y)
    }

    /// Angle in radians, measured from +X towards +Y.
    pub fn angle(self) -> f64 {
        f64::from(self.y).atan2(f64::from(self.x))
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identifier of any world object (robot, wall, goal, waypoint).
/// Assigned by the owning `World`; never reused within that world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position plus facing, the payload of a robot sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotPose {
    pub position: Point,
    pub front: FrontVector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_vector_points_from_tail_to_head() {
        let front = FrontVector::between(Point::new(10, 5), Point::new(4, 5));
        assert_eq!(front, FrontVector::new(6, 0));
        assert_eq!(front.angle(), 0.0);
    }

    #[test]
    fn downward_front_is_quarter_turn() {
        let front = FrontVector::new(0, 3);
        assert!((front.angle() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(Point::new(0, 0).distance(Point::new(3, 4)), 5.0);
    }
}
