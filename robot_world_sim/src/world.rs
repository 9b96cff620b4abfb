// The world model: robots, walls, goals and waypoints.
//
// `World` is plain data. It does no locking and sends no notifications; a
// `SimContext` wraps it in a single coarse mutex and announces changes (see
// `context.rs`). Every object gets an `ObjectId` from a per-world counter.
//
// Robot order is meaningful: `robots[0]` is the local robot created by
// `populate`, and `robots[1]` is the replica of the peer's robot created by
// the first world sync. `remote_robot()` and the sync merge rely on that.
//
// Also holds the fixed scenarios (`Scenario`) that reset the world to a
// bordered 500x500 arena with one robot and one goal. Scenario resets keep
// the border walls and drop every other wall.
//
// See also: `robot.rs` for the agent that drives a `RobotState`,
// `world_sync.rs` for the text encoding of walls, goals and poses.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use tracing::{info, warn};

use crate::geometry::{Region, Segment};
use crate::types::{FrontVector, ObjectId, Point, RobotPose, Size};

// ---------------------------------------------------------------------------
// World objects
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct RobotState {
    pub id: ObjectId,
    pub name: String,
    pub size: Size,
    pub position: Point,
    pub front: FrontVector,
    pub speed: f32,
    /// Position when driving last started.
    pub start_position: Point,
    /// Planned route, replaced wholesale on replanning.
    pub path: Vec<Point>,
}

impl RobotState {
    pub fn pose(&self) -> RobotPose {
        RobotPose {
            position: self.position,
            front: self.front,
        }
    }

    /// Corners of the footprint rotated to face along `front`, in the order
    /// front-left, front-right, back-left, back-right.
    pub fn corners(&self) -> [Point; 4] {
        let left = self.position.x - self.size.width / 2;
        let top = self.position.y - self.size.height / 2;
        let unrotated = [
            Point::new(left, top),
            Point::new(left + self.size.width, top),
            Point::new(left, top + self.size.height),
            Point::new(left + self.size.width, top + self.size.height),
        ];
        // The unrotated footprint faces up (-Y), a quarter turn behind +X.
        let angle = self.front.angle() + std::f64::consts::FRAC_PI_2;
        let (sin, cos) = angle.sin_cos();
        let (cx, cy) = (f64::from(self.position.x), f64::from(self.position.y));
        unrotated.map(|p| {
            let dx = f64::from(p.x) - cx;
            let dy = f64::from(p.y) - cy;
            Point::new(
                (dx * cos - dy * sin + cx) as i32,
                (dy * cos + dx * sin + cy) as i32,
            )
        })
    }

    /// The footprint as a convex quad.
    pub fn region(&self) -> Region {
        let [front_left, front_right, back_left, back_right] = self.corners();
        Region::from_corners(vec![front_right, front_left, back_left, back_right])
    }

    pub fn edges(&self) -> Vec<Segment> {
        self.region().edges().collect()
    }

    pub fn intersects(&self, region: &Region) -> bool {
        self.region().intersects(region)
    }

    pub fn clear_path(&mut self) {
        self.path.clear();
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Robot {} at {}", self.name, self.position)
    }
}

/// A static wall segment. Identified for deletion by its endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wall {
    pub id: ObjectId,
    pub point1: Point,
    pub point2: Point,
}

impl Wall {
    pub fn segment(&self) -> Segment {
        Segment::new(self.point1, self.point2)
    }

    /// Same endpoints, in either order.
    pub fn same_geometry(&self, point1: Point, point2: Point) -> bool {
        (self.point1 == point1 && self.point2 == point2)
            || (self.point1 == point2 && self.point2 == point1)
    }

    pub fn is_border(&self) -> bool {
        BORDER.iter().any(|&(point1, point2)| self.same_geometry(point1, point2))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Goal {
    pub id: ObjectId,
    pub name: String,
    pub position: Point,
    pub size: Size,
}

impl Goal {
    pub fn region(&self) -> Region {
        Region::centered_rect(self.position, self.size)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WayPoint {
    pub id: ObjectId,
    pub name: String,
    pub position: Point,
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Fixed arena layouts: robot start, goal and an optional extra wall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    S1_1,
    S1_2,
    S2_1,
    S2_2,
    S3_1,
    S3_2,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::S1_1,
        Scenario::S1_2,
        Scenario::S2_1,
        Scenario::S2_2,
        Scenario::S3_1,
        Scenario::S3_2,
    ];

    fn robot_start(self) -> Point {
        match self {
            Scenario::S1_1 => Point::new(150, 150),
            Scenario::S1_2 => Point::new(350, 350),
            Scenario::S2_1 => Point::new(50, 50),
            Scenario::S2_2 => Point::new(450, 50),
            Scenario::S3_1 => Point::new(150, 110),
            Scenario::S3_2 => Point::new(350, 390),
        }
    }

    fn goal(self) -> Point {
        match self {
            Scenario::S1_1 | Scenario::S2_1 | Scenario::S3_1 => Point::new(450, 450),
            Scenario::S1_2 | Scenario::S3_2 => Point::new(50, 50),
            Scenario::S2_2 => Point::new(50, 450),
        }
    }

    fn extra_wall(self) -> Option<(Point, Point)> {
        match self {
            Scenario::S3_1 => Some((Point::new(0, 160), Point::new(300, 160))),
            Scenario::S3_2 => Some((Point::new(200, 340), Point::new(500, 340))),
            _ => None,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scenario::S1_1 => "1.1",
            Scenario::S1_2 => "1.2",
            Scenario::S2_1 => "2.1",
            Scenario::S2_2 => "2.2",
            Scenario::S3_1 => "3.1",
            Scenario::S3_2 => "3.2",
        };
        f.write_str(s)
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.to_string() == s)
            .ok_or_else(|| format!("unknown scenario {s:?} (expected 1.1 to 3.2)"))
    }
}

/// The arena border, in creation order.
const BORDER: [(Point, Point); 4] = [
    (Point::new(0, 0), Point::new(500, 0)),
    (Point::new(0, 0), Point::new(0, 500)),
    (Point::new(500, 0), Point::new(500, 500)),
    (Point::new(0, 500), Point::new(500, 500)),
];

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct World {
    next_id: u64,
    robot_size: Size,
    goal_size: Size,
    robots: Vec<RobotState>,
    walls: Vec<Wall>,
    goals: Vec<Goal>,
    way_points: Vec<WayPoint>,
    current_scenario: Option<Scenario>,
}

impl Default for World {
    fn default() -> Self {
        Self::new(Size::default(), Size::default())
    }
}

impl World {
    /// An empty world. New robots and goals get the given footprints.
    pub fn new(robot_size: Size, goal_size: Size) -> Self {
        Self {
            next_id: 1,
            robot_size,
            goal_size,
            robots: Vec::new(),
            walls: Vec::new(),
            goals: Vec::new(),
            way_points: Vec::new(),
            current_scenario: None,
        }
    }

    fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        id
    }

    // -- Creation ----------------------------------------------------------

    pub fn new_robot(&mut self, name: &str, position: Point) -> ObjectId {
        let id = self.allocate_id();
        self.robots.push(RobotState {
            id,
            name: name.to_string(),
            size: self.robot_size,
            position,
            front: FrontVector::default(),
            speed: 0.0,
            start_position: position,
            path: Vec::new(),
        });
        id
    }

    pub fn new_wall(&mut self, point1: Point, point2: Point) -> ObjectId {
        let id = self.allocate_id();
        self.walls.push(Wall { id, point1, point2 });
        id
    }

    pub fn new_goal(&mut self, name: &str, position: Point) -> ObjectId {
        let id = self.allocate_id();
        self.goals.push(Goal {
            id,
            name: name.to_string(),
            position,
            size: self.goal_size,
        });
        id
    }

    pub fn new_way_point(&mut self, name: &str, position: Point) -> ObjectId {
        let id = self.allocate_id();
        self.way_points.push(WayPoint {
            id,
            name: name.to_string(),
            position,
        });
        id
    }

    // -- Deletion ----------------------------------------------------------
    //
    // Each removes the first match and reports whether one was found.

    pub fn delete_robot(&mut self, name: &str) -> bool {
        remove_first(&mut self.robots, |r| r.name == name)
    }

    pub fn delete_robot_by_id(&mut self, id: ObjectId) -> bool {
        remove_first(&mut self.robots, |r| r.id == id)
    }

    pub fn delete_wall(&mut self, point1: Point, point2: Point) -> bool {
        remove_first(&mut self.walls, |w| w.point1 == point1 && w.point2 == point2)
    }

    pub fn delete_goal(&mut self, name: &str) -> bool {
        remove_first(&mut self.goals, |g| g.name == name)
    }

    pub fn delete_way_point(&mut self, name: &str) -> bool {
        remove_first(&mut self.way_points, |w| w.name == name)
    }

    // -- Lookup ------------------------------------------------------------

    pub fn robots(&self) -> &[RobotState] {
        &self.robots
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn way_points(&self) -> &[WayPoint] {
        &self.way_points
    }

    pub fn robot_named(&self, name: &str) -> Option<&RobotState> {
        self.robots.iter().find(|r| r.name == name)
    }

    pub fn robot(&self, id: ObjectId) -> Option<&RobotState> {
        self.robots.iter().find(|r| r.id == id)
    }

    pub fn robot_mut(&mut self, id: ObjectId) -> Option<&mut RobotState> {
        self.robots.iter_mut().find(|r| r.id == id)
    }

    pub fn local_robot(&self) -> Option<&RobotState> {
        self.robots.first()
    }

    /// Replica of the peer's robot, if a sync has created one.
    pub fn remote_robot(&self) -> Option<&RobotState> {
        self.robots.get(1)
    }

    pub fn remote_robot_mut(&mut self) -> Option<&mut RobotState> {
        self.robots.get_mut(1)
    }

    pub fn wall(&self, id: ObjectId) -> Option<&Wall> {
        self.walls.iter().find(|w| w.id == id)
    }

    pub fn goal_named(&self, name: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.name == name)
    }

    pub fn goal(&self, id: ObjectId) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    /// The goal named `name`, or the first goal if none has that name.
    pub fn active_goal(&self, name: &str) -> Option<&Goal> {
        self.goal_named(name).or_else(|| self.goals.first())
    }

    pub fn way_point_named(&self, name: &str) -> Option<&WayPoint> {
        self.way_points.iter().find(|w| w.name == name)
    }

    pub fn way_point(&self, id: ObjectId) -> Option<&WayPoint> {
        self.way_points.iter().find(|w| w.id == id)
    }

    // -- Geometry queries --------------------------------------------------

    /// True if another robot is strictly closer than `max_distance`.
    /// Robots at exactly the same position are ignored.
    pub fn close_to_other_robot(&self, id: ObjectId, max_distance: f64) -> bool {
        let Some(me) = self.robot(id) else {
            return false;
        };
        self.robots.iter().any(|other| {
            let distance = me.position.distance(other.position);
            distance < max_distance && distance != 0.0
        })
    }

    /// True if the robot's footprint overlaps the goal's.
    pub fn arrived(&self, id: ObjectId, goal: ObjectId) -> bool {
        match (self.robot(id), self.goal(goal)) {
            (Some(robot), Some(goal)) => robot.intersects(&goal.region()),
            _ => false,
        }
    }

    /// True if any footprint edge crosses a wall or the footprint overlaps
    /// another robot's.
    pub fn collision(&self, id: ObjectId) -> bool {
        let Some(me) = self.robot(id) else {
            return false;
        };
        let edges = me.edges();
        let hits_wall = self.walls.iter().any(|wall| {
            let wall = wall.segment();
            edges.iter().any(|edge| edge.intersects(&wall))
        });
        if hits_wall {
            return true;
        }
        let region = me.region();
        self.robots
            .iter()
            .filter(|other| other.id != id)
            .any(|other| other.intersects(&region))
    }

    /// Everything the robot `id` must steer around: every wall plus the
    /// footprint edges of every other robot.
    pub fn obstacles_for(&self, id: ObjectId) -> Vec<Segment> {
        let mut obstacles: Vec<Segment> = self.walls.iter().map(Wall::segment).collect();
        for other in self.robots.iter().filter(|r| r.id != id) {
            obstacles.extend(other.edges());
        }
        obstacles
    }

    // -- Bulk operations ---------------------------------------------------

    /// The default layout: one robot, one wall, one goal.
    pub fn populate(&mut self, robot_name: &str) {
        self.new_robot(robot_name, Point::new(163, 111));
        self.new_wall(Point::new(7, 234), Point::new(419, 234));
        self.new_goal("Goal", Point::new(320, 285));
    }

    pub fn unpopulate(&mut self) {
        self.robots.clear();
        self.walls.clear();
        self.goals.clear();
        self.way_points.clear();
    }

    /// Remove every object whose id is not in `keep`.
    pub fn unpopulate_keeping(&mut self, keep: &[ObjectId]) {
        self.robots.retain(|r| keep.contains(&r.id));
        self.walls.retain(|w| keep.contains(&w.id));
        self.goals.retain(|g| keep.contains(&g.id));
        self.way_points.retain(|w| keep.contains(&w.id));
    }

    /// Add whichever border walls are missing.
    pub fn create_border(&mut self) {
        for (point1, point2) in BORDER {
            if !self.walls.iter().any(|w| w.same_geometry(point1, point2)) {
                self.new_wall(point1, point2);
            }
        }
    }

    pub fn remove_non_border_walls(&mut self) {
        self.walls.retain(Wall::is_border);
    }

    pub fn current_scenario(&self) -> Option<Scenario> {
        self.current_scenario
    }

    /// Reset the arena to `scenario`. Returns false (and changes nothing) if
    /// that scenario is already the current one.
    pub fn create_scenario(&mut self, scenario: Scenario) -> bool {
        if self.current_scenario == Some(scenario) {
            warn!(%scenario, "scenario already active");
            return false;
        }
        self.current_scenario = Some(scenario);

        self.remove_non_border_walls();
        self.create_border();
        self.goals.clear();
        self.way_points.clear();

        if self.robots.is_empty() {
            self.new_robot("Robot", Point::new(0, 0));
        }
        let start = scenario.robot_start();
        if let Some(robot) = self.robots.first_mut() {
            robot.clear_path();
            robot.position = start;
            robot.start_position = start;
        }
        self.new_goal("Goal", scenario.goal());
        if let Some((point1, point2)) = scenario.extra_wall() {
            self.new_wall(point1, point2);
        }
        info!(%scenario, "scenario created");
        true
    }

    pub fn as_debug_string(&self) -> String {
        let mut out = String::from("RobotWorld:\n");
        for robot in &self.robots {
            let _ = writeln!(out, "  {robot} facing ({},{})", robot.front.x, robot.front.y);
        }
        for way_point in &self.way_points {
            let _ = writeln!(out, "  WayPoint {} at {}", way_point.name, way_point.position);
        }
        for goal in &self.goals {
            let _ = writeln!(out, "  Goal {} at {}", goal.name, goal.position);
        }
        for wall in &self.walls {
            let _ = writeln!(out, "  Wall {} to {}", wall.point1, wall.point2);
        }
        out
    }
}

fn remove_first<T>(items: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> bool {
    match items.iter().position(pred) {
        Some(index) => {
            items.remove(index);
            true
        }
        None => false,
    }
}
