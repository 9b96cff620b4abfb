// Text codec for the world and robot sync message bodies.
//
// A world body has up to three `;`-separated sections, each introduced by a
// literal tag:
//
//     Walls x1,y1,x2,y2 _ x1,y1,x2,y2 ... ; Goals x,y _ x,y ... ; Robot x,y,fx,fy
//
// (written without the spaces). A robot body is the `Robot` section alone.
// Empty sections are allowed (`Walls;Goals;Robot1,2,0,0`). Numbers are
// integers; a decimal token such as `0.000000` is accepted and truncated.
// Values beyond `MAX_COORDINATE` in magnitude are rejected, which keeps all
// footprint and distance arithmetic on decoded poses far from overflow.
//
// Decoding is all-or-nothing: `decode` parses the whole body into a
// `WorldSnapshot` before anything touches a world, so a malformed section
// aborts the sync with a `SyncParseError` and leaves the world unchanged.
// `merge` then folds the snapshot into a world under a `MergePolicy`.
//
// Robot merge rule: with at most one robot in the world the incoming robot is
// created as a new replica; with more, it updates `robots[1]`.

use std::fmt::Write as _;

use tracing::debug;

use crate::config::MergePolicy;
use crate::error::SyncParseError;
use crate::types::{FrontVector, ObjectId, Point, RobotPose};
use crate::world::World;

const WALLS: &str = "Walls";
const GOALS: &str = "Goals";
const ROBOT: &str = "Robot";

/// Name given to replicas of the peer's robot and to synced goals.
pub const REMOTE_ROBOT_NAME: &str = "Robot";
pub const SYNCED_GOAL_NAME: &str = "Goal";

/// Largest coordinate magnitude accepted from a peer.
pub const MAX_COORDINATE: i32 = 1_000_000;

/// A decoded world body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorldSnapshot {
    pub walls: Vec<(Point, Point)>,
    pub goals: Vec<Point>,
    pub robot: Option<RobotPose>,
}

/// What happened to the robot section during a merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RobotMerge {
    #[default]
    Absent,
    Created(ObjectId),
    Updated(ObjectId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub walls_added: usize,
    pub walls_skipped: usize,
    pub goals_added: usize,
    pub goals_skipped: usize,
    pub robot: RobotMerge,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Walls, goals and the local robot (`robots[0]`), if any.
pub fn encode_world(world: &World) -> String {
    let walls: Vec<String> = world
        .walls()
        .iter()
        .map(|w| format!("{},{},{},{}", w.point1.x, w.point1.y, w.point2.x, w.point2.y))
        .collect();
    let goals: Vec<String> = world
        .goals()
        .iter()
        .map(|g| format!("{},{}", g.position.x, g.position.y))
        .collect();

    let mut out = String::new();
    let _ = write!(out, "{WALLS}{};{GOALS}{};", walls.join("_"), goals.join("_"));
    if let Some(robot) = world.local_robot() {
        out.push_str(&encode_robot(robot.pose()));
    }
    out
}

pub fn encode_robot(pose: RobotPose) -> String {
    format!(
        "{ROBOT}{},{},{},{}",
        pose.position.x, pose.position.y, pose.front.x, pose.front.y
    )
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode(body: &str) -> Result<WorldSnapshot, SyncParseError> {
    let mut snapshot = WorldSnapshot::default();
    for section in body.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(rest) = section.strip_prefix(WALLS) {
            for group in parse_groups(rest, WALLS, 4)? {
                snapshot.walls.push((
                    Point::new(group[0], group[1]),
                    Point::new(group[2], group[3]),
                ));
            }
        } else if let Some(rest) = section.strip_prefix(GOALS) {
            for group in parse_groups(rest, GOALS, 2)? {
                snapshot.goals.push(Point::new(group[0], group[1]));
            }
        } else if let Some(rest) = section.strip_prefix(ROBOT) {
            snapshot.robot = Some(parse_pose(rest)?);
        } else {
            let head: String = section.chars().take(16).collect();
            return Err(SyncParseError::UnknownSection(head));
        }
    }
    Ok(snapshot)
}

/// Decode a robot body (the `Robot` section on its own).
pub fn decode_robot(body: &str) -> Result<RobotPose, SyncParseError> {
    let rest = body
        .trim()
        .strip_prefix(ROBOT)
        .ok_or(SyncParseError::MissingTag(ROBOT))?;
    parse_pose(rest)
}

fn parse_pose(rest: &str) -> Result<RobotPose, SyncParseError> {
    let n = parse_group(rest, ROBOT, 4)?;
    Ok(RobotPose {
        position: Point::new(n[0], n[1]),
        front: FrontVector::new(n[2], n[3]),
    })
}

fn parse_groups(
    rest: &str,
    section: &'static str,
    arity: usize,
) -> Result<Vec<Vec<i32>>, SyncParseError> {
    if rest.trim().is_empty() {
        return Ok(Vec::new());
    }
    rest.split('_')
        .map(|group| parse_group(group, section, arity))
        .collect()
}

fn parse_group(group: &str, section: &'static str, arity: usize) -> Result<Vec<i32>, SyncParseError> {
    let numbers = group
        .split(',')
        .map(|token| parse_number(token, section))
        .collect::<Result<Vec<i32>, _>>()?;
    if numbers.len() != arity {
        return Err(SyncParseError::WrongArity {
            section,
            expected: arity,
            got: numbers.len(),
        });
    }
    Ok(numbers)
}

fn parse_number(token: &str, section: &'static str) -> Result<i32, SyncParseError> {
    let token = token.trim();
    let value = match token.parse::<i64>() {
        Ok(n) => n as f64,
        Err(_) => match token.parse::<f64>() {
            Ok(f) if f.is_finite() => f.trunc(),
            _ => {
                return Err(SyncParseError::BadNumber {
                    section,
                    token: token.to_string(),
                });
            }
        },
    };
    if value.abs() > f64::from(MAX_COORDINATE) {
        return Err(SyncParseError::OutOfRange {
            section,
            token: token.to_string(),
        });
    }
    Ok(value as i32)
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Fold a decoded snapshot into `world`.
pub fn merge(world: &mut World, snapshot: &WorldSnapshot, policy: MergePolicy) -> MergeReport {
    let mut report = MergeReport::default();

    for &(point1, point2) in &snapshot.walls {
        let known = policy == MergePolicy::DedupeByGeometry
            && world.walls().iter().any(|w| w.same_geometry(point1, point2));
        if known {
            report.walls_skipped += 1;
        } else {
            world.new_wall(point1, point2);
            report.walls_added += 1;
        }
    }

    for &position in &snapshot.goals {
        let known = policy == MergePolicy::DedupeByGeometry
            && world.goals().iter().any(|g| g.position == position);
        if known {
            report.goals_skipped += 1;
        } else {
            world.new_goal(SYNCED_GOAL_NAME, position);
            report.goals_added += 1;
        }
    }

    if let Some(pose) = snapshot.robot {
        report.robot = if world.robots().len() <= 1 {
            let id = world.new_robot(REMOTE_ROBOT_NAME, pose.position);
            if let Some(robot) = world.robot_mut(id) {
                robot.front = pose.front;
            }
            RobotMerge::Created(id)
        } else {
            match update_remote_robot(world, pose) {
                Some(id) => RobotMerge::Updated(id),
                None => RobotMerge::Absent,
            }
        };
    }

    debug!(?report, "sync merged");
    report
}

/// Move the peer's replica (`robots[1]`) to `pose`. Returns its id, or None
/// if no replica exists yet.
pub fn update_remote_robot(world: &mut World, pose: RobotPose) -> Option<ObjectId> {
    let robot = world.remote_robot_mut()?;
    robot.position = pose.position;
    robot.front = pose.front;
    Some(robot.id)
}
