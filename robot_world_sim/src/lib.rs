// robot_world_sim — world model, robot agent and peer sync for one instance.
//
// A simulation instance holds a 2D world of robots, walls, goals and
// waypoints. Its local robot plans a route to a goal, drives it step by
// step, and mirrors its pose to a peer instance over the messaging layer;
// the peer's robot appears here as a replica that the peer moves.
//
// Module overview:
// - `types.rs`:       Point, Size, FrontVector, ObjectId, RobotPose.
// - `geometry.rs`:    Segment intersection/distance and convex `Region` overlap.
// - `world.rs`:       World, RobotState, Wall, Goal, WayPoint, scenarios.
// - `pathfinding.rs`: `PathPlanner` contract + grid A* (`GridAStar`).
// - `world_sync.rs`:  Text codec for world/robot bodies and the merge policy.
// - `config.rs`:      SimConfig, every tunable, loaded from JSON + CLI.
// - `notify.rs`:      Notifier: change notifications over std `mpsc`.
// - `context.rs`:     SimContext: the shared per-instance state.
// - `robot.rs`:       Robot agent: world-backed accessors, communication.
// - `drive.rs`:       Acting/driving threads, the drive loop, proximity policy.
// - `dispatch.rs`:    `MessageHandler` impl for Robot.
// - `error.rs`:       SimError, ConfigError, SyncParseError.
//
// The world is shared between the drive thread, server sessions and client
// replies, always behind the context's single world mutex.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod drive;
pub mod error;
pub mod geometry;
pub mod notify;
pub mod pathfinding;
pub mod robot;
pub mod types;
pub mod world;
pub mod world_sync;

pub use config::{MergePolicy, SimConfig};
pub use context::SimContext;
pub use drive::DriveOutcome;
pub use error::{ConfigError, SimError, SyncParseError};
pub use notify::{Notification, Notifier};
pub use pathfinding::{GridAStar, PathPlanner};
pub use robot::Robot;
pub use world::{Scenario, World};
