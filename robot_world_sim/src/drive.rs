// The drive control loop: acting, planning, stepping and stopping.
//
// State machine: Idle → Planning → Driving → {Arrived, Collided, ...} → Idle.
//
// `start_acting` spawns one drive thread per robot. The thread plans a route
// to the active goal through the context's `PathPlanner`, then steps along
// it. Each step:
//
// 1. advances the path index by the robot's speed (vertices per step) and
//    recomputes the facing vector from the old and new position,
// 2. queues the new pose for the peer (see `Robot::broadcast_pose`),
// 3. applies the near-collision policy (`proximity_action`),
// 4. stops on arrival (footprint overlaps the goal) or collision (an edge
//    crosses a wall, or the footprint overlaps another robot),
// 5. publishes change notifications and sleeps `step_interval_ms`.
//
// The loop also ends when the path runs out, when the robot leaves the open
// world rectangle, or when `driving` is cleared (checked at the top of every
// step). Errors and panics inside the loop are caught and reported as
// `DriveOutcome::Fault`; they end driving and nothing else.
//
// The world lock is taken per phase and released before broadcasting,
// planning or sleeping.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::PoisonError;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::error::SimError;
use crate::notify::Notification;
use crate::robot::Robot;
use crate::types::{FrontVector, ObjectId};

/// Why a drive ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriveOutcome {
    Arrived,
    Collided,
    /// The planner found no route (the path is empty).
    NoRoute,
    /// No goal to drive to.
    NoGoal,
    /// Reached the end of the path without touching the goal.
    PathExhausted,
    /// Stepped outside the open world rectangle.
    LeftWorld,
    /// `driving` was cleared by `stop_driving` / `stop_acting`.
    Stopped,
    Fault(String),
}

/// Near-collision response for one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProximityAction {
    None,
    /// Plan a new route from here at full speed.
    Replan,
    /// Stop in place (speed zero).
    Hold,
    /// Restore full speed and leave the near-collision state.
    Resume,
}

/// Hysteresis policy. Entering: another robot inside the warning distance
/// while not yet almost-collided; a robot that synced the world replans,
/// others hold. Leaving: almost-collided and every other robot beyond the
/// restart distance. In between nothing changes, so speed cannot come back
/// before the restart distance is exceeded.
pub fn proximity_action(
    almost_collided: bool,
    within_warning: bool,
    beyond_restart: bool,
    world_syncer: bool,
) -> ProximityAction {
    if within_warning && !almost_collided {
        if world_syncer {
            ProximityAction::Replan
        } else {
            ProximityAction::Hold
        }
    } else if almost_collided && beyond_restart {
        ProximityAction::Resume
    } else {
        ProximityAction::None
    }
}

/// Next path index for a robot at `index` moving `speed` vertices per step,
/// clamped to the last vertex. None once the last vertex is reached. Any
/// positive speed moves at least one vertex; zero holds the index.
pub fn next_path_index(index: usize, speed: f32, len: usize) -> Option<usize> {
    let last = len.checked_sub(1)?;
    if index >= last {
        return None;
    }
    let step = if speed > 0.0 { (speed as usize).max(1) } else { 0 };
    Some((index + step).min(last))
}

impl Robot {
    /// Spawn the drive thread. Ignored while already acting.
    pub fn start_acting(&self) -> Result<(), SimError> {
        let mut slot = self
            .drive_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_acting() {
            debug!(robot = %self.id(), "already acting");
            return Ok(());
        }
        if let Some(finished) = slot.take() {
            if finished.thread().id() != thread::current().id() {
                let _ = finished.join();
            }
        }
        let robot = self.handle().ok_or(SimError::UnknownRobot(self.id()))?;
        self.acting.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("robot-{}-drive", self.id().0))
            .spawn(move || {
                // Set driving before checking acting: a concurrent
                // stop_acting clears acting first and driving second.
                robot.driving.store(true, Ordering::SeqCst);
                if robot.is_acting() {
                    robot.run_drive();
                } else {
                    robot.driving.store(false, Ordering::SeqCst);
                    robot.record_outcome(DriveOutcome::Stopped);
                }
                robot.acting.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!(robot = %self.id(), "acting");
                Ok(())
            }
            Err(e) => {
                self.acting.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop driving and wait for the drive thread to exit.
    pub fn stop_acting(&self) {
        self.acting.store(false, Ordering::SeqCst);
        self.driving.store(false, Ordering::SeqCst);
        let handle = self
            .drive_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Plan and drive to the active goal on the calling thread. Blocks until
    /// the drive ends.
    pub fn start_driving(&self) -> DriveOutcome {
        self.driving.store(true, Ordering::SeqCst);
        self.run_drive()
    }

    /// Ask the drive loop to stop after the current step.
    pub fn stop_driving(&self) {
        self.driving.store(false, Ordering::SeqCst);
    }

    pub fn last_drive_outcome(&self) -> Option<DriveOutcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The goal named by `goal_name`, or the first goal.
    pub fn active_goal(&self) -> Result<ObjectId, SimError> {
        let name = &self.context().config().goal_name;
        self.context()
            .world()
            .active_goal(name)
            .map(|g| g.id)
            .ok_or_else(|| SimError::NoGoal(name.clone()))
    }

    /// Replace the path with a fresh route to `goal` and face the goal.
    /// Returns the number of path vertices (0 when no route exists).
    pub fn calculate_route(&self, goal: ObjectId) -> Result<usize, SimError> {
        let (start, target, footprint, obstacles) = {
            let world = self.context().world();
            let me = world
                .robot(self.id())
                .ok_or(SimError::UnknownRobot(self.id()))?;
            let goal = world
                .goal(goal)
                .ok_or_else(|| SimError::NoGoal(goal.to_string()))?;
            (me.position, goal.position, me.size, world.obstacles_for(self.id()))
        };
        let path = self
            .context()
            .planner()
            .search(start, target, footprint, &obstacles);
        let len = path.len();
        self.write(false, |r| {
            r.front = FrontVector::between(target, start);
            r.path = path;
        })?;
        debug!(robot = %self.id(), len, "route calculated");
        Ok(len)
    }

    fn run_drive(&self) -> DriveOutcome {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(SimError::NoGoal(_))) => DriveOutcome::NoGoal,
            Ok(Err(e)) => DriveOutcome::Fault(e.to_string()),
            Err(payload) => DriveOutcome::Fault(panic_text(payload.as_ref())),
        };
        self.driving.store(false, Ordering::SeqCst);
        match &outcome {
            DriveOutcome::Fault(fault) => error!(robot = %self.id(), %fault, "drive failed"),
            outcome => info!(robot = %self.id(), ?outcome, "drive ended"),
        }
        self.record_outcome(outcome.clone());
        outcome
    }

    fn record_outcome(&self, outcome: DriveOutcome) {
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    fn drive(&self) -> Result<DriveOutcome, SimError> {
        let ctx = self.context().clone();
        let config = ctx.config();
        let full_speed = config.effective_speed();
        let goal = self.active_goal()?;

        self.write(false, |r| {
            r.speed = full_speed;
            r.start_position = r.position;
        })?;
        self.calculate_route(goal)?;

        let mut index = 0;
        loop {
            if !self.is_driving() {
                return Ok(DriveOutcome::Stopped);
            }

            // Step along the path.
            let pose = {
                let mut world = ctx.world();
                let me = world
                    .robot_mut(self.id())
                    .ok_or(SimError::UnknownRobot(self.id()))?;
                let p = me.position;
                if p.x <= 0 || p.x >= config.world_width || p.y <= 0 || p.y >= config.world_height {
                    return Ok(DriveOutcome::LeftWorld);
                }
                let Some(next) = next_path_index(index, me.speed, me.path.len()) else {
                    return Ok(if me.path.is_empty() {
                        DriveOutcome::NoRoute
                    } else {
                        DriveOutcome::PathExhausted
                    });
                };
                if next != index {
                    let vertex = me.path[next];
                    me.front = FrontVector::between(vertex, me.position);
                    me.position = vertex;
                    index = next;
                }
                me.pose()
            };
            self.broadcast_pose(pose);

            // Near-collision policy.
            let (within_warning, beyond_restart) = {
                let world = ctx.world();
                (
                    world.close_to_other_robot(self.id(), config.warning_distance),
                    !world.close_to_other_robot(self.id(), config.restart_distance),
                )
            };
            match proximity_action(
                self.is_almost_collided(),
                within_warning,
                beyond_restart,
                self.is_world_syncer(),
            ) {
                ProximityAction::Replan => {
                    warn!(robot = %self.id(), "robot ahead, replanning");
                    self.almost_collided.store(true, Ordering::SeqCst);
                    self.calculate_route(goal)?;
                    index = 0;
                    self.set_speed(full_speed, false)?;
                }
                ProximityAction::Hold => {
                    warn!(robot = %self.id(), "robot ahead, holding");
                    self.set_speed(0.0, false)?;
                    self.almost_collided.store(true, Ordering::SeqCst);
                }
                ProximityAction::Resume => {
                    info!(robot = %self.id(), "way clear, resuming");
                    self.almost_collided.store(false, Ordering::SeqCst);
                    self.set_speed(full_speed, false)?;
                }
                ProximityAction::None => {}
            }

            // Arrival and collision.
            let (arrived, collided, remote) = {
                let world = ctx.world();
                (
                    world.arrived(self.id(), goal),
                    world.collision(self.id()),
                    world.remote_robot().map(|r| r.id).filter(|&id| id != self.id()),
                )
            };

            ctx.notify(Notification::RobotChanged(self.id()));
            if let Some(remote) = remote {
                ctx.notify(Notification::RobotChanged(remote));
            }

            if arrived || collided {
                self.almost_collided.store(false, Ordering::SeqCst);
                self.world_syncer.store(false, Ordering::SeqCst);
                return Ok(if arrived {
                    DriveOutcome::Arrived
                } else {
                    DriveOutcome::Collided
                });
            }

            thread::sleep(config.step_interval());
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rstest::rstest;

    use crate::config::SimConfig;
    use crate::context::SimContext;
    use crate::types::Point;

    fn fast_context() -> Arc<SimContext> {
        SimContext::new(SimConfig {
            local_port: 0,
            step_interval_ms: 1,
            ..SimConfig::default()
        })
        .unwrap()
    }

    #[rstest]
    #[case(false, true, false, true, ProximityAction::Replan)]
    #[case(false, true, false, false, ProximityAction::Hold)]
    #[case(true, true, false, false, ProximityAction::None)]
    #[case(true, false, false, false, ProximityAction::None)]
    #[case(true, false, true, false, ProximityAction::Resume)]
    #[case(false, false, true, false, ProximityAction::None)]
    fn proximity_table(
        #[case] almost_collided: bool,
        #[case] within_warning: bool,
        #[case] beyond_restart: bool,
        #[case] world_syncer: bool,
        #[case] expected: ProximityAction,
    ) {
        assert_eq!(
            proximity_action(almost_collided, within_warning, beyond_restart, world_syncer),
            expected
        );
    }

    /// Walk another robot in from far away and back out again; speed must
    /// reach zero inside the warning distance and stay zero until the
    /// restart distance is exceeded.
    #[test]
    fn speed_does_not_resume_between_thresholds() {
        let (warning, restart) = (100.0, 115.0);
        let distances: Vec<f64> = (0..=40)
            .map(|i| 200.0 - f64::from(i) * 5.0)
            .chain((0..=40).map(|i| f64::from(i) * 5.0))
            .collect();

        let mut almost = false;
        let mut speed = 10.0;
        let mut entered = false;
        for d in distances {
            match proximity_action(almost, d < warning, d >= restart, false) {
                ProximityAction::Hold => {
                    almost = true;
                    speed = 0.0;
                    entered = true;
                }
                ProximityAction::Resume => {
                    assert!(d >= restart, "resumed at {d}");
                    almost = false;
                    speed = 10.0;
                }
                ProximityAction::Replan => unreachable!(),
                ProximityAction::None => {}
            }
            if entered && d < restart && almost {
                assert_eq!(speed, 0.0, "moving at {d}");
            }
        }
        assert!(entered);
        assert_eq!(speed, 10.0);
    }

    #[rstest]
    #[case(0, 10.0, 0, None)]
    #[case(0, 10.0, 1, None)]
    #[case(0, 10.0, 25, Some(10))]
    #[case(20, 10.0, 25, Some(24))]
    #[case(24, 10.0, 25, None)]
    #[case(5, 0.0, 25, Some(5))]
    #[case(5, 0.5, 25, Some(6))]
    #[case(5, 2.9, 25, Some(7))]
    fn path_index_steps(
        #[case] index: usize,
        #[case] speed: f32,
        #[case] len: usize,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(next_path_index(index, speed, len), expected);
    }

    #[test]
    fn drives_around_wall_to_goal() {
        let ctx = fast_context();
        ctx.populate();
        let robot = ctx.local_robot().unwrap();
        assert_eq!(robot.start_driving(), DriveOutcome::Arrived);
        assert!(!robot.is_driving());
        assert_eq!(robot.start_position().unwrap(), Point::new(163, 111));
        let goal = ctx.world().goal_named("Goal").unwrap().region();
        assert!(robot.intersects(&goal).unwrap());
    }

    #[test]
    fn no_goal_ends_drive() {
        let ctx = fast_context();
        ctx.update_world(|w| w.new_robot("Robot", Point::new(100, 100)));
        let robot = ctx.local_robot().unwrap();
        assert_eq!(robot.start_driving(), DriveOutcome::NoGoal);
    }

    #[test]
    fn unreachable_goal_reports_no_route() {
        let ctx = fast_context();
        ctx.update_world(|w| {
            w.new_robot("Robot", Point::new(100, 100));
            w.new_goal("Goal", Point::new(300, 300));
            w.new_wall(Point::new(250, 250), Point::new(350, 250));
            w.new_wall(Point::new(350, 250), Point::new(350, 350));
            w.new_wall(Point::new(350, 350), Point::new(250, 350));
            w.new_wall(Point::new(250, 350), Point::new(250, 250));
        });
        let robot = ctx.local_robot().unwrap();
        assert_eq!(robot.start_driving(), DriveOutcome::NoRoute);
        assert!(robot.path().unwrap().is_empty());
    }

    #[test]
    fn robot_outside_world_stops_immediately() {
        let ctx = fast_context();
        ctx.update_world(|w| {
            w.new_robot("Robot", Point::new(0, 100));
            w.new_goal("Goal", Point::new(300, 300));
        });
        let robot = ctx.local_robot().unwrap();
        assert_eq!(robot.start_driving(), DriveOutcome::LeftWorld);
    }

    #[test]
    fn non_syncer_holds_near_another_robot() {
        let ctx = SimContext::new(SimConfig {
            local_port: 0,
            step_interval_ms: 5,
            ..SimConfig::default()
        })
        .unwrap();
        ctx.update_world(|w| {
            w.new_robot("Robot", Point::new(100, 100));
            w.new_robot("Other", Point::new(100, 170));
            w.new_goal("Goal", Point::new(400, 100));
        });
        let robot = ctx.local_robot().unwrap();
        robot.start_acting().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !robot.is_almost_collided() {
            assert!(Instant::now() < deadline, "never entered near-collision");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(robot.speed().unwrap(), 0.0);
        let held = robot.position().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(robot.position().unwrap(), held);
        assert!(robot.is_acting());

        robot.stop_acting();
        assert!(!robot.is_acting());
        assert!(!robot.is_driving());
        assert_eq!(robot.last_drive_outcome(), Some(DriveOutcome::Stopped));
    }

    #[test]
    fn start_acting_twice_keeps_one_thread() {
        let ctx = SimContext::new(SimConfig {
            local_port: 0,
            step_interval_ms: 20,
            ..SimConfig::default()
        })
        .unwrap();
        ctx.populate();
        let robot = ctx.local_robot().unwrap();
        robot.start_acting().unwrap();
        robot.start_acting().unwrap();
        assert!(robot.is_acting());
        robot.stop_acting();
        assert!(!robot.is_acting());
        assert!(robot.last_drive_outcome().is_some());
    }
}
