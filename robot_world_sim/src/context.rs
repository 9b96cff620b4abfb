// Per-instance simulation context.
//
// `SimContext` bundles everything one peer instance shares between its
// threads: the config, the world, the communication service, the change
// notifier and the path planner. It is constructed explicitly and handed to
// every `Robot` as an `Arc<SimContext>`; there are no process globals, so
// two peers can run side by side in one process.
//
// Locking discipline: the world sits behind one coarse mutex. Every read and
// every mutation of world data goes through `world()` or `update_world()`,
// and the guard is never held across network I/O, planning or sleeps.
// Notifications are published after the guard is released.
//
// The context also keeps one `Robot` agent per world robot: `local_robot` and
// `robot_agent` hand out the live agent if there is one, so a robot's control
// flags and drive thread exist only once however many handles are taken.
//
// See also: `robot.rs` for the agent that uses the context, `main.rs` for
// how the binary builds one.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use robot_world_messaging::CommunicationService;
use tracing::info;

use crate::config::SimConfig;
use crate::error::SimError;
use crate::notify::{Notification, Notifier};
use crate::pathfinding::{GridAStar, PathPlanner};
use crate::robot::Robot;
use crate::types::ObjectId;
use crate::world::{Scenario, World};

pub struct SimContext {
    config: SimConfig,
    world: Mutex<World>,
    comms: Arc<CommunicationService>,
    notifier: Notifier,
    planner: Arc<dyn PathPlanner>,
    agents: Mutex<BTreeMap<ObjectId, Weak<Robot>>>,
}

impl SimContext {
    /// A context with an empty world, its own communication service and a
    /// grid A* planner sized from `config`.
    pub fn new(config: SimConfig) -> Result<Arc<Self>, SimError> {
        let planner = Arc::new(GridAStar::new(
            config.world_width,
            config.world_height,
            config.grid_step,
        ));
        Self::with_parts(config, Arc::new(CommunicationService::new()), planner)
    }

    pub fn with_parts(
        config: SimConfig,
        comms: Arc<CommunicationService>,
        planner: Arc<dyn PathPlanner>,
    ) -> Result<Arc<Self>, SimError> {
        config.validate()?;
        let world = World::new(config.robot_size, config.goal_size);
        Ok(Arc::new(Self {
            config,
            world: Mutex::new(world),
            comms,
            notifier: Notifier::new(),
            planner,
            agents: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn comms(&self) -> &Arc<CommunicationService> {
        &self.comms
    }

    pub fn planner(&self) -> &dyn PathPlanner {
        self.planner.as_ref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        self.notifier.publish(notification);
    }

    /// Lock the world. Do not hold the guard across I/O.
    pub fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the world, then announce `WorldChanged`.
    pub fn update_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let result = f(&mut self.world());
        self.notify(Notification::WorldChanged);
        result
    }

    /// Fill the world with the default layout, naming the local robot after
    /// the configured name.
    pub fn populate(&self) {
        self.update_world(|world| world.populate(&self.config.name));
    }

    pub fn create_scenario(&self, scenario: Scenario) -> bool {
        let changed = self.world().create_scenario(scenario);
        if changed {
            self.notify(Notification::WorldChanged);
        }
        changed
    }

    /// Agent for the local robot (`robots[0]`).
    pub fn local_robot(self: &Arc<Self>) -> Result<Arc<Robot>, SimError> {
        let id = self
            .world()
            .local_robot()
            .map(|r| r.id)
            .ok_or(SimError::NoRobot)?;
        Ok(self.agent(id))
    }

    /// Agent for the robot `id`.
    pub fn robot_agent(self: &Arc<Self>, id: ObjectId) -> Result<Arc<Robot>, SimError> {
        if self.world().robot(id).is_none() {
            return Err(SimError::UnknownRobot(id));
        }
        Ok(self.agent(id))
    }

    /// The live agent for `id`, or a new one registered in its place.
    fn agent(self: &Arc<Self>, id: ObjectId) -> Arc<Robot> {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(robot) = agents.get(&id).and_then(Weak::upgrade) {
            return robot;
        }
        agents.retain(|_, agent| agent.strong_count() > 0);
        let robot = Robot::new(self.clone(), id);
        agents.insert(id, Arc::downgrade(&robot));
        robot
    }

    /// Stop the agent's threads and server, then delete its robot.
    pub fn remove_robot(&self, robot: &Robot) {
        robot.shutdown();
        let removed = self.update_world(|world| world.delete_robot_by_id(robot.id()));
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&robot.id());
        info!(robot = %robot.id(), removed, "robot removed");
    }

    /// Stop every server this context's service runs.
    pub fn shutdown(&self) {
        self.comms.stop();
    }
}
