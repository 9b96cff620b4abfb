// The robot agent: one controllable robot of a simulation instance.
//
// A `Robot` does not own its geometry. Position, facing, speed, size and the
// planned path live in the world as a `RobotState`, looked up by `ObjectId`
// through the shared `SimContext`; the agent owns only the control state:
//
// - `acting`: a drive thread exists (see `drive.rs`),
// - `driving`: the drive loop should keep stepping,
// - `communicating`: a server bound for this robot is registered, plus a
//   pose sender thread that pushes `SyncRobotRequest`s to the peer,
// - `almost_collided` / `world_syncer`: near-collision policy inputs.
//
// Agents are built with `Arc::new_cyclic` and keep a `Weak` to themselves,
// so `start_acting` and `start_communicating` can hand an `Arc<Robot>` to a
// thread or a server from `&self`. The server's handler `Arc` forms a cycle
// (robot → context → service → server → robot) that `stop_communicating` or
// `shutdown` breaks; an agent that is still communicating stays alive.
//
// Outbound poses go through an `mpsc` channel to the pose sender thread,
// which coalesces a backlog down to the newest pose. A slow peer therefore
// never stalls the drive loop's step timer.
//
// See also: `drive.rs` (acting, driving, the control loop), `dispatch.rs`
// (`MessageHandler` impl), `context.rs` (locking discipline).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use robot_world_messaging::{Client, MessagingError};
use robot_world_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use crate::context::SimContext;
use crate::drive::DriveOutcome;
use crate::error::SimError;
use crate::geometry::Region;
use crate::notify::Notification;
use crate::types::{FrontVector, ObjectId, Point, RobotPose, Size};
use crate::world::RobotState;
use crate::world_sync;

/// How often `start_communicating` retries a port still held by a draining
/// server, and how long it waits between tries.
const BIND_RETRIES: u32 = 20;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Server port plus the pose sender, present while communicating.
#[derive(Default)]
struct Link {
    port: Option<u16>,
    outbox: Option<Sender<RobotPose>>,
    sender: Option<JoinHandle<()>>,
}

pub struct Robot {
    id: ObjectId,
    ctx: Arc<SimContext>,
    me: Weak<Robot>,
    pub(crate) acting: AtomicBool,
    pub(crate) driving: AtomicBool,
    communicating: AtomicBool,
    pub(crate) almost_collided: AtomicBool,
    pub(crate) world_syncer: AtomicBool,
    pub(crate) drive_thread: Mutex<Option<JoinHandle<()>>>,
    pub(crate) last_outcome: Mutex<Option<DriveOutcome>>,
    link: Mutex<Link>,
}

impl Robot {
    pub(crate) fn new(ctx: Arc<SimContext>, id: ObjectId) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            ctx,
            me: me.clone(),
            acting: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            communicating: AtomicBool::new(false),
            almost_collided: AtomicBool::new(false),
            world_syncer: AtomicBool::new(false),
            drive_thread: Mutex::new(None),
            last_outcome: Mutex::new(None),
            link: Mutex::new(Link::default()),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    /// A strong handle to this agent. None only while it is being dropped.
    pub(crate) fn handle(&self) -> Option<Arc<Robot>> {
        self.me.upgrade()
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- World-backed state ------------------------------------------------

    /// Run `f` on this robot's world state under the world lock.
    pub fn read<R>(&self, f: impl FnOnce(&RobotState) -> R) -> Result<R, SimError> {
        let world = self.ctx.world();
        let state = world.robot(self.id).ok_or(SimError::UnknownRobot(self.id))?;
        Ok(f(state))
    }

    /// Mutate this robot's world state; announce it if `notify`.
    pub fn write<R>(
        &self,
        notify: bool,
        f: impl FnOnce(&mut RobotState) -> R,
    ) -> Result<R, SimError> {
        let result = {
            let mut world = self.ctx.world();
            let state = world
                .robot_mut(self.id)
                .ok_or(SimError::UnknownRobot(self.id))?;
            f(state)
        };
        if notify {
            self.ctx.notify(Notification::RobotChanged(self.id));
        }
        Ok(result)
    }

    pub fn state(&self) -> Result<RobotState, SimError> {
        self.read(RobotState::clone)
    }

    pub fn name(&self) -> Result<String, SimError> {
        self.read(|r| r.name.clone())
    }

    pub fn size(&self) -> Result<Size, SimError> {
        self.read(|r| r.size)
    }

    pub fn position(&self) -> Result<Point, SimError> {
        self.read(|r| r.position)
    }

    pub fn front(&self) -> Result<FrontVector, SimError> {
        self.read(|r| r.front)
    }

    pub fn speed(&self) -> Result<f32, SimError> {
        self.read(|r| r.speed)
    }

    pub fn start_position(&self) -> Result<Point, SimError> {
        self.read(|r| r.start_position)
    }

    pub fn path(&self) -> Result<Vec<Point>, SimError> {
        self.read(|r| r.path.clone())
    }

    pub fn set_name(&self, name: &str, notify: bool) -> Result<(), SimError> {
        self.write(notify, |r| r.name = name.to_string())
    }

    pub fn set_size(&self, size: Size, notify: bool) -> Result<(), SimError> {
        self.write(notify, |r| r.size = size)
    }

    pub fn set_position(&self, position: Point, notify: bool) -> Result<(), SimError> {
        self.write(notify, |r| r.position = position)
    }

    pub fn set_front(&self, front: FrontVector, notify: bool) -> Result<(), SimError> {
        self.write(notify, |r| r.front = front)
    }

    pub fn set_speed(&self, speed: f32, notify: bool) -> Result<(), SimError> {
        self.write(notify, |r| r.speed = speed)
    }

    pub fn clear_path(&self) -> Result<(), SimError> {
        self.write(false, RobotState::clear_path)
    }

    pub fn region(&self) -> Result<Region, SimError> {
        self.read(RobotState::region)
    }

    pub fn intersects(&self, region: &Region) -> Result<bool, SimError> {
        self.read(|r| r.intersects(region))
    }

    /// True if another robot is strictly closer than `max_distance`
    /// (robots at distance zero are ignored).
    pub fn close_to_other_robot(&self, max_distance: f64) -> bool {
        self.ctx.world().close_to_other_robot(self.id, max_distance)
    }

    pub fn arrived(&self, goal: ObjectId) -> bool {
        self.ctx.world().arrived(self.id, goal)
    }

    pub fn collision(&self) -> bool {
        self.ctx.world().collision(self.id)
    }

    pub fn as_string(&self) -> String {
        self.read(ToString::to_string)
            .unwrap_or_else(|_| format!("Robot {} (removed)", self.id))
    }

    // -- Flags -------------------------------------------------------------

    pub fn is_acting(&self) -> bool {
        self.acting.load(Ordering::SeqCst)
    }

    pub fn is_driving(&self) -> bool {
        self.driving.load(Ordering::SeqCst)
    }

    pub fn is_communicating(&self) -> bool {
        self.communicating.load(Ordering::SeqCst)
    }

    pub fn is_almost_collided(&self) -> bool {
        self.almost_collided.load(Ordering::SeqCst)
    }

    /// True after this robot pushed its world to the peer, until it arrives
    /// or collides.
    pub fn is_world_syncer(&self) -> bool {
        self.world_syncer.load(Ordering::SeqCst)
    }

    // -- Communication -----------------------------------------------------

    /// Port of this robot's server while communicating.
    pub fn server_port(&self) -> Option<u16> {
        self.link().port
    }

    /// Bind this robot's server on the configured local port and start the
    /// pose sender. Revives a stopped communication service. Returns the
    /// bound port; a no-op returning the current port if already
    /// communicating.
    pub fn start_communicating(&self) -> Result<u16, SimError> {
        let mut link = self.link();
        if let (true, Some(port)) = (self.is_communicating(), link.port) {
            return Ok(port);
        }
        let robot = self.handle().ok_or(SimError::UnknownRobot(self.id))?;
        let comms = self.ctx.comms();
        if comms.is_stopped() {
            info!("restarting communication service");
            comms.restart();
        }

        let local_port = self.ctx.config().local_port;
        let mut attempt = 0;
        let port = loop {
            match comms.start_server(local_port, robot.clone()) {
                Ok(port) => break port,
                Err(MessagingError::Io(e))
                    if e.kind() == std::io::ErrorKind::AddrInUse && attempt < BIND_RETRIES =>
                {
                    // A server that stopped a moment ago may still be draining.
                    attempt += 1;
                    thread::sleep(BIND_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let (outbox, poses) = mpsc::channel();
        let weak = self.me.clone();
        let sender = thread::Builder::new()
            .name(format!("robot-{}-sync", self.id.0))
            .spawn(move || run_pose_sender(weak, poses));
        let sender = match sender {
            Ok(handle) => handle,
            Err(e) => {
                comms.stop_server(port, false);
                return Err(e.into());
            }
        };

        *link = Link {
            port: Some(port),
            outbox: Some(outbox),
            sender: Some(sender),
        };
        self.communicating.store(true, Ordering::SeqCst);
        info!(robot = %self.id, port, "communicating");
        Ok(port)
    }

    /// Stop this robot's server by sending it a `StopCommunicatingRequest`,
    /// so the stop goes through the same drain as a peer-requested one.
    /// Falls back to stopping the server directly if the round trip fails.
    pub fn stop_communicating(&self) {
        if !self.communicating.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(port) = self.server_port() else {
            return;
        };
        if self.ctx.comms().is_server_thread(port) {
            // Inside one of our own sessions: a round trip would deadlock.
            self.close_link(true);
            return;
        }
        let config = self.ctx.config();
        let reply = Client::new("localhost", port, self)
            .with_timeouts(config.connect_timeout(), config.io_timeout())
            .dispatch_message(Message::new(MessageType::StopCommunicatingRequest, "stop"));
        if reply.message_type() != MessageType::StopCommunicatingResponse {
            warn!(robot = %self.id, port, reply = %reply, "stop request not answered");
        }
        self.close_link(false);
        info!(robot = %self.id, port, "stopped communicating");
    }

    /// Tear down whatever of the link is left. `graceful` is used from
    /// inside a session of our own server: it lets that session finish and
    /// does not wait for the pose sender.
    pub(crate) fn close_link(&self, graceful: bool) {
        self.communicating.store(false, Ordering::SeqCst);
        let link = std::mem::take(&mut *self.link());
        if let Some(port) = link.port {
            self.ctx.comms().stop_server(port, graceful);
        }
        drop(link.outbox);
        if let Some(handle) = link.sender {
            if !graceful && handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn peer_client(&self) -> Client<'_> {
        let config = self.ctx.config();
        Client::new(config.remote_ip.clone(), config.remote_port, self)
            .with_timeouts(config.connect_timeout(), config.io_timeout())
    }

    /// Queue a pose for the peer. Dropped if not communicating.
    pub(crate) fn broadcast_pose(&self, pose: RobotPose) {
        if let Some(outbox) = &self.link().outbox {
            let _ = outbox.send(pose);
        }
    }

    fn send_pose(&self, pose: RobotPose) {
        let message = Message::new(MessageType::SyncRobotRequest, world_sync::encode_robot(pose));
        let reply = self.peer_client().dispatch_message(message);
        if reply.message_type().is_transport_error() {
            debug!(robot = %self.id, reply = %reply, "pose not delivered");
        }
    }

    /// The encoded world: walls, goals and the local robot's pose.
    pub fn get_world_info(&self) -> String {
        world_sync::encode_world(&self.ctx.world())
    }

    /// Push the local world to the peer; the peer's world comes back in the
    /// reply and is merged by `handle_response`. Marks this robot as the
    /// world syncer.
    pub fn send_world_info(&self) -> Message {
        let body = self.get_world_info();
        info!(robot = %self.id, %body, "sending world info");
        let reply = self
            .peer_client()
            .dispatch_message(Message::new(MessageType::SyncWorldRequest, body));
        self.world_syncer.store(true, Ordering::SeqCst);
        reply
    }

    /// Ask the peer's robot to start acting.
    pub fn request_peer_start(&self) -> Message {
        self.peer_client()
            .dispatch_message(Message::new(MessageType::StartRobotRequest, "start"))
    }

    /// Stop acting and communicating. Must be called before the robot is
    /// removed from the world.
    pub fn shutdown(&self) {
        self.stop_acting();
        self.stop_communicating();
    }
}

/// Pose sender thread body: forward the newest queued pose to the peer
/// until the outbox is dropped.
fn run_pose_sender(robot: Weak<Robot>, poses: Receiver<RobotPose>) {
    while let Ok(mut pose) = poses.recv() {
        while let Ok(newer) = poses.try_recv() {
            pose = newer;
        }
        let Some(robot) = robot.upgrade() else {
            break;
        };
        if robot.is_communicating() {
            robot.send_pose(pose);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn context() -> Arc<SimContext> {
        let ctx = SimContext::new(SimConfig {
            local_port: 0,
            ..SimConfig::default()
        })
        .unwrap();
        ctx.populate();
        ctx
    }

    #[test]
    fn setters_write_through_to_the_world() {
        let ctx = context();
        let robot = ctx.local_robot().unwrap();
        let rx = ctx.subscribe();

        robot.set_position(Point::new(10, 20), false).unwrap();
        assert!(rx.try_recv().is_err());
        robot.set_front(FrontVector::new(1, 0), true).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Notification::RobotChanged(robot.id()));

        let state = ctx.world().robot(robot.id()).cloned().unwrap();
        assert_eq!(state.position, Point::new(10, 20));
        assert_eq!(state.front, FrontVector::new(1, 0));
        assert_eq!(robot.as_string(), "Robot Robot at (10,20)");
    }

    #[test]
    fn removed_robot_reports_unknown() {
        let ctx = context();
        let robot = ctx.local_robot().unwrap();
        ctx.update_world(|w| w.unpopulate());
        assert!(matches!(robot.position(), Err(SimError::UnknownRobot(_))));
    }

    #[test]
    fn world_info_matches_default_layout() {
        let ctx = context();
        let robot = ctx.local_robot().unwrap();
        assert_eq!(
            robot.get_world_info(),
            "Walls7,234,419,234;Goals320,285;Robot163,111,0,0"
        );
    }

    #[test]
    fn communicating_round_trip() {
        let ctx = context();
        let robot = ctx.local_robot().unwrap();
        let port = robot.start_communicating().unwrap();
        assert!(robot.is_communicating());
        assert_eq!(robot.start_communicating().unwrap(), port);
        assert!(ctx.comms().is_serving(port));

        robot.stop_communicating();
        assert!(!robot.is_communicating());
        assert!(!ctx.comms().is_serving(port));
        assert_eq!(robot.server_port(), None);
    }

    #[test]
    fn start_communicating_revives_stopped_service() {
        let ctx = context();
        let robot = ctx.local_robot().unwrap();
        ctx.comms().stop();
        let port = robot.start_communicating().unwrap();
        assert!(!ctx.comms().is_stopped());
        assert!(ctx.comms().is_serving(port));
        robot.shutdown();
    }
}
