// Test-only peer harness for end-to-end sync tests.
//
// Runs two complete simulation instances in one process: each `TestPeer`
// owns its own `SimContext` (config, world, communication service, planner)
// and the agent for its local robot, bound to a loopback port. The two
// configs point at each other, so everything the tests exercise goes
// through the real `Robot`, `Server` and `Client` code paths over TCP.
//
// The only test-specific code here is port reservation and the blocking
// `wait_until` polling helper.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use robot_world_messaging::Client;
use robot_world_protocol::{Message, MessageType};
use robot_world_sim::types::Point;
use robot_world_sim::{Robot, SimConfig, SimContext};

/// Default timeout for blocking waits.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One simulation instance with a communicating local robot.
pub struct TestPeer {
    pub ctx: Arc<SimContext>,
    pub robot: Arc<Robot>,
    pub port: u16,
}

impl TestPeer {
    /// Send one request straight to `port` using this peer's robot as the
    /// reply handler.
    pub fn send_to(&self, port: u16, message_type: MessageType, body: &str) -> Message {
        Client::new("127.0.0.1", port, self.robot.as_ref())
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
            .dispatch_message(Message::new(message_type, body))
    }

    pub fn robot_count(&self) -> usize {
        self.ctx.world().robots().len()
    }

    /// Position of this peer's replica of the other robot.
    pub fn replica_position(&self) -> Option<Point> {
        self.ctx.world().remote_robot().map(|r| r.position)
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.robot.shutdown();
        self.ctx.shutdown();
    }
}

/// A free port on all interfaces. The listener is dropped before returning;
/// `start_communicating` retries if the port is briefly unavailable.
pub fn free_port() -> u16 {
    TcpListener::bind("0.0.0.0:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}

/// Two populated peers wired to each other over loopback. `tweak` adjusts
/// each config (`0` for the first peer, `1` for the second) before the
/// context is built. Both robots are communicating on return.
pub fn peer_pair(tweak: impl Fn(usize, &mut SimConfig)) -> (TestPeer, TestPeer) {
    let ports = [free_port(), free_port()];
    let mut peers = (0..2).map(|i| {
        let mut config = SimConfig {
            local_port: ports[i],
            remote_ip: "127.0.0.1".into(),
            remote_port: ports[1 - i],
            step_interval_ms: 5,
            connect_timeout_ms: 1000,
            io_timeout_ms: 2000,
            ..SimConfig::default()
        };
        tweak(i, &mut config);
        let ctx = SimContext::new(config).expect("bad test config");
        ctx.populate();
        let robot = ctx.local_robot().expect("populate made no robot");
        let port = robot.start_communicating().expect("bind failed");
        TestPeer { ctx, robot, port }
    });
    let first = peers.next().expect("first peer");
    let second = peers.next().expect("second peer");
    (first, second)
}

/// Poll `condition` until it holds or `WAIT_TIMEOUT` passes.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < WAIT_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}
