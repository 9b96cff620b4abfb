// End-to-end tests for two peer instances syncing over loopback TCP.
//
// Each test builds a `peer_pair()` (two contexts, two communicating robots,
// configs pointing at each other) and drives the real request paths:
// world sync in both directions, pose sync, remote start with a full drive
// to the goal, and both ways of stopping a server.

use robot_world_protocol::MessageType;
use robot_world_sim::types::Point;
use robot_world_sim::{DriveOutcome, MergePolicy};
use rstest::rstest;

use peer_sync_tests::{TestPeer, peer_pair, wait_until};

/// Second peer's robot starts in the top-right corner, well clear of the
/// first robot and of the route it takes around the wall's right end.
const SECOND_START: Point = Point { x: 450, y: 60 };

fn separated_pair() -> (TestPeer, TestPeer) {
    let (a, b) = peer_pair(|i, config| {
        if i == 1 {
            config.name = "Beta".into();
        }
    });
    b.robot.set_position(SECOND_START, true).unwrap();
    (a, b)
}

// ---------------------------------------------------------------------------
// World and pose sync
// ---------------------------------------------------------------------------

#[test]
fn world_sync_creates_replicas_on_both_sides() {
    let (a, b) = separated_pair();

    let reply = a.robot.send_world_info();
    assert_eq!(reply.message_type(), MessageType::SyncWorldResponse);
    assert!(a.robot.is_world_syncer());
    assert!(!b.robot.is_world_syncer());

    // The request is merged on b before the server replies, and the reply is
    // merged on a before `send_world_info` returns.
    assert_eq!(b.robot_count(), 2);
    assert_eq!(b.replica_position(), Some(Point::new(163, 111)));
    assert_eq!(a.robot_count(), 2);
    assert_eq!(a.replica_position(), Some(SECOND_START));

    // Both sides already had the same wall and goal.
    for peer in [&a, &b] {
        let world = peer.ctx.world();
        assert_eq!(world.walls().len(), 1);
        assert_eq!(world.goals().len(), 1);
    }
}

#[rstest]
#[case(MergePolicy::DedupeByGeometry, 1)]
#[case(MergePolicy::Additive, 2)]
fn repeated_sync_follows_merge_policy(#[case] policy: MergePolicy, #[case] walls: usize) {
    let (a, b) = peer_pair(|_, config| config.merge_policy = policy);
    a.robot.send_world_info();
    assert_eq!(b.ctx.world().walls().len(), walls);
    assert_eq!(a.ctx.world().walls().len(), walls);
    // A second round never adds a third robot.
    a.robot.send_world_info();
    assert_eq!(b.robot_count(), 2);
    assert_eq!(a.robot_count(), 2);
}

#[test]
fn pose_sync_moves_the_replica() {
    let (a, b) = separated_pair();
    a.robot.send_world_info();

    let reply = a.send_to(b.port, MessageType::SyncRobotRequest, "Robot200,150,1,0");
    assert_eq!(reply.message_type(), MessageType::SyncRobotResponse);
    assert_eq!(reply.body(), "");
    assert_eq!(b.replica_position(), Some(Point::new(200, 150)));
}

#[test]
fn malformed_sync_is_answered_and_ignored() {
    let (a, b) = separated_pair();
    let before = b.ctx.world().as_debug_string();
    let reply = a.send_to(b.port, MessageType::SyncWorldRequest, "Walls1,2;Goals");
    assert_eq!(reply.message_type(), MessageType::SyncWorldResponse);
    assert_eq!(b.ctx.world().as_debug_string(), before);
}

#[test]
fn echo_returns_the_request_text() {
    let (a, b) = separated_pair();
    let reply = a.send_to(b.port, MessageType::EchoRequest, "ping");
    assert_eq!(reply.message_type(), MessageType::EchoResponse);
    assert!(reply.body().contains("ping"), "{}", reply.body());
}

// ---------------------------------------------------------------------------
// Remote start and driving
// ---------------------------------------------------------------------------

#[test]
fn remote_start_drives_peer_to_goal_and_mirrors_pose() {
    let (a, b) = separated_pair();
    a.robot.send_world_info();

    let reply = a.robot.request_peer_start();
    assert_eq!(reply.message_type(), MessageType::StartRobotRequest);

    wait_until("peer to finish driving", || {
        b.robot.last_drive_outcome().is_some()
    });
    assert_eq!(b.robot.last_drive_outcome(), Some(DriveOutcome::Arrived));
    assert!(!b.robot.is_driving());

    // The last pose b sent ends up on a's replica.
    let end = b.robot.position().unwrap();
    assert_ne!(end, SECOND_START);
    wait_until("replica to reach the final pose", || {
        a.replica_position() == Some(end)
    });
    assert_eq!(a.robot.position().unwrap(), Point::new(163, 111));
}

// ---------------------------------------------------------------------------
// Stopping
// ---------------------------------------------------------------------------

#[test]
fn self_stop_goes_through_the_server() {
    let (a, b) = separated_pair();
    let port = a.port;
    a.robot.stop_communicating();
    assert!(!a.robot.is_communicating());
    assert!(!a.ctx.comms().is_serving(port));

    let reply = b.send_to(port, MessageType::EchoRequest, "anyone?");
    assert!(reply.message_type().is_transport_error());

    // Communication can be restarted on the same port.
    assert_eq!(a.robot.start_communicating().unwrap(), port);
    let reply = b.send_to(port, MessageType::EchoRequest, "back?");
    assert_eq!(reply.message_type(), MessageType::EchoResponse);
}

#[test]
fn peer_requested_stop_gets_its_reply() {
    let (a, b) = separated_pair();
    let reply = a.send_to(b.port, MessageType::StopCommunicatingRequest, "stop");
    assert_eq!(reply.message_type(), MessageType::StopCommunicatingResponse);
    assert_eq!(reply.body(), "StopCommunicatingResponse");

    assert!(!b.robot.is_communicating());
    let port = b.port;
    wait_until("server to stop accepting", || {
        !b.ctx.comms().is_serving(port)
    });
}
