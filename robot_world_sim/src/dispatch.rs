// `MessageHandler` for `Robot`: what a robot does with peer messages.
//
// Requests arrive on this robot's server thread and are rewritten in place
// into replies:
//
// | request                    | reply type / body                            |
// |----------------------------|----------------------------------------------|
// | EchoRequest                | EchoResponse, "EchoResponse: " + request text|
// | StopCommunicatingRequest   | StopCommunicatingResponse; server then stops |
// | SyncWorldRequest           | SyncWorldResponse, our world before merging  |
// | SyncRobotRequest           | SyncRobotResponse, empty                     |
// | StartRobotRequest          | unchanged; the robot starts acting           |
// | GenericRequest             | GenericResponse, same body                   |
// | *ExceptionRequest          | matching *ExceptionResponse, same body       |
//
// Replies reach `handle_response` on the thread that sent the request. Only a
// `SyncWorldResponse` changes state (the peer's world is merged); transport
// errors and exception replies are logged.
//
// Sync bodies that fail to decode leave the world untouched.

use robot_world_messaging::MessageHandler;
use robot_world_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use crate::notify::Notification;
use crate::robot::Robot;
use crate::world_sync;

impl Robot {
    /// Decode a world body from the peer and merge it with the configured
    /// policy.
    fn merge_world_body(&self, body: &str) {
        match world_sync::decode(body) {
            Ok(snapshot) => {
                let policy = self.context().config().merge_policy;
                let report = self
                    .context()
                    .update_world(|world| world_sync::merge(world, &snapshot, policy));
                info!(robot = %self.id(), ?report, "world merged");
            }
            Err(e) => warn!(robot = %self.id(), error = %e, body, "world sync rejected"),
        }
    }

    fn merge_robot_body(&self, body: &str) {
        match world_sync::decode_robot(body) {
            Ok(pose) => {
                let id = world_sync::update_remote_robot(&mut self.context().world(), pose);
                match id {
                    Some(id) => self.context().notify(Notification::RobotChanged(id)),
                    None => debug!(robot = %self.id(), "no replica to move"),
                }
            }
            Err(e) => warn!(robot = %self.id(), error = %e, body, "robot sync rejected"),
        }
    }
}

impl MessageHandler for Robot {
    fn handle_request(&self, message: &mut Message) {
        let kind = message.message_type();
        debug!(robot = %self.id(), %kind, "request");
        match kind {
            MessageType::EchoRequest => {
                message.set_message_type(MessageType::EchoResponse);
                let body = format!("EchoResponse: {}", message.as_string());
                message.set_body(body);
            }
            MessageType::StopCommunicatingRequest => {
                message.set_message_type(MessageType::StopCommunicatingResponse);
                message.set_body("StopCommunicatingResponse");
                // The reply is still written: the server drains this session
                // before it exits.
                self.close_link(true);
            }
            MessageType::SyncWorldRequest => {
                let ours = self.get_world_info();
                self.merge_world_body(message.body());
                message.set_message_type(MessageType::SyncWorldResponse);
                message.set_body(ours);
            }
            MessageType::SyncRobotRequest => {
                self.merge_robot_body(message.body());
                message.set_message_type(MessageType::SyncRobotResponse);
                message.set_body("");
            }
            MessageType::StartRobotRequest => {
                if let Err(e) = self.start_acting() {
                    warn!(robot = %self.id(), error = %e, "could not start acting");
                }
            }
            MessageType::GenericRequest => {
                message.set_message_type(MessageType::GenericResponse);
            }
            MessageType::ApplicationExceptionRequest | MessageType::ServerSideExceptionRequest => {
                warn!(robot = %self.id(), %kind, body = message.body(), "peer reported a fault");
                if let Some(response) = kind.response_type() {
                    message.set_message_type(response);
                }
            }
            kind if kind.is_transport_error() => {
                warn!(robot = %self.id(), %kind, body = message.body(), "transport error");
            }
            _ => {
                debug!(robot = %self.id(), %kind, "not a request, ignored");
            }
        }
    }

    fn handle_response(&self, message: &Message) {
        let kind = message.message_type();
        match kind {
            MessageType::SyncWorldResponse => self.merge_world_body(message.body()),
            MessageType::ApplicationExceptionResponse
            | MessageType::ServerSideExceptionResponse => {
                warn!(robot = %self.id(), %kind, body = message.body(), "peer fault");
            }
            kind if kind.is_transport_error() => {
                warn!(robot = %self.id(), %kind, body = message.body(), "request failed");
            }
            _ => debug!(robot = %self.id(), %kind, "response"),
        }
    }
}
