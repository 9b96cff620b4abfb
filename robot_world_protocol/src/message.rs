// Message envelope exchanged between two peer simulations.
//
// A `Message` is a `MessageType` tag plus a UTF-8 body. One message travels
// per connection in each direction: the client writes a request, the server's
// handler mutates that same message in place into the matching response, and
// the server writes it back. There is no correlation id; the pairing is
// implied by the connection.
//
// The body of sync messages carries a secondary text grammar (walls, goals,
// robot pose) that this crate never inspects. See `world_sync.rs` in the sim
// crate for that codec.
//
// Transport failures are represented as messages too
// (`CommunicationReadError`, `CommunicationWriteError`) so that callers can
// push them through the same handler dispatch as real replies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every kind of message the peers can exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Reading a message from a connection failed.
    CommunicationReadError,
    /// Writing a message to a connection failed (including connect failures).
    CommunicationWriteError,
    /// A fault raised by the server while serving a request.
    ServerSideExceptionRequest,
    ServerSideExceptionResponse,
    /// A domain fault surfaced across the wire by the application.
    ApplicationExceptionRequest,
    ApplicationExceptionResponse,
    /// Ask the receiving side to stop its server after replying.
    StopCommunicatingRequest,
    StopCommunicatingResponse,
    GenericRequest,
    GenericResponse,
    EchoRequest,
    EchoResponse,
    /// Exchange encoded walls, goals and the sender's robot pose.
    SyncWorldRequest,
    SyncWorldResponse,
    /// Push the sender's robot pose to the peer's replica of it.
    SyncRobotRequest,
    SyncRobotResponse,
    /// Ask the receiving robot to start acting. Has no response kind.
    StartRobotRequest,
}

impl MessageType {
    /// All message types, in declaration order.
    pub const ALL: [MessageType; 17] = [
        MessageType::CommunicationReadError,
        MessageType::CommunicationWriteError,
        MessageType::ServerSideExceptionRequest,
        MessageType::ServerSideExceptionResponse,
        MessageType::ApplicationExceptionRequest,
        MessageType::ApplicationExceptionResponse,
        MessageType::StopCommunicatingRequest,
        MessageType::StopCommunicatingResponse,
        MessageType::GenericRequest,
        MessageType::GenericResponse,
        MessageType::EchoRequest,
        MessageType::EchoResponse,
        MessageType::SyncWorldRequest,
        MessageType::SyncWorldResponse,
        MessageType::SyncRobotRequest,
        MessageType::SyncRobotResponse,
        MessageType::StartRobotRequest,
    ];

    /// The response kind a handler must turn this request into, if any.
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::ServerSideExceptionRequest => {
                Some(MessageType::ServerSideExceptionResponse)
            }
            MessageType::ApplicationExceptionRequest => {
                Some(MessageType::ApplicationExceptionResponse)
            }
            MessageType::StopCommunicatingRequest => Some(MessageType::StopCommunicatingResponse),
            MessageType::GenericRequest => Some(MessageType::GenericResponse),
            MessageType::EchoRequest => Some(MessageType::EchoResponse),
            MessageType::SyncWorldRequest => Some(MessageType::SyncWorldResponse),
            MessageType::SyncRobotRequest => Some(MessageType::SyncRobotResponse),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::ServerSideExceptionRequest
                | MessageType::ApplicationExceptionRequest
                | MessageType::StopCommunicatingRequest
                | MessageType::GenericRequest
                | MessageType::EchoRequest
                | MessageType::SyncWorldRequest
                | MessageType::SyncRobotRequest
                | MessageType::StartRobotRequest
        )
    }

    /// Transport error kinds produced locally, never sent by a peer.
    pub fn is_transport_error(self) -> bool {
        matches!(
            self,
            MessageType::CommunicationReadError | MessageType::CommunicationWriteError
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A typed message with a text body. Mutable in place so a handler can turn
/// a request into its response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    message_type: MessageType,
    body: String,
}

impl Message {
    pub fn new(message_type: MessageType, body: impl Into<String>) -> Self {
        Self {
            message_type,
            body: body.into(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_type = message_type;
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    /// Debug representation, not the wire form.
    pub fn as_string(&self) -> String {
        format!("type: {}, body: {}", self.message_type, self.body)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
