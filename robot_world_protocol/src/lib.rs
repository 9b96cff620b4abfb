// robot_world_protocol — wire protocol between two peer robot simulations.
//
// Defines the message envelope and the framing used by the messaging crate
// (`robot_world_messaging`) on every connection. It has no dependency on the
// sim crate: message bodies are plain strings whose grammar belongs to the
// sim's world-sync codec.
//
// Module overview:
// - `message.rs`:  `MessageType` (request/response/error kinds, request →
//                  response mapping) and the mutable `Message` envelope.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
// - `error.rs`:    `ProtocolError`.
//
// Design decisions:
// - **JSON payloads.** The body is already text; JSON adds the type tag
//   without a custom binary layout.
// - **No async runtime.** Uses `std::io::Read`/`Write`, compatible with
//   blocking TCP streams and buffered wrappers.

pub mod error;
pub mod framing;
pub mod message;

pub use error::ProtocolError;
pub use framing::{MAX_FRAME_SIZE, receive_message, send_message};
pub use message::{Message, MessageType};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Frame a message, read it back, compare.
    fn roundtrip(msg: &Message) {
        let mut wire = Vec::new();
        send_message(&mut wire, msg).unwrap();
        let mut cursor = Cursor::new(&wire);
        assert_eq!(&receive_message(&mut cursor).unwrap(), msg);
    }

    #[rstest::rstest]
    #[case(MessageType::EchoRequest, "ping")]
    #[case(MessageType::StopCommunicatingRequest, "stop")]
    #[case(MessageType::SyncRobotRequest, "Robot10,20,-1,0")]
    #[case(MessageType::CommunicationReadError, "")]
    #[case(MessageType::StartRobotRequest, "")]
    fn framed_messages_keep_type_and_body(#[case] ty: MessageType, #[case] body: &str) {
        roundtrip(&Message::new(ty, body));
    }

    #[test]
    fn unicode_body_survives() {
        roundtrip(&Message::new(MessageType::GenericRequest, "robôt → goal"));
    }
}
