// Errors surfaced by the messaging layer's own API (binding, registration).
//
// Faults on an individual connection never show up here: they are turned
// into `CommunicationReadError` / `CommunicationWriteError` messages and
// delivered to a `MessageHandler` instead.

use robot_world_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("communication service is stopped")]
    ServiceStopped,
    #[error("a server is already registered on port {0}")]
    PortInUse(u16),
}
