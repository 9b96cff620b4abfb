// Error type for framing and message (de)serialization.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: u32 },
}

impl ProtocolError {
    /// True if the peer closed the connection before a full frame arrived.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
