// Length-delimited message framing over TCP.
//
// Each message on the wire is a 4-byte big-endian length prefix followed by a
// JSON-serialized `Message`. A single `receive_message` therefore yields
// exactly one complete message, no matter how the stream was segmented.
//
// `write_frame` / `read_frame` handle the raw prefix + payload and stay
// format-agnostic; `send_message` / `receive_message` add the JSON layer.
//
// `MAX_FRAME_SIZE` (1 MB) protects against unbounded allocation from a
// malformed length prefix. World-sync bodies are the largest messages and are
// a few kilobytes at most.

use std::io::{Read, Write};

use crate::error::ProtocolError;
use crate::message::Message;

/// Maximum accepted frame payload in bytes.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Write one frame: 4-byte big-endian length, then payload, then flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    let len = payload.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(ProtocolError::TooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. Fails with an `UnexpectedEof` i/o error if the stream
/// closes before or during the frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge {
            len: len as usize,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serialize `message` and write it as one frame.
pub fn send_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), ProtocolError> {
    let json = serde_json::to_vec(message)?;
    write_frame(writer, &json)
}

/// Read one frame and deserialize it into a `Message`.
pub fn receive_message<R: Read>(reader: &mut R) -> Result<Message, ProtocolError> {
    let bytes = read_frame(reader)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::io::Cursor;

    #[test]
    fn message_survives_the_wire() {
        let original = Message::new(
            MessageType::SyncWorldRequest,
            "Walls7,234,419,234;Goals320,285;Robot163,111,0,0",
        );
        let mut wire = Vec::new();
        send_message(&mut wire, &original).unwrap();

        let mut cursor = Cursor::new(&wire);
        assert_eq!(receive_message(&mut cursor).unwrap(), original);
    }

    #[test]
    fn one_read_yields_one_message() {
        let first = Message::new(MessageType::EchoRequest, "first");
        let second = Message::new(MessageType::EchoRequest, "second");
        let mut wire = Vec::new();
        send_message(&mut wire, &first).unwrap();
        send_message(&mut wire, &second).unwrap();

        let mut cursor = Cursor::new(&wire);
        assert_eq!(receive_message(&mut cursor).unwrap(), first);
        assert_eq!(receive_message(&mut cursor).unwrap(), second);
        assert!(receive_message(&mut cursor).unwrap_err().is_eof());
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_FRAME_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &big).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let fake_len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { .. }));
    }

    #[test]
    fn truncated_frame_is_eof() {
        // Prefix promises 10 bytes, only 3 follow.
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(wire);
        assert!(read_frame(&mut cursor).unwrap_err().is_eof());
    }

    #[test]
    fn garbage_payload_is_a_json_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"not json").unwrap();
        let mut cursor = Cursor::new(&wire);
        let err = receive_message(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
