// Short-lived TCP client: one connection per dispatched message.
//
// `dispatch_message` connects, writes the request, blocks for the single
// reply, hands the reply to `handle_response`, and closes. Nothing is pooled
// or retried. Transport faults never surface as `Err`: a failed connect or
// write becomes a `CommunicationWriteError` message, a failed read becomes a
// `CommunicationReadError` message, and either one goes through
// `handle_response` exactly like a real reply.
//
// This is the only blocking call in the messaging layer. It is bounded by
// the connect and i/o timeouts, and must be called from the caller's own
// thread (a drive thread or a one-shot user action), never from inside a
// server's `handle_request`, where it could wait on its own accept thread.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use robot_world_protocol::framing::{receive_message, send_message};
use robot_world_protocol::{Message, MessageType};
use tracing::{debug, warn};

use crate::handler::MessageHandler;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A round-trip failure, tagged with the error message kind it maps to.
struct TransportFault {
    kind: MessageType,
    text: String,
}

impl TransportFault {
    fn write(text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::CommunicationWriteError,
            text: text.into(),
        }
    }

    fn read(text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::CommunicationReadError,
            text: text.into(),
        }
    }

    fn into_message(self) -> Message {
        Message::new(self.kind, self.text)
    }
}

/// Client for one remote host:port. Cheap to construct; holds no socket
/// between calls.
pub struct Client<'a> {
    host: String,
    port: u16,
    handler: &'a dyn MessageHandler,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl<'a> Client<'a> {
    pub fn new(host: impl Into<String>, port: u16, handler: &'a dyn MessageHandler) -> Self {
        Self {
            host: host.into(),
            port,
            handler,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    /// Send `message`, wait for the reply, pass it (or the error message
    /// standing in for it) to the handler, and return it.
    pub fn dispatch_message(&self, message: Message) -> Message {
        let reply = match self.round_trip(&message) {
            Ok(reply) => reply,
            Err(fault) => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    kind = %fault.kind,
                    error = %fault.text,
                    "round trip failed"
                );
                fault.into_message()
            }
        };
        debug!(
            request = %message.message_type(),
            reply = %reply.message_type(),
            "round trip finished"
        );
        self.handler.handle_response(&reply);
        reply
    }

    fn round_trip(&self, message: &Message) -> Result<Message, TransportFault> {
        let stream = self.connect()?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.io_timeout)))
            .map_err(|e| TransportFault::write(e.to_string()))?;
        let read_half = stream
            .try_clone()
            .map_err(|e| TransportFault::write(e.to_string()))?;

        let mut writer = BufWriter::new(stream);
        send_message(&mut writer, message).map_err(|e| TransportFault::write(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        receive_message(&mut reader).map_err(|e| TransportFault::read(e.to_string()))
    }

    /// Try every address the host resolves to, so "localhost" works whether
    /// it resolves to IPv4 or IPv6 first.
    fn connect(&self) -> Result<TcpStream, TransportFault> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportFault::write(format!("resolve {}: {e}", self.host)))?
            .collect();

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(TransportFault::write(match last_error {
            Some(e) => format!("connect {}:{}: {e}", self.host, self.port),
            None => format!("no address for {}", self.host),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Replies(Mutex<Vec<Message>>);

    impl MessageHandler for Replies {
        fn handle_request(&self, _message: &mut Message) {}
        fn handle_response(&self, message: &Message) {
            self.0.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn refused_connection_becomes_write_error() {
        // Bind and immediately drop to find a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let replies = Replies::default();
        let client = Client::new("127.0.0.1", port, &replies);
        let reply = client.dispatch_message(Message::new(MessageType::EchoRequest, "ping"));

        assert_eq!(reply.message_type(), MessageType::CommunicationWriteError);
        let seen = replies.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message_type(), MessageType::CommunicationWriteError);
    }

    #[test]
    fn silent_peer_becomes_read_error() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let replies = Replies::default();
        let client = Client::new("127.0.0.1", port, &replies)
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(200));
        let reply = client.dispatch_message(Message::new(MessageType::EchoRequest, "ping"));
        assert_eq!(reply.message_type(), MessageType::CommunicationReadError);
        holder.join().unwrap();
    }
}
