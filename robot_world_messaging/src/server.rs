// TCP server: one request/response exchange per accepted connection.
//
// Architecture: a single accept thread per server. The listener is
// non-blocking so the thread can poll its `keep_running` flag between
// accepts. Each accepted connection (a "session") is served to completion on
// the accept thread before the next accept:
//
//   read one framed `Message` → `handler.handle_request(&mut message)` →
//   write the mutated message back → close.
//
// Sessions are strictly sequential, so the handler never sees two requests
// at once from the same server.
//
// Stopping is two-phase. `stop_accepting` only clears the flag; the accept
// thread notices it after the current session (if any) has written its reply
// and closed, then drops the listener. A handler may therefore ask for its own
// server to stop (via `CommunicationService::stop_server`) while serving a
// request, and the requester still receives that request's reply. Once
// `is_accepting` returns false the listener is closed and new connections
// are refused.
//
// Faults never escape the accept thread:
// - accept and read failures are logged and handed to `handle_request` as
//   `CommunicationReadError` messages (nothing is written back);
// - write failures are handed over as `CommunicationWriteError`;
// - a panic inside `handle_request` turns the reply into a
//   `ServerSideExceptionResponse` carrying the panic text.

use std::any::Any;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use robot_world_protocol::framing::{receive_message, send_message};
use robot_world_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use crate::error::MessagingError;
use crate::handler::MessageHandler;

/// How long the accept thread sleeps when no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read/write timeout for a single session, so a silent peer cannot wedge
/// the accept thread.
const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound, accepting server. Dropping it stops accepting and waits for the
/// accept thread unless the drop happens on that thread itself.
pub struct Server {
    addr: SocketAddr,
    keep_running: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind `0.0.0.0:port` (port 0 lets the OS pick) and start the accept
    /// thread.
    pub fn start(port: u16, handler: Arc<dyn MessageHandler>) -> Result<Self, MessagingError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let listening = Arc::new(AtomicBool::new(true));
        let keep_running_thread = keep_running.clone();
        let listening_thread = listening.clone();

        let thread = thread::Builder::new()
            .name(format!("server-{}", addr.port()))
            .spawn(move || {
                accept_loop(listener, handler, keep_running_thread, listening_thread);
            })?;

        info!(port = addr.port(), "server accepting connections");
        Ok(Self {
            addr,
            keep_running,
            listening,
            thread: Some(thread),
        })
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// False once the accept thread has closed its listener.
    pub fn is_accepting(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Phase one of the stop: refuse new sessions after the current one.
    /// Returns immediately.
    pub fn stop_accepting(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    /// True if the caller is running on this server's accept thread.
    pub fn is_current_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|t| t.thread().id() == thread::current().id())
    }

    /// True once the accept thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Phase two: stop accepting and wait for the accept thread to exit.
    /// Refuses to self-join when called from the accept thread.
    pub fn stop(mut self) {
        self.stop_accepting();
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if self.is_current_thread() {
            return;
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!(port = self.port(), "server thread panicked");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop_accepting();
        self.join_thread();
    }
}

fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
    keep_running: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();

    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => serve_session(stream, peer, handler.as_ref()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!(port, error = %e, "accept failed");
                let mut fault = Message::new(MessageType::CommunicationReadError, e.to_string());
                dispatch_request(handler.as_ref(), &mut fault);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    drop(listener);
    listening.store(false, Ordering::SeqCst);
    info!(port, "server stopped accepting");
}

/// Serve exactly one request/response exchange on `stream`.
fn serve_session(stream: TcpStream, peer: SocketAddr, handler: &dyn MessageHandler) {
    // Accepted sockets can inherit the listener's non-blocking mode.
    let prepared = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(SESSION_TIMEOUT)))
        .and_then(|()| stream.set_write_timeout(Some(SESSION_TIMEOUT)))
        .and_then(|()| stream.try_clone());
    let read_half = match prepared {
        Ok(s) => s,
        Err(e) => {
            report_fault(handler, MessageType::CommunicationReadError, &peer, &e);
            return;
        }
    };

    let mut reader = BufReader::new(read_half);
    let mut message = match receive_message(&mut reader) {
        Ok(m) => m,
        Err(e) => {
            report_fault(handler, MessageType::CommunicationReadError, &peer, &e);
            return;
        }
    };

    debug!(%peer, request = %message.message_type(), "serving request");
    dispatch_request(handler, &mut message);

    let mut writer = BufWriter::new(stream);
    if let Err(e) = send_message(&mut writer, &message) {
        report_fault(handler, MessageType::CommunicationWriteError, &peer, &e);
    }
}

/// Run the handler, converting a panic into a server-side exception reply.
fn dispatch_request(handler: &dyn MessageHandler, message: &mut Message) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle_request(message)));
    if let Err(payload) = result {
        let text = panic_text(payload.as_ref());
        warn!(fault = %text, "handler panicked while serving a request");
        message.set_message_type(MessageType::ServerSideExceptionResponse);
        message.set_body(text);
    }
}

fn report_fault(
    handler: &dyn MessageHandler,
    kind: MessageType,
    peer: &SocketAddr,
    error: &dyn std::fmt::Display,
) {
    warn!(%peer, %kind, error = %error, "session failed");
    let mut fault = Message::new(kind, error.to_string());
    dispatch_request(handler, &mut fault);
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every request it sees and answers echoes.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<MessageType>>,
    }

    impl MessageHandler for Recorder {
        fn handle_request(&self, message: &mut Message) {
            self.seen.lock().unwrap().push(message.message_type());
            match message.message_type() {
                MessageType::EchoRequest => {
                    let body = format!("echo: {}", message.as_string());
                    message.set_message_type(MessageType::EchoResponse);
                    message.set_body(body);
                }
                MessageType::GenericRequest => panic!("boom"),
                _ => {}
            }
        }

        fn handle_response(&self, _message: &Message) {}
    }

    fn raw_round_trip(addr: SocketAddr, request: &Message) -> Message {
        let stream = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut writer = BufWriter::new(stream.try_clone().unwrap());
        send_message(&mut writer, request).unwrap();
        let mut reader = BufReader::new(stream);
        receive_message(&mut reader).unwrap()
    }

    #[test]
    fn serves_one_exchange_per_connection() {
        let recorder = Arc::new(Recorder::default());
        let server = Server::start(0, recorder.clone()).unwrap();

        let reply = raw_round_trip(
            server.local_addr(),
            &Message::new(MessageType::EchoRequest, "ping"),
        );
        assert_eq!(reply.message_type(), MessageType::EchoResponse);
        assert!(reply.body().contains("ping"));

        let reply = raw_round_trip(
            server.local_addr(),
            &Message::new(MessageType::EchoRequest, "again"),
        );
        assert!(reply.body().contains("again"));
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
        server.stop();
    }

    #[test]
    fn handler_panic_becomes_server_side_exception() {
        let server = Server::start(0, Arc::new(Recorder::default())).unwrap();
        let reply = raw_round_trip(
            server.local_addr(),
            &Message::new(MessageType::GenericRequest, "x"),
        );
        assert_eq!(reply.message_type(), MessageType::ServerSideExceptionResponse);
        assert!(reply.body().contains("boom"));

        // The server keeps accepting after the fault.
        let reply = raw_round_trip(
            server.local_addr(),
            &Message::new(MessageType::EchoRequest, "still here"),
        );
        assert_eq!(reply.message_type(), MessageType::EchoResponse);
        server.stop();
    }

    #[test]
    fn garbage_is_reported_as_read_error() {
        let recorder = Arc::new(Recorder::default());
        let server = Server::start(0, recorder.clone()).unwrap();

        {
            use std::io::Write;
            let mut stream = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
            stream.write_all(&[0, 0, 0, 3, b'x', b'y', b'z']).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !recorder
            .seen
            .lock()
            .unwrap()
            .contains(&MessageType::CommunicationReadError)
        {
            assert!(std::time::Instant::now() < deadline, "read error never reported");
            thread::sleep(Duration::from_millis(10));
        }
        server.stop();
    }

    #[test]
    fn stopped_server_refuses_connections() {
        let server = Server::start(0, Arc::new(Recorder::default())).unwrap();
        let port = server.port();
        server.stop();
        assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    }
}
