// The capability a participant implements to take part in messaging.
//
// A `Server` calls `handle_request` for every message it reads and writes the
// mutated message back as the reply. A `Client` calls `handle_response` with
// the reply (or with an error-typed message when the round trip failed).
//
// Both entry points run on messaging threads: `handle_request` on a server's
// accept thread, `handle_response` on whichever thread called
// `Client::dispatch_message`. Implementations therefore need `Send + Sync`
// and must do their own locking.

use robot_world_protocol::Message;

pub trait MessageHandler: Send + Sync {
    /// Turn `message` into the reply, in place. A handler that recognizes the
    /// request sets the matching response type and body before returning;
    /// unknown requests are left as they are.
    fn handle_request(&self, message: &mut Message);

    /// React to a reply. Must not block on further network I/O.
    fn handle_response(&self, message: &Message);
}
