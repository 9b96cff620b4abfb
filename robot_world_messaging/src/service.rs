// Registry and lifecycle owner for every server in a process.
//
// `CommunicationService` is an explicitly constructed context object, shared
// as `Arc<CommunicationService>` by whoever starts servers. It has two
// states, running and stopped:
//
// - `register_server` / `start_server` only succeed while running;
// - `stop` stops and joins every server and moves to stopped;
// - `restart` moves back to running so servers can be registered again.
//
// `stop_server(port, graceful)` removes one server from the registry.
// Graceful stops only ask the server to stop accepting and park its handle in
// a draining list, so the call is safe from inside that server's own
// `handle_request`. Non-graceful stops also wait for the accept thread (unless
// the caller *is* that thread, in which case it degrades to graceful).
//
// All registry state sits behind one mutex. Joins happen after the guard is
// released, because a server thread being joined may itself be waiting to
// call `stop_server`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::MessagingError;
use crate::handler::MessageHandler;
use crate::server::Server;

#[derive(Default)]
struct Registry {
    stopped: bool,
    servers: BTreeMap<u16, Server>,
    draining: Vec<Server>,
}

impl Registry {
    /// Drop handles of draining servers whose accept thread already exited.
    fn reap_draining(&mut self) {
        self.draining.retain(|s| !s.is_finished());
    }
}

#[derive(Default)]
pub struct CommunicationService {
    registry: Mutex<Registry>,
}

impl CommunicationService {
    /// A running service with no servers.
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_stopped(&self) -> bool {
        self.registry().stopped
    }

    /// Stopped → running. A no-op while running.
    pub fn restart(&self) {
        let mut registry = self.registry();
        if registry.stopped {
            info!("restarting communication service");
            registry.stopped = false;
        }
    }

    /// Track a bound server for later shutdown. Returns its port.
    pub fn register_server(&self, server: Server) -> Result<u16, MessagingError> {
        let port = server.port();
        let mut registry = self.registry();
        if registry.stopped {
            return Err(MessagingError::ServiceStopped);
        }
        if registry.servers.contains_key(&port) {
            return Err(MessagingError::PortInUse(port));
        }
        registry.reap_draining();
        registry.servers.insert(port, server);
        debug!(port, "server registered");
        Ok(port)
    }

    /// Bind a server on `port` (0 = any) for `handler` and register it.
    /// Returns the bound port.
    pub fn start_server(
        &self,
        port: u16,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<u16, MessagingError> {
        if self.is_stopped() {
            return Err(MessagingError::ServiceStopped);
        }
        let server = Server::start(port, handler)?;
        self.register_server(server)
    }

    /// True if a server is registered on `port` and still accepting.
    pub fn is_serving(&self, port: u16) -> bool {
        self.registry()
            .servers
            .get(&port)
            .is_some_and(Server::is_accepting)
    }

    /// True if the caller is running on the accept thread of the server
    /// registered on `port`, i.e. inside one of its sessions.
    pub fn is_server_thread(&self, port: u16) -> bool {
        self.registry()
            .servers
            .get(&port)
            .is_some_and(Server::is_current_thread)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.registry().servers.keys().copied().collect()
    }

    /// Stop the server on `port`. Returns false if none is registered.
    pub fn stop_server(&self, port: u16, graceful: bool) -> bool {
        let server = {
            let mut registry = self.registry();
            let Some(server) = registry.servers.remove(&port) else {
                debug!(port, "no server to stop");
                return false;
            };
            server.stop_accepting();
            if graceful || server.is_current_thread() {
                registry.reap_draining();
                registry.draining.push(server);
                info!(port, "server draining");
                return true;
            }
            server
        };
        server.stop();
        info!(port, "server stopped");
        true
    }

    /// Stop every server (registered and draining), wait for their threads,
    /// and enter the stopped state.
    pub fn stop(&self) {
        let servers: Vec<Server> = {
            let mut registry = self.registry();
            registry.stopped = true;
            let mut servers: Vec<Server> =
                std::mem::take(&mut registry.servers).into_values().collect();
            servers.append(&mut registry.draining);
            servers
        };
        for server in &servers {
            server.stop_accepting();
        }
        let count = servers.len();
        for server in servers {
            // `stop` skips the join when called from the server's own thread.
            server.stop();
        }
        info!(count, "communication service stopped");
    }
}

impl Drop for CommunicationService {
    fn drop(&mut self) {
        self.stop();
    }
}
