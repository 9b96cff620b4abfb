// robot_world_messaging — request/response messaging between peer simulations.
//
// Two simulation instances talk over short-lived TCP connections: one
// connection carries exactly one request and its reply. This crate provides
// both ends and the registry that owns server lifetimes. It knows nothing
// about robots or worlds; participants plug in through `MessageHandler`.
//
// Module overview:
// - `handler.rs`:  `MessageHandler`, the two-entry-point capability
//                  (`handle_request` mutates a message into its reply,
//                  `handle_response` reacts to a reply).
// - `server.rs`:   `Server`: accept thread, one session at a time, two-phase
//                  stop, faults reported as error-typed messages.
// - `client.rs`:   `Client`: blocking one-shot round trip, faults reported as
//                  error-typed messages.
// - `service.rs`:  `CommunicationService`: running/stopped state and the
//                  port → server registry.
// - `error.rs`:    `MessagingError` for bind/registration failures.
//
// Uses `std::net` with plain threads, no async runtime.

pub mod client;
pub mod error;
pub mod handler;
pub mod server;
pub mod service;

pub use client::Client;
pub use error::MessagingError;
pub use handler::MessageHandler;
pub use server::Server;
pub use service::CommunicationService;
