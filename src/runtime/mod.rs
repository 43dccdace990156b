//! Single-threaded networking runtime.
//!
//! - `Connection`: per-socket buffers and request state machine
//! - `Listener`/`Endpoint`: TCP and local domain socket binding
//! - `Server`: mio readiness loop multiplexing every connection

mod connection;
mod event_loop;
mod listener;

pub use connection::Connection;
pub use event_loop::Server;
pub use listener::Endpoint;
