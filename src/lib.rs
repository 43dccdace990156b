//! fcgi-mux: a multiplexing FastCGI responder library.
//!
//! Accepts FastCGI connections over TCP or local domain sockets, decodes
//! interleaved requests, and drives three application callbacks:
//! - `on_params_ready`: all parameters received
//! - `on_data`: new request body bytes available
//! - `on_complete`: request body fully received
//!
//! Output appended to a request's `out`/`err` buffers is framed into
//! stdout/stderr records and written back on the same connection.
//!
//! ```no_run
//! use fcgi_mux::{FnHandler, Server};
//!
//! let handler = FnHandler::new().complete(|req| {
//!     req.out.extend_from_slice(b"Content-Type: text/plain\r\n\r\nhello");
//!     0
//! });
//! let mut server = Server::new(handler)?;
//! server.listen_tcp(7000)?;
//! server.process_forever()?;
//! # Ok::<(), fcgi_mux::Error>(())
//! ```

pub mod error;
pub mod protocol;
pub mod request;
pub mod runtime;

pub use error::{Error, Result};
pub use request::{FnHandler, Handler, Params, Request};
pub use runtime::{Connection, Endpoint, Server};
