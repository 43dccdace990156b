//! mio event loop.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Readiness is edge-triggered, so accepts and reads are repeated until
//! they would block. Output produced while reading is written straight
//! away; writable interest is only registered while output remains.

use crate::error::{Error, Result};
use crate::request::Handler;
use crate::runtime::connection::Connection;
use crate::runtime::listener::{remove_socket_file, Endpoint, Listener, Stream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// Listener tokens count down from here; connection tokens are slab keys.
const LISTENER_TOKEN_BASE: usize = usize::MAX;

/// Events collected per poll.
const EVENTS_CAPACITY: usize = 1024;

/// Bytes read from a socket per `read` call.
const READ_CHUNK: usize = 16 * 1024;

/// A live socket and its protocol state.
struct MioConnection {
    stream: Stream,
    conn: Connection,
    interest: Interest,
}

/// How an I/O step left the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoOutcome {
    Open,
    /// Peer reset the connection; release it immediately.
    Reset,
}

/// A FastCGI responder server multiplexing every connection on one thread.
pub struct Server<H: Handler> {
    handler: H,
    poll: Poll,
    events: Events,
    listeners: Vec<Listener>,
    /// Local socket paths removed when the server is dropped.
    unlink: Vec<PathBuf>,
    connections: Slab<MioConnection>,
    read_buf: Box<[u8]>,
}

impl<H: Handler> Server<H> {
    /// Create a server with no endpoints.
    pub fn new(handler: H) -> Result<Self> {
        let poll = Poll::new().map_err(|e| Error::io("poll setup", e))?;
        Ok(Self {
            handler,
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listeners: Vec::new(),
            unlink: Vec::new(),
            connections: Slab::new(),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        })
    }

    /// Bind an endpoint and start accepting connections on it.
    pub fn listen(&mut self, endpoint: &Endpoint) -> Result<()> {
        let mut listener = Listener::bind(endpoint)?;
        let token = Token(LISTENER_TOKEN_BASE - self.listeners.len());
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
        {
            if let Endpoint::Local(path) = endpoint {
                remove_socket_file(path);
            }
            return Err(Error::Bind {
                endpoint: endpoint.to_string(),
                source: e,
            });
        }

        if let Endpoint::Local(path) = endpoint {
            self.unlink.push(path.clone());
        }
        self.listeners.push(listener);
        Ok(())
    }

    /// Listen on a TCP port on all local addresses.
    pub fn listen_tcp(&mut self, port: u16) -> Result<()> {
        self.listen(&Endpoint::Tcp(port))
    }

    /// Listen on a local domain socket at `path`.
    pub fn listen_local<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.listen(&Endpoint::Local(path.as_ref().to_path_buf()))
    }

    /// Leave local socket files in place when the server is dropped.
    pub fn abandon_files(&mut self) {
        self.unlink.clear();
    }

    /// Addresses of the bound TCP listeners.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().filter_map(Listener::local_addr).collect()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Run one readiness cycle.
    ///
    /// Waits up to `timeout` for activity (`None` blocks, `Some(ZERO)`
    /// returns immediately), then accepts new connections and moves bytes
    /// for every ready connection.
    pub fn process(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(Error::io("poll", e)),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            match self.listener_index(token) {
                Some(idx) => self.accept_connections(idx)?,
                None => self.handle_connection_event(token.0, readable, writable)?,
            }
        }

        Ok(())
    }

    /// Run readiness cycles until an I/O error occurs.
    pub fn process_forever(&mut self) -> Result<()> {
        loop {
            self.process(None)?;
        }
    }

    fn listener_index(&self, token: Token) -> Option<usize> {
        let idx = LISTENER_TOKEN_BASE - token.0;
        (idx < self.listeners.len()).then_some(idx)
    }

    fn accept_connections(&mut self, idx: usize) -> Result<()> {
        loop {
            let mut stream = match self.listeners[idx].accept() {
                Ok(stream) => stream,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    return Err(Error::io("accept", e));
                }
            };

            let entry = self.connections.vacant_entry();
            let conn_id = entry.key();
            self.poll
                .registry()
                .register(&mut stream, Token(conn_id), Interest::READABLE)
                .map_err(|e| Error::io("register", e))?;
            entry.insert(MioConnection {
                stream,
                conn: Connection::new(),
                interest: Interest::READABLE,
            });

            debug!(conn_id, listener = idx, "Accepted connection");
        }
        Ok(())
    }

    fn handle_connection_event(
        &mut self,
        conn_id: usize,
        readable: bool,
        writable: bool,
    ) -> Result<()> {
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if readable && self.handle_readable(conn_id)? == IoOutcome::Reset {
            self.close_connection(conn_id);
            return Ok(());
        }

        // Output may come from this read or be left over from an earlier
        // partial write; either way try to drain it now.
        let has_output = {
            let entry = &mut self.connections[conn_id];
            entry.conn.flush_requests();
            entry.conn.has_output()
        };
        if (writable || has_output) && self.handle_writable(conn_id)? == IoOutcome::Reset {
            self.close_connection(conn_id);
            return Ok(());
        }

        if self.connections[conn_id].conn.is_closable() {
            self.close_connection(conn_id);
            return Ok(());
        }

        self.update_interest(conn_id)
    }

    fn handle_readable(&mut self, conn_id: usize) -> Result<IoOutcome> {
        let entry = &mut self.connections[conn_id];

        loop {
            match entry.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    debug!(conn_id, "Peer closed connection");
                    entry.conn.mark_close();
                    return Ok(IoOutcome::Open);
                }
                Ok(n) => entry.conn.receive(&self.read_buf[..n], &mut self.handler),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoOutcome::Open),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!(conn_id, "Connection reset by peer");
                    return Ok(IoOutcome::Reset);
                }
                Err(e) => return Err(Error::io("read", e)),
            }
        }
    }

    fn handle_writable(&mut self, conn_id: usize) -> Result<IoOutcome> {
        let entry = &mut self.connections[conn_id];
        entry.conn.flush_requests();

        while entry.conn.has_output() {
            match entry.stream.write(entry.conn.pending_output()) {
                Ok(0) => {
                    return Err(Error::io(
                        "write",
                        io::Error::new(io::ErrorKind::WriteZero, "write returned 0"),
                    ));
                }
                Ok(n) => entry.conn.advance_output(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                    ) =>
                {
                    debug!(conn_id, error = %e, "Peer went away during write");
                    return Ok(IoOutcome::Reset);
                }
                Err(e) => return Err(Error::io("write", e)),
            }
        }

        Ok(IoOutcome::Open)
    }

    /// Register writable interest only while output is pending.
    fn update_interest(&mut self, conn_id: usize) -> Result<()> {
        let entry = &mut self.connections[conn_id];
        let wanted = if entry.conn.has_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        if wanted != entry.interest {
            self.poll
                .registry()
                .reregister(&mut entry.stream, Token(conn_id), wanted)
                .map_err(|e| Error::io("reregister", e))?;
            entry.interest = wanted;
        }
        Ok(())
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut entry) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut entry.stream);
            debug!(
                conn_id,
                abandoned_requests = entry.conn.request_count(),
                "Connection closed"
            );
        }
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        for path in self.unlink.drain(..) {
            remove_socket_file(&path);
            info!(path = %path.display(), "Removed local socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FnHandler;

    #[test]
    fn test_process_times_out_with_nothing_ready() {
        let mut server = Server::new(FnHandler::new()).unwrap();
        server.listen_tcp(0).unwrap();
        server.process(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_listener_tokens() {
        let mut server = Server::new(FnHandler::new()).unwrap();
        server.listen_tcp(0).unwrap();
        server.listen_tcp(0).unwrap();

        assert_eq!(server.listener_index(Token(usize::MAX)), Some(0));
        assert_eq!(server.listener_index(Token(usize::MAX - 1)), Some(1));
        assert_eq!(server.listener_index(Token(0)), None);
        assert_eq!(server.local_addrs().len(), 2);
    }

    #[test]
    fn test_drop_unlinks_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.sock");

        let mut server = Server::new(FnHandler::new()).unwrap();
        server.listen_local(&path).unwrap();
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());
    }

    #[test]
    fn test_abandon_files_keeps_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.sock");

        let mut server = Server::new(FnHandler::new()).unwrap();
        server.listen_local(&path).unwrap();
        server.abandon_files();
        drop(server);
        assert!(path.exists());
    }
}
