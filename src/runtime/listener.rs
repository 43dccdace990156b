//! Listen endpoints and the transport streams they accept.
//!
//! TCP endpoints bind every local address on a port. Local endpoints bind
//! a filesystem path; any file already at the path is removed first.

use crate::error::{Error, Result};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, SockAddr, Socket, Type};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Pending connection queue length passed to `listen(2)`.
const BACKLOG: i32 = 100;

/// Size of `sockaddr_un.sun_path`, including the terminating NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

/// Where the server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP port on all local addresses.
    Tcp(u16),
    /// Local domain socket at a filesystem path.
    Local(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(port) => write!(f, "tcp port {port}"),
            Endpoint::Local(path) => write!(f, "local socket {}", path.display()),
        }
    }
}

/// A bound, non-blocking listening socket.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    Local(UnixListener),
}

impl Listener {
    pub(crate) fn bind(endpoint: &Endpoint) -> Result<Listener> {
        match endpoint {
            Endpoint::Tcp(port) => bind_tcp(*port),
            Endpoint::Local(path) => bind_local(path),
        }
    }

    pub(crate) fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Tcp(listener) => listener.accept().map(|(s, _)| Stream::Tcp(s)),
            Listener::Local(listener) => listener.accept().map(|(s, _)| Stream::Local(s)),
        }
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Local(_) => None,
        }
    }
}

impl Source for Listener {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.register(registry, token, interests),
            Listener::Local(l) => l.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.reregister(registry, token, interests),
            Listener::Local(l) => l.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.deregister(registry),
            Listener::Local(l) => l.deregister(registry),
        }
    }
}

/// An accepted connection.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(TcpStream),
    Local(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Local(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Local(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Local(s) => s.flush(),
        }
    }
}

impl Source for Stream {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.register(registry, token, interests),
            Stream::Local(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.reregister(registry, token, interests),
            Stream::Local(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.deregister(registry),
            Stream::Local(s) => s.deregister(registry),
        }
    }
}

fn bind_tcp(port: u16) -> Result<Listener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let bind_err = |source| Error::Bind {
        endpoint: Endpoint::Tcp(port).to_string(),
        source,
    };

    // The socket is closed on drop if any step fails.
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(BACKLOG).map_err(bind_err)?;

    let listener = TcpListener::from_std(socket.into());
    info!(addr = %addr, "Listening on TCP");
    Ok(Listener::Tcp(listener))
}

fn bind_local(path: &Path) -> Result<Listener> {
    let raw = path.as_os_str().as_bytes();
    if raw.len() >= SUN_PATH_LEN {
        return Err(Error::PathTooLong {
            path: path.to_path_buf(),
            len: raw.len(),
            limit: SUN_PATH_LEN - 1,
        });
    }
    if raw.contains(&0) {
        return Err(Error::NulInPath(path.to_path_buf()));
    }

    let bind_err = |source| Error::Bind {
        endpoint: Endpoint::Local(path.to_path_buf()).to_string(),
        source,
    };

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(bind_err)?;
    let addr = SockAddr::unix(path).map_err(bind_err)?;

    remove_socket_file(path);
    let bound = socket
        .bind(&addr)
        .and_then(|()| socket.listen(BACKLOG))
        .and_then(|()| socket.set_nonblocking(true));
    if let Err(e) = bound {
        remove_socket_file(path);
        return Err(bind_err(e));
    }

    let listener = UnixListener::from_std(socket.into());
    info!(path = %path.display(), "Listening on local socket");
    Ok(Listener::Local(listener))
}

/// Remove a socket file, ignoring a missing file.
pub(crate) fn remove_socket_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
        }
    }
}
