//! Error types.
//!
//! Only setup failures and event-loop I/O failures are errors. Protocol
//! anomalies are answered on the wire and application failures end a
//! request with their status code; neither surfaces here.

use std::io;
use std::path::PathBuf;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Creating, binding or listening on a socket failed.
    #[error("failed to listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Local socket path does not fit in `sun_path`.
    #[error("local socket path too long ({len} bytes, limit {limit}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        limit: usize,
    },
    /// Local socket path contains a NUL byte.
    #[error("null character in local socket path: {0}")]
    NulInPath(PathBuf),
    /// I/O failure while running the event loop.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Error {
        Error::Io { op, source }
    }

    /// True for failures raised while setting up a listen endpoint.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::Bind { .. } | Error::PathTooLong { .. } | Error::NulInPath(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::NulInPath(PathBuf::from("a"));
        assert!(err.is_setup());
        assert_eq!(err.to_string(), "null character in local socket path: a");

        let err = Error::io("write", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(!err.is_setup());
        assert_eq!(err.to_string(), "write failed: boom");
    }
}
