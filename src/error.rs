//! Error types for the echo service.
//!
//! Listener-level failures (bind, listen) end the process. Session-level
//! failures (receive, send) end only the session they happened in.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors raised by listeners, sessions and clients.
#[derive(Debug)]
pub enum EchoError {
    /// The endpoint is already bound by another socket (or socket file).
    AddressInUse(String),
    /// Any other failure to create or bind the endpoint.
    Bind(String, io::Error),
    /// The endpoint was bound but could not be put into listening state.
    Listen(String, io::Error),
    /// Accepting an incoming connection failed.
    Accept(io::Error),
    /// Reading from a peer failed.
    Receive(io::Error),
    /// Writing to a peer failed.
    Send(io::Error),
    /// A client could not reach the server.
    Connect(String, io::Error),
    /// A client was pointed at a Unix socket file that does not exist.
    SocketFileMissing(PathBuf),
    /// Reading client input or writing client output failed.
    Console(io::Error),
}

impl EchoError {
    /// Classify a bind failure, splitting out `EADDRINUSE`.
    pub fn bind(endpoint: impl Into<String>, error: io::Error) -> Self {
        let endpoint = endpoint.into();
        if error.kind() == io::ErrorKind::AddrInUse {
            EchoError::AddressInUse(endpoint)
        } else {
            EchoError::Bind(endpoint, error)
        }
    }
}

impl fmt::Display for EchoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoError::AddressInUse(endpoint) => {
                write!(f, "Failed to bind {}: address already in use", endpoint)
            }
            EchoError::Bind(endpoint, e) => write!(f, "Failed to bind {}: {}", endpoint, e),
            EchoError::Listen(endpoint, e) => {
                write!(f, "Failed to listen on {}: {}", endpoint, e)
            }
            EchoError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
            EchoError::Receive(e) => write!(f, "Failed to receive message: {}", e),
            EchoError::Send(e) => write!(f, "Failed to send message: {}", e),
            EchoError::Connect(endpoint, e) => {
                write!(f, "Failed to connect to {}: {}", endpoint, e)
            }
            EchoError::SocketFileMissing(path) => {
                write!(f, "Server socket file '{}' not found", path.display())
            }
            EchoError::Console(e) => write!(f, "Console I/O failed: {}", e),
        }
    }
}

impl std::error::Error for EchoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EchoError::Bind(_, e)
            | EchoError::Listen(_, e)
            | EchoError::Accept(e)
            | EchoError::Receive(e)
            | EchoError::Send(e)
            | EchoError::Connect(_, e)
            | EchoError::Console(e) => Some(e),
            EchoError::AddressInUse(_) | EchoError::SocketFileMissing(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_splits_address_in_use() {
        let err = EchoError::bind(
            "127.0.0.1:8080",
            io::Error::from(io::ErrorKind::AddrInUse),
        );
        assert!(matches!(err, EchoError::AddressInUse(ref a) if a == "127.0.0.1:8080"));
        assert_eq!(
            err.to_string(),
            "Failed to bind 127.0.0.1:8080: address already in use"
        );

        let err = EchoError::bind(
            "127.0.0.1:80",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, EchoError::Bind(..)));
    }
}
