//! Peer address rendering for log fields.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Address of the remote end of a connection or datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Inet(SocketAddr),
    /// Unix-domain peer; client sockets are usually unnamed.
    Unix(Option<PathBuf>),
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr::Inet(addr)
    }
}

impl From<tokio::net::unix::SocketAddr> for PeerAddr {
    fn from(addr: tokio::net::unix::SocketAddr) -> Self {
        PeerAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf()))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{addr}"),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            PeerAddr::Unix(None) => write!(f, "unix:unnamed"),
        }
    }
}
