//! Stream listeners for the echo service.
//!
//! Binds TCP or Unix-domain endpoints, accepts connections and hands each
//! one to a session handler, either inline or in its own task.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::SessionMode;
use crate::error::EchoError;
use crate::peer::PeerAddr;
use crate::session::run_session;

/// Per-session settings shared by every accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_message_size: usize,
    /// Upper bound on simultaneously running sessions (concurrent mode only).
    pub max_connections: usize,
}

/// A bound stream endpoint that yields connected peers.
pub trait Acceptor {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, PeerAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, PeerAddr)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, PeerAddr::from(addr)))
    }
}

/// Removes a Unix socket file when dropped.
#[derive(Debug)]
pub struct SocketPathGuard {
    path: PathBuf,
}

impl SocketPathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketPathGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove socket file"),
        }
    }
}

/// Unix listener that owns its socket file.
#[derive(Debug)]
pub struct UnixEndpoint {
    listener: UnixListener,
    guard: SocketPathGuard,
}

impl UnixEndpoint {
    pub fn path(&self) -> &Path {
        self.guard.path()
    }
}

impl Acceptor for UnixEndpoint {
    type Stream = UnixStream;

    async fn accept(&self) -> io::Result<(UnixStream, PeerAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((stream, PeerAddr::from(addr)))
    }
}

/// Bind a TCP listener with SO_REUSEADDR and the given backlog.
pub fn bind_tcp(addr: SocketAddr, backlog: i32) -> Result<TcpListener, EchoError> {
    let endpoint = addr.to_string();
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(|e| EchoError::Bind(endpoint.clone(), e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| EchoError::Bind(endpoint.clone(), e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| EchoError::bind(endpoint.clone(), e))?;
    socket
        .listen(backlog)
        .map_err(|e| EchoError::Listen(endpoint.clone(), e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| EchoError::Listen(endpoint.clone(), e))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(|e| EchoError::Listen(endpoint, e))
}

/// Bind a Unix-domain stream listener at `path`.
///
/// An existing file at `path` is reported as `AddressInUse` and left alone.
pub fn bind_unix(path: &Path, backlog: i32) -> Result<UnixEndpoint, EchoError> {
    let endpoint = path.display().to_string();
    let addr = SockAddr::unix(path).map_err(|e| EchoError::Bind(endpoint.clone(), e))?;
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
        .map_err(|e| EchoError::Bind(endpoint.clone(), e))?;

    socket
        .bind(&addr)
        .map_err(|e| EchoError::bind(endpoint.clone(), e))?;

    // From here on the file is ours.
    let guard = SocketPathGuard {
        path: path.to_path_buf(),
    };

    socket
        .listen(backlog)
        .map_err(|e| EchoError::Listen(endpoint.clone(), e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| EchoError::Listen(endpoint.clone(), e))?;

    let std_listener: std::os::unix::net::UnixListener = socket.into();
    let listener =
        UnixListener::from_std(std_listener).map_err(|e| EchoError::Listen(endpoint, e))?;

    Ok(UnixEndpoint { listener, guard })
}

/// Accept connections forever, running one echo session per connection.
///
/// Accept failures are logged and skipped; session failures are logged and
/// end only that session.
pub async fn serve<L>(listener: L, mode: SessionMode, settings: SessionSettings)
where
    L: Acceptor + Send + Sync,
{
    let connection_limit = Arc::new(Semaphore::new(settings.max_connections));

    loop {
        // Wait for a connection slot
        let permit = match mode {
            SessionMode::Concurrent => match connection_limit.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            SessionMode::Sequential => None,
        };

        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %EchoError::Accept(e), "Accept failed");
                continue;
            }
        };
        debug!(peer = %peer, "New connection");

        match permit {
            Some(permit) => {
                tokio::spawn(async move {
                    handle_session(stream, peer, settings.max_message_size).await;
                    drop(permit);
                });
            }
            None => handle_session(stream, peer, settings.max_message_size).await,
        }
    }
}

async fn handle_session<S>(stream: S, peer: PeerAddr, max_message_size: usize)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match run_session(stream, &peer, max_message_size).await {
        Ok(stats) => debug!(
            peer = %peer,
            messages = stats.messages,
            bytes = stats.bytes,
            "Session ended"
        ),
        Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
    }
}

/// Log where a TCP listener ended up (useful when binding port 0).
pub fn log_listening(listener: &TcpListener) {
    match listener.local_addr() {
        Ok(addr) => info!(address = %addr, "Server listening"),
        Err(e) => warn!(error = %e, "Server listening on unknown address"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    fn settings() -> SessionSettings {
        SessionSettings {
            max_message_size: 1024,
            max_connections: 16,
        }
    }

    fn unique_socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "socket-echo-{}-{}.sock",
            name,
            std::process::id()
        ))
    }

    async fn round_trip<S>(stream: &mut S, message: &[u8]) -> Vec<u8>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(message).await.unwrap();
        let mut reply = vec![0u8; message.len()];
        stream.read_exact(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_tcp_echo() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap(), 3).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, SessionMode::Concurrent, settings()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(round_trip(&mut client, b"hello").await, b"hello");
        assert_eq!(round_trip(&mut client, b"world").await, b"world");
    }

    #[tokio::test]
    async fn test_concurrent_clients_are_isolated() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap(), 3).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, SessionMode::Concurrent, settings()));

        let mut alice = TcpStream::connect(addr).await.unwrap();
        let mut bob = TcpStream::connect(addr).await.unwrap();

        alice.write_all(b"alpha").await.unwrap();
        bob.write_all(b"bravo").await.unwrap();

        let mut reply = [0u8; 5];
        bob.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"bravo");
        alice.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"alpha");

        assert_eq!(round_trip(&mut bob, b"second").await, b"second");
        assert_eq!(round_trip(&mut alice, b"again").await, b"again");
    }

    #[tokio::test]
    async fn test_sequential_mode_serves_one_session_at_a_time() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap(), 3).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, SessionMode::Sequential, settings()));

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(round_trip(&mut first, b"one").await, b"one");

        // Queued in the backlog, not yet accepted.
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"two").await.unwrap();
        let mut reply = [0u8; 3];
        let pending = timeout(Duration::from_millis(200), second.read_exact(&mut reply)).await;
        assert!(pending.is_err());

        drop(first);

        timeout(Duration::from_secs(5), second.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"two");
    }

    #[tokio::test]
    async fn test_session_survives_other_client_disconnect() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap(), 3).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, SessionMode::Concurrent, settings()));

        let mut stayer = TcpStream::connect(addr).await.unwrap();
        let leaver = TcpStream::connect(addr).await.unwrap();
        drop(leaver);

        assert_eq!(round_trip(&mut stayer, b"still here").await, b"still here");

        let mut late = TcpStream::connect(addr).await.unwrap();
        assert_eq!(round_trip(&mut late, b"late").await, b"late");
    }

    #[tokio::test]
    async fn test_tcp_address_in_use() {
        let first = bind_tcp("127.0.0.1:0".parse().unwrap(), 3).unwrap();
        let addr = first.local_addr().unwrap();

        let err = bind_tcp(addr, 3).unwrap_err();
        assert!(matches!(err, EchoError::AddressInUse(ref a) if *a == addr.to_string()));
    }

    #[tokio::test]
    async fn test_unix_echo_and_cleanup() {
        let path = unique_socket_path("echo");
        let _ = std::fs::remove_file(&path);

        let endpoint = bind_unix(&path, 3).unwrap();
        assert!(path.exists());
        assert_eq!(endpoint.path(), path.as_path());

        let server = tokio::spawn(serve(endpoint, SessionMode::Sequential, settings()));

        let mut client = UnixStream::connect(&path).await.unwrap();
        assert_eq!(round_trip(&mut client, b"over unix").await, b"over unix");
        drop(client);

        // Dropping the serve future drops the endpoint and its guard.
        server.abort();
        let _ = server.await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unix_address_in_use_keeps_existing_file() {
        let path = unique_socket_path("in-use");
        let _ = std::fs::remove_file(&path);

        let endpoint = bind_unix(&path, 3).unwrap();
        let err = bind_unix(&path, 3).unwrap_err();
        assert!(matches!(err, EchoError::AddressInUse(_)));
        assert!(path.exists());

        drop(endpoint);
        assert!(!path.exists());
    }
}
