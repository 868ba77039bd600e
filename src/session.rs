//! Stream session handler.
//!
//! A session owns one connection and echoes every message it receives:
//!
//! ```text
//! Client:  hello
//! Server:  hello
//! ```
//!
//! There is no framing beyond the transport's own read boundary. Each read
//! returns at most `max_message_size` bytes, and exactly those bytes are
//! written back before the next read. A zero-byte read is an orderly
//! disconnect, not a failure.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::EchoError;
use crate::peer::PeerAddr;

/// Counters for one finished session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: u64,
    pub bytes: u64,
}

/// Echo messages on `stream` until the peer disconnects or I/O fails.
///
/// The stream is dropped (and its descriptor closed) on every return path.
pub async fn run_session<S>(
    mut stream: S,
    peer: &PeerAddr,
    max_message_size: usize,
) -> Result<SessionStats, EchoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(max_message_size);
    let mut stats = SessionStats::default();

    loop {
        let n = stream
            .read(&mut buffer[..])
            .await
            .map_err(EchoError::Receive)?;
        if n == 0 {
            debug!(peer = %peer, "Client disconnected");
            return Ok(stats);
        }

        let message = &buffer[..n];
        trace!(
            peer = %peer,
            bytes = n,
            message = %String::from_utf8_lossy(message),
            "Received message"
        );

        stream.write_all(message).await.map_err(EchoError::Send)?;

        stats.messages += 1;
        stats.bytes += n as u64;
        trace!(peer = %peer, bytes = n, "Replied");
    }
}
