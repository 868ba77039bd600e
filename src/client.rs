//! Interactive echo clients.
//!
//! Each client reads lines from its input, sends every non-empty line to the
//! server with the line ending stripped, and prints the reply:
//!
//! ```text
//! client> hello
//! server> hello
//! ```
//!
//! Empty lines are skipped without a round trip. Lines longer than the
//! maximum message size go out as consecutive messages, one reply each. The
//! client stops at end of input, or when a stream server closes the
//! connection.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, UnixStream};
use tracing::{debug, info, warn};

use crate::error::EchoError;

const PROMPT: &[u8] = b"client> ";
const REPLY_PREFIX: &[u8] = b"server> ";

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub max_message_size: usize,
    /// Print a prompt before each line (when input is a terminal).
    pub interactive: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    /// Messages that completed a round trip.
    pub messages: u64,
    /// Empty lines that were not sent.
    pub skipped: u64,
}

pub async fn connect_tcp(addr: SocketAddr) -> Result<TcpStream, EchoError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| EchoError::Connect(addr.to_string(), e))
}

pub async fn connect_unix(path: &Path) -> Result<UnixStream, EchoError> {
    UnixStream::connect(path).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            EchoError::SocketFileMissing(path.to_path_buf())
        } else {
            EchoError::Connect(path.display().to_string(), e)
        }
    })
}

/// Bind an ephemeral socket of the server's family and connect it to `addr`.
pub async fn connect_udp(addr: SocketAddr) -> Result<UdpSocket, EchoError> {
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| EchoError::Connect(addr.to_string(), e))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| EchoError::Connect(addr.to_string(), e))?;
    Ok(socket)
}

/// Run the line client over a connected stream.
pub async fn run_stream_client<S, R, W>(
    mut stream: S,
    mut input: R,
    mut output: W,
    options: ClientOptions,
) -> Result<ClientStats, EchoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reply = BytesMut::zeroed(options.max_message_size);
    let mut stats = ClientStats::default();

    loop {
        let Some(line) = next_line(&mut input, &mut output, &options).await? else {
            debug!(messages = stats.messages, "End of input");
            return Ok(stats);
        };
        if line.is_empty() {
            stats.skipped += 1;
            continue;
        }

        for message in line.chunks(options.max_message_size) {
            stream.write_all(message).await.map_err(EchoError::Send)?;

            // A stream may split the reply; collect as many bytes as were sent.
            let mut received = 0;
            while received < message.len() {
                let n = stream
                    .read(&mut reply[received..message.len()])
                    .await
                    .map_err(EchoError::Receive)?;
                if n == 0 {
                    if received > 0 {
                        warn!(
                            received,
                            expected = message.len(),
                            "Server closed connection mid-reply"
                        );
                        print_reply(&mut output, &reply[..received]).await?;
                    } else {
                        info!("Server closed connection");
                    }
                    return Ok(stats);
                }
                received += n;
            }

            print_reply(&mut output, &reply[..received]).await?;
            stats.messages += 1;
        }
    }
}

/// Run the line client over a connected UDP socket.
pub async fn run_datagram_client<R, W>(
    socket: &UdpSocket,
    mut input: R,
    mut output: W,
    options: ClientOptions,
) -> Result<ClientStats, EchoError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reply = BytesMut::zeroed(options.max_message_size);
    let mut stats = ClientStats::default();

    loop {
        let Some(line) = next_line(&mut input, &mut output, &options).await? else {
            debug!(messages = stats.messages, "End of input");
            return Ok(stats);
        };
        if line.is_empty() {
            stats.skipped += 1;
            continue;
        }

        for message in line.chunks(options.max_message_size) {
            socket.send(message).await.map_err(EchoError::Send)?;
            let n = socket
                .recv(&mut reply[..])
                .await
                .map_err(EchoError::Receive)?;

            print_reply(&mut output, &reply[..n]).await?;
            stats.messages += 1;
        }
    }
}

/// Read one line of input without its line ending; `None` at end of input.
///
/// Lines longer than `max_message_size` are sent by the caller as several
/// consecutive messages.
async fn next_line<R, W>(
    input: &mut R,
    output: &mut W,
    options: &ClientOptions,
) -> Result<Option<Vec<u8>>, EchoError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if options.interactive {
        output.write_all(PROMPT).await.map_err(EchoError::Console)?;
        output.flush().await.map_err(EchoError::Console)?;
    }

    let mut line = Vec::new();
    let n = input
        .read_until(b'\n', &mut line)
        .await
        .map_err(EchoError::Console)?;
    if n == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }

    Ok(Some(line))
}

async fn print_reply<W>(output: &mut W, reply: &[u8]) -> Result<(), EchoError>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(REPLY_PREFIX)
        .await
        .map_err(EchoError::Console)?;
    output.write_all(reply).await.map_err(EchoError::Console)?;
    output.write_all(b"\n").await.map_err(EchoError::Console)?;
    output.flush().await.map_err(EchoError::Console)
}
