//! Datagram echo over UDP.
//!
//! There is no connection setup, so the listener and the session handler
//! collapse into one loop: every datagram is answered with a datagram
//! holding the same bytes, sent back to its origin. No per-client state is
//! kept between datagrams.

use std::net::SocketAddr;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{trace, warn};

use crate::error::EchoError;
use crate::peer::PeerAddr;

/// Bind a UDP socket for the echo server.
pub fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, EchoError> {
    let endpoint = addr.to_string();
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::DGRAM,
        Some(Protocol::UDP),
    )
    .map_err(|e| EchoError::Bind(endpoint.clone(), e))?;

    socket
        .bind(&addr.into())
        .map_err(|e| EchoError::bind(endpoint.clone(), e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| EchoError::Bind(endpoint.clone(), e))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| EchoError::Bind(endpoint, e))
}

/// Echo datagrams forever.
///
/// Datagrams larger than `max_message_size` are truncated by the receive.
/// Receive and send failures are logged and the loop moves on.
pub async fn serve_datagrams(socket: UdpSocket, max_message_size: usize) {
    let mut buffer = BytesMut::zeroed(max_message_size);

    loop {
        let (n, origin) = match socket.recv_from(&mut buffer[..]).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %EchoError::Receive(e), "Datagram receive failed");
                continue;
            }
        };

        let peer = PeerAddr::from(origin);
        let message = &buffer[..n];
        trace!(
            peer = %peer,
            bytes = n,
            message = %String::from_utf8_lossy(message),
            "Received datagram"
        );

        if let Err(e) = socket.send_to(message, origin).await {
            warn!(peer = %peer, error = %EchoError::Send(e), "Datagram send failed");
            continue;
        }
        trace!(peer = %peer, bytes = n, "Replied");
    }
}
