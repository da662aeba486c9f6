//! Low-level UDP socket handling
//!
//! Sockets are built with `socket2` so broadcast and address reuse can be set
//! before binding, then handed to tokio.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use tokio::net::UdpSocket;

use crate::error::NetworkError;

/// Socket for sending the discovery probe and reading the replies.
///
/// Bound to an ephemeral port on all interfaces, with broadcast enabled.
pub fn broadcast_socket() -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket.set_broadcast(true)
        .map_err(|e| NetworkError::BindFailed(format!("Failed to set SO_BROADCAST: {}", e)))?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    into_tokio(socket)
}

/// Listener on `port` with SO_REUSEADDR, for accept/reject replies
pub fn listener_socket(port: u16) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket.set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(format!("Failed to set SO_REUSEADDR: {}", e)))?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    into_tokio(socket)
}

/// Plain ephemeral socket for one-shot sends
pub async fn ephemeral_socket() -> Result<UdpSocket, NetworkError> {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| NetworkError::BindFailed(e.to_string()))
}

fn into_tokio(socket: Socket) -> Result<UdpSocket, NetworkError> {
    let std_socket: StdUdpSocket = socket.into();
    std_socket.set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    UdpSocket::from_std(std_socket)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))
}
