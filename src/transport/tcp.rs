use crate::error::{ProtocolError, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tracing::{debug, instrument};

/// Bind a listener for the broker.
#[instrument]
pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address).await?;
    debug!(local = %listener.local_addr()?, "Listener bound");
    Ok(listener)
}

/// Connect to `address` (`host:port`, resolved on every call).
///
/// With `local` set, the socket is bound to that endpoint first.
#[instrument(skip(local))]
pub async fn connect(address: &str, local: Option<SocketAddr>) -> Result<TcpStream> {
    let Some(local) = local else {
        return Ok(TcpStream::connect(address).await?);
    };

    let mut last_error = None;
    for remote in lookup_host(address).await? {
        if remote.is_ipv4() != local.is_ipv4() {
            continue;
        }
        match connect_from(local, remote).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => ProtocolError::Io(e),
        None => ProtocolError::TransportError(format!(
            "no address of {address} matches the family of {local}"
        )),
    })
}

async fn connect_from(local: SocketAddr, remote: SocketAddr) -> std::io::Result<TcpStream> {
    let socket = if local.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(local)?;
    socket.connect(remote).await
}

/// Whether both ends of a connection are the same endpoint.
///
/// Connecting to a local port nobody listens on can, via TCP simultaneous
/// open, hand back a socket connected to itself. Such a socket echoes our own
/// bytes and must never be treated as a peer.
pub fn endpoints_coincide(local: SocketAddr, peer: SocketAddr) -> bool {
    local == peer
}

pub fn is_self_connection(stream: &TcpStream) -> Result<bool> {
    Ok(endpoints_coincide(stream.local_addr()?, stream.peer_addr()?))
}

/// Per-connection socket options applied by both roles.
pub fn configure(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
}
