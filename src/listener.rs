//! Listening socket for the echo server.
//!
//! Owns the bound server socket for the life of the process and hands out
//! accepted connections one at a time.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::TcpStream;

/// A client connection produced by [`Listener::accept_next`].
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// Bound IPv4 server socket.
#[derive(Debug)]
pub struct Listener {
    inner: tokio::net::TcpListener,
}

impl Listener {
    /// Bind and listen on `addr`.
    ///
    /// Must be called from within a tokio runtime. Only `SO_REUSEADDR` is set,
    /// so a port held by another listening socket fails with `AddrInUse`.
    pub fn bind(addr: SocketAddrV4, backlog: i32) -> Result<Self, ListenerError> {
        let std_listener =
            create_listener(addr, backlog).map_err(|source| ListenerError::Bind {
                addr: SocketAddr::V4(addr),
                source,
            })?;

        let inner = tokio::net::TcpListener::from_std(std_listener).map_err(|source| {
            ListenerError::Bind {
                addr: SocketAddr::V4(addr),
                source,
            }
        })?;

        Ok(Self { inner })
    }

    /// Wait for the next client to connect.
    pub async fn accept_next(&self) -> Result<Connection, ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        Ok(Connection { stream, peer })
    }

    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        self.inner.local_addr().map_err(ListenerError::LocalAddr)
    }
}

fn create_listener(addr: SocketAddrV4, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Listener-level failures. All of them are fatal to the process.
#[derive(Debug)]
pub enum ListenerError {
    Bind { addr: SocketAddr, source: io::Error },
    Accept(io::Error),
    LocalAddr(io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind { addr, source } => {
                write!(f, "Failed to bind listener to {addr}: {source}")
            }
            ListenerError::Accept(e) => write!(f, "Failed to accept connection: {e}"),
            ListenerError::LocalAddr(e) => write!(f, "Failed to read listener address: {e}"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } => Some(source),
            ListenerError::Accept(e) | ListenerError::LocalAddr(e) => Some(e),
        }
    }
}
