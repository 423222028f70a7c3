//! TCP server for echo connections.
//!
//! Accepts connections in an unbounded loop and hands each one to its own
//! task, so a slow client never holds up the accept loop or other clients.

use crate::config::Config;
use crate::handler;
use crate::listener::{Listener, ListenerError};
use tracing::info;

/// Server instance
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server { config }
    }

    /// Bind the configured address and begin accepting connections.
    ///
    /// Only returns on a listener failure, which is fatal.
    pub async fn run(&self) -> Result<(), ListenerError> {
        let listener = Listener::bind(self.config.listen_addr(), self.config.backlog)?;
        self.serve(listener).await
    }

    /// Run the accept loop over an already-bound listener.
    pub async fn serve(&self, listener: Listener) -> Result<(), ListenerError> {
        let address = listener.local_addr()?;
        info!(%address, "Server listening");

        let chunk_size = self.config.chunk_size;

        loop {
            let conn = listener.accept_next().await?;

            tokio::spawn(async move {
                handler::serve(conn, chunk_size).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config() -> Config {
        Config {
            host: Ipv4Addr::LOCALHOST,
            port: 0,
            workers: None,
            backlog: 128,
            chunk_size: 4096,
            log_level: "info".to_string(),
        }
    }

    /// Start a server on an ephemeral loopback port and return its address.
    async fn start_server() -> SocketAddr {
        let config = test_config();
        let listener = Listener::bind(config.listen_addr(), config.backlog).unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = Server::new(config).serve(listener).await;
        });

        addr
    }

    /// Send `payload` (in pieces of `write_size`), close the write side and
    /// collect everything the server returns.
    async fn roundtrip(addr: SocketAddr, payload: &[u8], write_size: usize) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for piece in payload.chunks(write_size.max(1)) {
            stream.write_all(piece).await.unwrap();
        }
        stream.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).await.unwrap();
        echoed
    }

    #[tokio::test]
    async fn test_echo_identity() {
        let addr = start_server().await;
        let echoed = roundtrip(addr, b"hello, echo", 1024).await;
        assert_eq!(echoed, b"hello, echo");
    }

    #[tokio::test]
    async fn test_empty_echo() {
        let addr = start_server().await;
        let echoed = roundtrip(addr, b"", 1024).await;
        assert!(echoed.is_empty());
    }

    #[tokio::test]
    async fn test_byte_at_a_time_writes() {
        let addr = start_server().await;
        let payload: Vec<u8> = (0..200u8).collect();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        for byte in &payload {
            stream.write_all(std::slice::from_ref(byte)).await.unwrap();
        }
        stream.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);
    }

    #[tokio::test]
    async fn test_large_payload() {
        let addr = start_server().await;
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let echoed = roundtrip(addr, &payload, 10_000).await;
        assert_eq!(echoed.len(), 10_000);
        assert_eq!(echoed, payload);
    }

    #[tokio::test]
    async fn test_concurrent_clients_are_independent() {
        let addr = start_server().await;

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            tasks.push(tokio::spawn(async move {
                let payload = vec![i; 5000 + i as usize];
                let echoed = roundtrip(addr, &payload, 333).await;
                (payload, echoed)
            }));
        }

        for task in tasks {
            let (payload, echoed) = task.await.unwrap();
            assert_eq!(echoed, payload);
        }
    }

    #[tokio::test]
    async fn test_idle_client_does_not_block_accept() {
        let addr = start_server().await;

        // Holds its write side open, so its handler stays in the read loop.
        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"pending").await.unwrap();

        let echoed = tokio::time::timeout(Duration::from_secs(5), roundtrip(addr, b"next", 16))
            .await
            .unwrap();
        assert_eq!(echoed, b"next");

        idle.shutdown().await.unwrap();
        let mut rest = Vec::new();
        idle.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"pending");
    }

    #[tokio::test]
    async fn test_run_fails_on_port_in_use() {
        let held = std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let mut config = test_config();
        config.port = held.local_addr().unwrap().port();

        let result = tokio::time::timeout(Duration::from_secs(5), Server::new(config).run())
            .await
            .unwrap();
        assert!(matches!(result, Err(ListenerError::Bind { .. })));
    }
}
