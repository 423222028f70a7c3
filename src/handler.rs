//! Per-connection echo handler.
//!
//! Reads everything a client sends until it closes its write side, then
//! writes the accumulated bytes back in one pass and closes the connection.
//!
//! ```text
//! client: "hel" "lo" FIN
//! server:                "hello" FIN
//! ```
//!
//! Failures stay local to the connection: a read error ends the read loop
//! and whatever arrived so far is still echoed; a write error is logged and
//! the connection is dropped.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::listener::Connection;

/// Outcome of serving one connection.
#[derive(Debug, Default)]
pub struct EchoReport {
    /// Bytes accumulated from the client.
    pub received: usize,
    /// Bytes written back to the client.
    pub echoed: usize,
    /// Read failure other than end-of-stream, if any.
    pub read_error: Option<io::Error>,
    /// Failure writing the echo or shutting down the write side, if any.
    pub write_error: Option<io::Error>,
}

impl EchoReport {
    /// True if every accumulated byte made it back to the client.
    pub fn is_complete(&self) -> bool {
        self.read_error.is_none() && self.write_error.is_none() && self.echoed == self.received
    }
}

/// Serve a single accepted connection to completion.
///
/// The stream is dropped (and therefore closed) before this returns,
/// regardless of how the exchange ended.
pub async fn serve(conn: Connection, chunk_size: usize) -> EchoReport {
    let Connection { stream, peer } = conn;
    info!(%peer, "Serving connection");

    let (mut reader, mut writer) = stream.into_split();
    let report = echo(&mut reader, &mut writer, chunk_size).await;

    if let Some(ref e) = report.read_error {
        warn!(%peer, error = %e, received = report.received, "Read error");
    }
    if let Some(ref e) = report.write_error {
        warn!(%peer, error = %e, echoed = report.echoed, "Write error");
    }
    debug!(
        %peer,
        received = report.received,
        echoed = report.echoed,
        complete = report.is_complete(),
        "Connection closed"
    );

    report
}

/// Accumulate `reader` until end-of-stream, then write it all to `writer`.
///
/// Each read requests up to `chunk_size` bytes; only the bytes actually
/// returned are appended. The write side is shut down after a successful
/// echo so the peer observes end-of-stream.
pub async fn echo<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> EchoReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut report = EchoReport::default();
    let mut buffer = BytesMut::new();
    let mut chunk = vec![0u8; chunk_size];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                trace!(bytes = n, total = buffer.len() + n, "Read chunk");
                buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                report.read_error = Some(e);
                break;
            }
        }
    }
    report.received = buffer.len();

    if let Err(e) = writer.write_all(&buffer).await {
        report.write_error = Some(e);
        return report;
    }
    report.echoed = buffer.len();

    if let Err(e) = writer.shutdown().await {
        report.write_error = Some(e);
    }

    report
}
