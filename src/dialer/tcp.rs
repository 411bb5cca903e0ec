//! TCP adapter
//!
//! Dials a plain TCP endpoint and delivers `TcpClient` values whose reads
//! and writes report connection failures back to the redialer on their own,
//! so consumers just resubscribe when an operation fails.

use crate::dialer::{Closable, Dialer};
use crate::error::Result;
use crate::handle::ConnHandle;
use crate::redialer::Redialer;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

/// Dials one TCP endpoint
pub struct TcpDialer {
    address: String,
}

impl TcpDialer {
    /// Dialer for a `host:port` target
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpConn;

    fn addr(&self) -> String {
        self.address.clone()
    }

    async fn dial(&self) -> Result<TcpConn> {
        let stream = TcpStream::connect(self.address.as_str()).await?;
        TcpConn::new(stream)
    }
}

/// One established TCP connection
///
/// The stream is split into read and write halves, each behind its own
/// lock, so concurrent consumers are serialized per direction while reads
/// and writes proceed independently.
pub struct TcpConn {
    local: SocketAddr,
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConn {
    fn new(stream: TcpStream) -> Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            local,
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Remote address of the socket
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read into `buf`, returning the number of bytes read (0 at EOF)
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    /// Write all of `buf`
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.writer.lock().await.write_all(buf).await
    }
}

#[async_trait]
impl Closable for TcpConn {
    async fn close(&self) -> Result<()> {
        // Half-close with a FIN; the socket itself is released once the
        // last handle drops.
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Connection delivered by `TcpRedialer::subscribe`
///
/// Forwards reads and writes to the underlying connection and reports the
/// connection closed on any I/O error. A read of zero bytes into a
/// non-empty buffer is the peer closing and is reported as well.
pub struct TcpClient {
    handle: ConnHandle<TcpConn>,
}

impl TcpClient {
    fn new(handle: ConnHandle<TcpConn>) -> Self {
        Self { handle }
    }

    /// Read into `buf`; EOF and errors mark the connection dead
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        // Ok(0) from an empty buffer is not an EOF.
        if buf.is_empty() {
            return Ok(0);
        }
        match self.handle.get().read(buf).await {
            Ok(0) => {
                self.handle.report_closed();
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                self.handle.report_closed();
                Err(err)
            }
        }
    }

    /// Write all of `buf`; errors mark the connection dead
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self.handle.get().write_all(buf).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.handle.report_closed();
                Err(err)
            }
        }
    }

    /// The underlying handle, for manual reporting or direct access
    pub fn handle(&self) -> &ConnHandle<TcpConn> {
        &self.handle
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.get().local_addr()
    }

    /// Remote address of the socket
    pub fn peer_addr(&self) -> SocketAddr {
        self.handle.get().peer_addr()
    }
}

/// Redialer specialized to TCP endpoints
pub struct TcpRedialer {
    inner: Redialer<TcpDialer>,
}

impl TcpRedialer {
    /// Redialer for a `host:port` target
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            inner: Redialer::new(TcpDialer::new(address)),
        }
    }

    /// Same, with a custom delay between dial attempts
    pub fn with_retry_interval(address: impl Into<String>, retry_interval: Duration) -> Self {
        Self {
            inner: Redialer::with_retry_interval(TcpDialer::new(address), retry_interval),
        }
    }

    /// Dial target
    pub fn addr(&self) -> String {
        self.inner.addr()
    }

    /// Drive the reconnect loop; returns only after `close`
    pub async fn run(&self) {
        self.inner.run().await
    }

    /// Shut down, closing the tracked connection if any
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Subscribe for the current connection as a `TcpClient`
    ///
    /// Resolves with a receive error after `close`, like the core
    /// subscription it forwards.
    pub fn subscribe(&self) -> oneshot::Receiver<TcpClient> {
        let (tx, rx) = oneshot::channel();
        let inner_rx = self.inner.subscribe();
        tokio::spawn(async move {
            if let Ok(handle) = inner_rx.await {
                let _ = tx.send(TcpClient::new(handle));
            }
        });
        rx
    }
}
