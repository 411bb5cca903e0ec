//! Dialer trait — the core abstraction for connection backends
//!
//! Each protocol (TCP, NATS, etc.) implements `Dialer` to describe how one
//! connection attempt is made and `Closable` to describe how the resulting
//! connection is torn down. The `Redialer` drives everything else.

use crate::error::Result;
use async_trait::async_trait;

pub mod nats;
pub mod tcp;

pub use nats::NatsRedialer;
pub use tcp::TcpRedialer;

/// Core trait for connection backends
///
/// Implementations handle the protocol-specific details of establishing a
/// single connection. The `Redialer` calls `dial` repeatedly until it
/// succeeds and uses `addr` in every log line, so `addr` must never contain
/// secrets.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connection object produced by a successful dial
    type Conn: Closable;

    /// Human-readable dial target, for diagnostics only
    fn addr(&self) -> String;

    /// Attempt to establish one connection
    ///
    /// Failures are logged and retried by the redialer; they are never
    /// surfaced to subscribers. A dial that blocks forever stalls the retry
    /// loop, so implementations should bound their own attempts.
    async fn dial(&self) -> Result<Self::Conn>;
}

/// Connection objects the redialer can tear down
///
/// `close` is invoked at most once per connection object, either by
/// `Redialer::close` or by the run loop's own termination path.
#[async_trait]
pub trait Closable: Send + Sync + 'static {
    /// Release the underlying resource
    async fn close(&self) -> Result<()>;
}
