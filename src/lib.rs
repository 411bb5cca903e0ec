//! # redialer
//!
//! Keeps a single connection to a remote endpoint alive: one background task
//! redials after every failure, and consumers subscribe for generation-tagged
//! handles to the current connection.
//!
//! ## Overview
//!
//! `redialer` owns the dial/retry loop so application code never talks to
//! dial logic directly and never holds a connection that is known-dead.
//! Each subscription delivers exactly one handle; when a consumer observes
//! the connection fail it reports back through the handle, the slot clears,
//! and the loop dials a replacement at a fixed interval. Reports from
//! handles of an earlier generation are ignored, so a slow consumer can
//! never tear down its successor's connection.
//!
//! ## Quick Start
//!
//! ```rust
//! use redialer::TcpRedialer;
//! use std::sync::Arc;
//!
//! # async fn example() -> redialer::Result<()> {
//! let redialer = Arc::new(TcpRedialer::new("127.0.0.1:5000"));
//!
//! // The reconnect loop runs on its own task until `close`.
//! let runner = Arc::clone(&redialer);
//! tokio::spawn(async move { runner.run().await });
//!
//! // Each subscription delivers one live connection.
//! if let Ok(client) = redialer.subscribe().await {
//!     client.write_all(b"PING\r\n").await?;
//! }
//!
//! redialer.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Adapters
//!
//! - **tcp** — raw byte streams; delivered clients report read/write
//!   failures automatically
//! - **nats** — NATS clients; broker-initiated closes re-arm the dial loop
//!
//! Any other protocol plugs in by implementing [`Dialer`] and [`Closable`]
//! and driving a [`Redialer`] directly.
//!
//! ## Architecture
//!
//! - **Dialer** trait — one connection attempt plus a diagnostic address
//! - **Redialer** — the connection slot, the fixed-interval retry loop,
//!   subscriptions, shutdown
//! - **ConnHandle** — generation-tagged accessor used to read, and to report
//!   the failure of, one connection instance

pub mod dialer;
pub mod error;
pub mod handle;
pub mod redialer;

// Re-export core types
pub use dialer::{Closable, Dialer};
pub use error::{RedialError, Result};
pub use handle::ConnHandle;
pub use redialer::{Redialer, RETRY_INTERVAL};

// Re-export adapters for convenience
pub use dialer::nats::{NatsConn, NatsDialer, NatsRedialer};
pub use dialer::tcp::{TcpClient, TcpConn, TcpDialer, TcpRedialer};
