//! Core reconnect loop and connection slot
//!
//! `Redialer` owns the currently tracked connection and the background retry
//! loop. Consumers never dial; they subscribe and receive a generation-tagged
//! `ConnHandle` once a connection is live, then report through the handle
//! when they observe the connection die.

use crate::dialer::{Closable, Dialer};
use crate::error::Result;
use crate::handle::ConnHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Default delay between consecutive dial attempts
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Tracked connection state, mutated only through the watch sender
pub(crate) struct Slot<C> {
    /// Currently live connection, if any
    pub(crate) conn: Option<Arc<C>>,

    /// Bumped on every successful install; 0 means never connected
    pub(crate) generation: u64,

    /// Set once by `close`, never reset
    pub(crate) closed: bool,
}

/// State shared between the redialer, subscriber waiters, and handles
///
/// The watch channel plays the role of a mutex/condvar pair: `send_modify`
/// is the locked update plus broadcast, `wait_for` is the condition wait.
pub(crate) struct Shared<C> {
    pub(crate) slot: watch::Sender<Slot<C>>,
}

impl<C> Shared<C> {
    pub(crate) fn new() -> Self {
        let (slot, _) = watch::channel(Slot {
            conn: None,
            generation: 0,
            closed: false,
        });
        Self { slot }
    }

    /// Clear the slot if it still holds `generation`
    ///
    /// Stale reports (superseded generation, already-cleared slot, or a
    /// closed redialer) change nothing and wake nobody.
    pub(crate) fn report_closed(&self, generation: u64) -> bool {
        let cleared = self.slot.send_if_modified(|slot| {
            if slot.closed || slot.generation != generation {
                return false;
            }
            slot.conn.take().is_some()
        });
        if cleared {
            tracing::info!(generation, "Connection reported closed");
        }
        cleared
    }
}

/// Keeps one connection alive by redialing in the background
///
/// Generic over the dialer so that handles carry the dialer's concrete
/// connection type. Construct, spawn `run` on a task, then hand clones of
/// the redialer (behind an `Arc`) to anything that needs to subscribe.
pub struct Redialer<D: Dialer> {
    dialer: D,
    shared: Arc<Shared<D::Conn>>,
    retry_interval: Duration,
}

impl<D: Dialer> Redialer<D> {
    /// Create an idle redialer; no dialing happens until `run`
    pub fn new(dialer: D) -> Self {
        Self::with_retry_interval(dialer, RETRY_INTERVAL)
    }

    /// Create an idle redialer with a custom delay between dial attempts
    ///
    /// The retry policy stays fixed-interval; only the constant changes.
    pub fn with_retry_interval(dialer: D, retry_interval: Duration) -> Self {
        Self {
            dialer,
            shared: Arc::new(Shared::new()),
            retry_interval,
        }
    }

    /// Dial target of the underlying dialer
    pub fn addr(&self) -> String {
        self.dialer.addr()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.slot.borrow().closed
    }

    /// Drive the reconnect loop
    ///
    /// Intended for a dedicated spawned task; returns only after `close`.
    /// While a connection is tracked the loop parks, waking when a closure
    /// report clears the slot or when the redialer shuts down.
    pub async fn run(&self) {
        let mut slot_rx = self.shared.slot.subscribe();
        loop {
            let closed = match slot_rx.wait_for(|s| s.conn.is_none() || s.closed).await {
                Ok(slot) => slot.closed,
                Err(_) => return,
            };
            if closed {
                self.close_tracked().await;
                return;
            }

            let conn = match self.dial_until_closed().await {
                Some(conn) => conn,
                // Closed mid-retry; the next wait observes the flag.
                None => continue,
            };

            let conn = Arc::new(conn);
            let mut generation = 0;
            let installed = self.shared.slot.send_if_modified(|slot| {
                if slot.closed {
                    return false;
                }
                slot.generation += 1;
                generation = slot.generation;
                slot.conn = Some(Arc::clone(&conn));
                true
            });
            if !installed {
                // close() raced the dial. The connection was never visible
                // to subscribers, so it is ours to tear down.
                if let Err(err) = conn.close().await {
                    tracing::warn!(
                        addr = %self.dialer.addr(),
                        error = %err,
                        "Failed to close connection dialed during shutdown"
                    );
                }
                return;
            }
            tracing::info!(addr = %self.dialer.addr(), generation, "Connected");
        }
    }

    /// Shut the redialer down
    ///
    /// Sets the closed flag, wakes the run loop and every pending waiter,
    /// then closes the tracked connection if there was one, returning any
    /// error from that teardown. Idempotent: once the slot is empty there
    /// is nothing left to close and nothing to report.
    pub async fn close(&self) -> Result<()> {
        let mut taken = None;
        self.shared.slot.send_modify(|slot| {
            slot.closed = true;
            taken = slot.conn.take();
        });
        match taken {
            Some(conn) => {
                tracing::info!(addr = %self.dialer.addr(), "Closing tracked connection");
                conn.close().await
            }
            None => Ok(()),
        }
    }

    /// Subscribe for the current connection
    ///
    /// Returns a one-shot receiver that resolves with a fresh handle once a
    /// connection is live. After `close` the sender is dropped without a
    /// value, so pending and future subscriptions resolve with a receive
    /// error instead of hanging. Each call is a single delivery; subscribe
    /// again after consuming a handle or reporting its failure.
    ///
    /// The waiter runs on a spawned task, so this must be called from
    /// within a Tokio runtime.
    pub fn subscribe(&self) -> oneshot::Receiver<ConnHandle<D::Conn>> {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut slot_rx = shared.slot.subscribe();
            let handle = match slot_rx.wait_for(|s| s.closed || s.conn.is_some()).await {
                Ok(slot) if !slot.closed => slot.conn.as_ref().map(|conn| {
                    ConnHandle::new(Arc::clone(&shared), Arc::clone(conn), slot.generation)
                }),
                _ => None,
            };
            if let Some(handle) = handle {
                let _ = tx.send(handle);
            }
            // Dropping the sender without sending is the terminal signal.
        });
        rx
    }

    /// Dial until one attempt succeeds or the redialer closes
    async fn dial_until_closed(&self) -> Option<D::Conn> {
        loop {
            if self.is_closed() {
                return None;
            }
            tracing::debug!(addr = %self.dialer.addr(), "Dialing");
            match self.dialer.dial().await {
                Ok(conn) => return Some(conn),
                Err(err) => {
                    tracing::warn!(addr = %self.dialer.addr(), error = %err, "Dial failed");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Take and close the tracked connection, if any
    async fn close_tracked(&self) {
        let mut taken = None;
        self.shared.slot.send_modify(|slot| taken = slot.conn.take());
        if let Some(conn) = taken {
            if let Err(err) = conn.close().await {
                tracing::warn!(
                    addr = %self.dialer.addr(),
                    error = %err,
                    "Failed to close connection on shutdown"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RedialError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{timeout, Instant};
    use tokio_test::assert_pending;

    /// Dialer that fails a scripted number of attempts before succeeding
    struct ScriptedDialer {
        fail_first: usize,
        attempts: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedDialer {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                attempts: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ScriptedConn {
        attempt: usize,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Closable for ScriptedConn {
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Dialer for ScriptedDialer {
        type Conn = ScriptedConn;

        fn addr(&self) -> String {
            "scripted:0".to_string()
        }

        async fn dial(&self) -> Result<ScriptedConn> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                Err(RedialError::Dial {
                    addr: self.addr(),
                    reason: "scripted failure".to_string(),
                })
            } else {
                Ok(ScriptedConn {
                    attempt,
                    closes: Arc::clone(&self.closes),
                })
            }
        }
    }

    fn spawn_run<D: Dialer>(redialer: &Arc<Redialer<D>>) -> tokio::task::JoinHandle<()> {
        let runner = Arc::clone(redialer);
        tokio::spawn(async move { runner.run().await })
    }

    #[tokio::test]
    async fn test_close_before_run_terminates() {
        let dialer = ScriptedDialer::new(0);
        let attempts = Arc::clone(&dialer.attempts);
        let closes = Arc::clone(&dialer.closes);
        let redialer = Arc::new(Redialer::new(dialer));

        redialer.close().await.unwrap();

        let run = spawn_run(&redialer);
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap();

        // Never dialed, so there was nothing to close.
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert!(redialer.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_close_during_retry_resolves_waiters_terminally() {
        let dialer = ScriptedDialer::new(usize::MAX);
        let attempts = Arc::clone(&dialer.attempts);
        let redialer = Arc::new(Redialer::with_retry_interval(
            dialer,
            Duration::from_millis(25),
        ));

        let run = spawn_run(&redialer);
        let mut pending = tokio_test::task::spawn(redialer.subscribe());

        // Let a few attempts fail; the subscription must stay unresolved.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        assert_pending!(pending.poll());

        redialer.close().await.unwrap();
        assert!(pending.into_inner().await.is_err());
        timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dial_failures_delay_delivery_to_all_waiters() {
        let dialer = ScriptedDialer::new(2);
        let redialer = Arc::new(Redialer::with_retry_interval(
            dialer,
            Duration::from_millis(50),
        ));

        // One subscriber before the loop starts, two after.
        let early = redialer.subscribe();
        let run = spawn_run(&redialer);
        let rx1 = redialer.subscribe();
        let rx2 = redialer.subscribe();

        let started = Instant::now();
        let delivered = futures::future::join_all([early, rx1, rx2]).await;

        // Two failures gate delivery behind two full retry delays.
        assert!(started.elapsed() >= Duration::from_millis(100));

        let handles: Vec<_> = delivered.into_iter().map(|h| h.unwrap()).collect();
        assert!(handles.iter().all(|h| h.generation() == 1));
        assert!(handles
            .iter()
            .all(|h| std::ptr::eq(h.get(), handles[0].get())));
        assert_eq!(handles[0].get().attempt, 2);

        redialer.close().await.unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_report_closed_rearms_dialing() {
        let dialer = ScriptedDialer::new(0);
        let attempts = Arc::clone(&dialer.attempts);
        let redialer = Arc::new(Redialer::new(dialer));
        let run = spawn_run(&redialer);

        let first = redialer.subscribe().await.unwrap();
        assert_eq!(first.generation(), 1);

        first.report_closed();
        let second = redialer.subscribe().await.unwrap();

        assert_eq!(second.generation(), 2);
        assert!(!std::ptr::eq(first.get(), second.get()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        redialer.close().await.unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_report_does_not_clear_newer_connection() {
        let dialer = ScriptedDialer::new(0);
        let attempts = Arc::clone(&dialer.attempts);
        let redialer = Arc::new(Redialer::new(dialer));
        let run = spawn_run(&redialer);

        let first = redialer.subscribe().await.unwrap();
        first.report_closed();
        let second = redialer.subscribe().await.unwrap();
        assert_eq!(second.generation(), 2);

        // Superseded handle; must leave generation 2 untouched.
        first.report_closed();

        let third = redialer.subscribe().await.unwrap();
        assert_eq!(third.generation(), 2);
        assert!(std::ptr::eq(second.get(), third.get()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        redialer.close().await.unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeat_report_through_same_handle_is_noop() {
        let dialer = ScriptedDialer::new(0);
        let attempts = Arc::clone(&dialer.attempts);
        let redialer = Arc::new(Redialer::new(dialer));
        let run = spawn_run(&redialer);

        let first = redialer.subscribe().await.unwrap();
        first.report_closed();
        first.report_closed();

        let second = redialer.subscribe().await.unwrap();
        assert_eq!(second.generation(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        redialer.close().await.unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_while_connected_closes_exactly_once() {
        let dialer = ScriptedDialer::new(0);
        let closes = Arc::clone(&dialer.closes);
        let redialer = Arc::new(Redialer::new(dialer));
        let run = spawn_run(&redialer);

        let _handle = redialer.subscribe().await.unwrap();

        redialer.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // The run loop's own termination path must not close it again.
        run.await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Repeat close: slot already empty, nothing to report.
        redialer.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        assert!(redialer.is_closed());
        assert!(redialer.subscribe().await.is_err());
    }

    /// Dialer whose attempts park until released, for racing `close`
    /// against an in-flight dial
    struct GatedDialer {
        gate: Arc<tokio::sync::Semaphore>,
        entered: Arc<tokio::sync::Notify>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Dialer for GatedDialer {
        type Conn = ScriptedConn;

        fn addr(&self) -> String {
            "gated:0".to_string()
        }

        async fn dial(&self) -> Result<ScriptedConn> {
            self.entered.notify_one();
            let _ = self.gate.acquire().await;
            Ok(ScriptedConn {
                attempt: 0,
                closes: Arc::clone(&self.closes),
            })
        }
    }

    #[tokio::test]
    async fn test_dial_finishing_after_close_is_discarded() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let entered = Arc::new(tokio::sync::Notify::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let redialer = Arc::new(Redialer::new(GatedDialer {
            gate: Arc::clone(&gate),
            entered: Arc::clone(&entered),
            closes: Arc::clone(&closes),
        }));
        let run = spawn_run(&redialer);

        // Wait until the dial is in flight, shut down, then release it.
        entered.notified().await;
        redialer.close().await.unwrap();
        gate.add_permits(1);

        timeout(Duration::from_secs(1), run).await.unwrap().unwrap();

        // The late success was never installed and got torn down.
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(redialer.subscribe().await.is_err());
    }
}
