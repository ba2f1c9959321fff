//! Lazily created, process-wide store connection with a reconnect circuit
//! breaker.
//!
//! A [`ConnectionManager`] owns one shared connection. The first caller to
//! need it performs the connect inside a one-shot cell; everyone else waits on
//! that cell instead of connecting again. A reconnect swaps in a fresh cell
//! and closes the old connection, so a handle is never mutated in place.
//!
//! # Reconnect policy
//!
//! Callers that observe a connectivity failure call
//! [`force_reconnect`](ConnectionManager::force_reconnect). The request is
//! ignored when the last reconnect happened less than
//! [`ReconnectPolicy::frequency`] ago. Otherwise errors are collected into a
//! window: the first error only opens it, and a reconnect happens once the
//! window is at least [`ReconnectPolicy::error_threshold`] old while errors
//! are still arriving no more than `error_threshold` apart. A single blip
//! therefore never rebuilds the connection, but a connection that keeps
//! failing is replaced within roughly `error_threshold`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Recovery, StoreError};

/// Opens and closes connections for a [`ConnectionManager`].
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Establish a new connection.
    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Close a connection being replaced. Failures are logged and ignored.
    async fn close(&self, connection: Arc<Self::Connection>) -> Result<(), StoreError> {
        drop(connection);
        Ok(())
    }
}

/// Timing of the reconnect circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Minimum time between two reconnects.
    pub frequency: Duration,
    /// How long errors must persist before a reconnect, and the largest gap
    /// between errors that still counts as persisting.
    pub error_threshold: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(60),
            error_threshold: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct ErrorWindow {
    first_error: Option<Instant>,
    previous_error: Option<Instant>,
}

type Slot<C> = Arc<OnceCell<Arc<C>>>;

/// Shared connection holder. See the [module documentation](self).
pub struct ConnectionManager<F: ConnectionFactory> {
    factory: F,
    policy: ReconnectPolicy,
    slot: RwLock<Slot<F::Connection>>,
    errors: Mutex<ErrorWindow>,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last reconnect plus one; zero if none.
    last_reconnect: AtomicU64,
    reconnects: AtomicU64,
}

impl<F: ConnectionFactory> ConnectionManager<F> {
    /// Create a manager. No connection is opened until first use.
    pub fn new(factory: F, policy: ReconnectPolicy) -> Self {
        Self {
            factory,
            policy,
            slot: RwLock::new(Arc::new(OnceCell::new())),
            errors: Mutex::new(ErrorWindow::default()),
            epoch: Instant::now(),
            last_reconnect: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Number of reconnects performed so far.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    /// Return the shared connection, connecting on first use.
    pub async fn connection(&self) -> Result<Arc<F::Connection>, StoreError> {
        let cell = Arc::clone(&self.slot.read());
        let connection = cell
            .get_or_try_init(|| async {
                let connection = self.factory.connect().await?;
                info!("store connection established");
                Ok::<_, StoreError>(Arc::new(connection))
            })
            .await?;
        Ok(Arc::clone(connection))
    }

    fn recently_reconnected(&self, now: Instant) -> bool {
        let stamp = self.last_reconnect.load(Ordering::Acquire);
        if stamp == 0 {
            return false;
        }
        let last = self.epoch + Duration::from_millis(stamp - 1);
        now.saturating_duration_since(last) < self.policy.frequency
    }

    fn record_reconnect(&self, now: Instant) {
        let millis = u64::try_from(now.saturating_duration_since(self.epoch).as_millis())
            .unwrap_or(u64::MAX - 1);
        self.last_reconnect.store(millis + 1, Ordering::Release);
    }

    /// Report a connectivity failure. Returns `true` if the connection was
    /// replaced.
    pub async fn force_reconnect(&self) -> bool {
        if self.recently_reconnected(Instant::now()) {
            debug!("reconnect skipped: last reconnect is too recent");
            return false;
        }

        let mut window = self.errors.lock().await;
        let now = Instant::now();
        if self.recently_reconnected(now) {
            debug!("reconnect skipped: another caller reconnected");
            return false;
        }

        let (Some(first), Some(previous)) = (window.first_error, window.previous_error) else {
            debug!("first connection error recorded, keeping connection");
            window.first_error = Some(now);
            window.previous_error = Some(now);
            return false;
        };

        let since_first = now.saturating_duration_since(first);
        let since_previous = now.saturating_duration_since(previous);
        window.previous_error = Some(now);

        if since_previous > self.policy.error_threshold {
            debug!(
                gap_ms = %since_previous.as_millis(),
                "connection errors not sustained, starting a new error window"
            );
            window.first_error = Some(now);
            return false;
        }
        if since_first < self.policy.error_threshold {
            return false;
        }

        window.first_error = None;
        window.previous_error = None;
        self.record_reconnect(now);
        self.reconnects.fetch_add(1, Ordering::AcqRel);

        let old = std::mem::replace(&mut *self.slot.write(), Arc::new(OnceCell::new()));
        warn!(
            errors_for_ms = %since_first.as_millis(),
            "connection errors sustained, reconnecting"
        );
        if let Some(connection) = old.get() {
            if let Err(e) = self.factory.close(Arc::clone(connection)).await {
                warn!(error = %e, "closing the old connection failed");
            }
        }
        if let Err(e) = self.connection().await {
            warn!(error = %e, "reconnect attempt failed, will connect on next use");
        }
        true
    }

    /// Run one store operation with a single recovery attempt.
    ///
    /// A disposed connection or a missing script is retried once as is; a
    /// connectivity failure is reported to [`force_reconnect`](Self::force_reconnect)
    /// first. Any other error, or a failure of the retry, is returned.
    pub async fn execute<T, Op, Fut>(&self, operation: &'static str, op: Op) -> Result<T, StoreError>
    where
        Op: Fn(Arc<F::Connection>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let connection = self.connection().await?;
        let err = match op(connection).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.recovery() {
            Recovery::Surface => Err(err),
            Recovery::RetryOnce => {
                warn!(operation, error = %err, "store operation failed, retrying once");
                let connection = self.connection().await?;
                op(connection).await
            }
            Recovery::ReconnectAndRetry => {
                warn!(operation, error = %err, "connection failure, retrying once");
                self.force_reconnect().await;
                let connection = self.connection().await?;
                op(connection).await
            }
        }
    }
}
