//! Per-operation context: correlation id, cancellation, clock.
//!
//! Every capability call takes a [`Context`]. Log events are tagged with the
//! operation id via `tracing`, so a composition can be traced end to end
//! without threading a logger object through the stack.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::{FsError, Result};

/// Cancellation signal shared by everything spawned for one operation.
///
/// Cloning is cheap; all clones observe the same signal. The first
/// `cancel` wins and its reason is what observers see.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<Option<String>>>,
    rx: watch::Receiver<Option<String>>,
}

impl Cancellation {
    /// A fresh, un-canceled signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Whether the operation has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The cancellation reason, once canceled.
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Cancel the operation. Later calls are no-ops.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        });
    }

    /// Resolve once the operation is canceled, yielding the reason.
    pub async fn canceled(&self) -> String {
        let mut rx = self.rx.clone();
        // wait_for only errs when the sender is dropped; we hold an Arc to it.
        let state = rx
            .wait_for(Option::is_some)
            .await
            .expect("cancellation sender alive");
        state.clone().unwrap_or_default()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-operation value threaded into every capability call.
#[derive(Debug, Clone)]
pub struct Context {
    operation_id: Arc<str>,
    cancellation: Cancellation,
}

impl Context {
    /// New context with a freshly generated v4 UUID operation id.
    pub fn new() -> Self {
        Self::with_operation_id(uuid::Uuid::new_v4().to_string())
    }

    /// New context with an explicit operation id.
    pub fn with_operation_id(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: Arc::from(operation_id.into()),
            cancellation: Cancellation::new(),
        }
    }

    /// Correlation id for this operation.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Cancellation signal for this operation.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Fail with [`FsError::ContextCanceled`] when the operation is canceled.
    ///
    /// Called at the entry of every primitive and before each new I/O step
    /// inside the helper algorithms.
    pub fn ensure_not_canceled(&self) -> Result<()> {
        match self.cancellation.reason() {
            Some(reason) => Err(FsError::ContextCanceled { reason }),
            None => Ok(()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Time source used for cache freshness decisions.
///
/// The caches take `Arc<dyn Clock>` so tests can drive staleness without
/// sleeping.
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
