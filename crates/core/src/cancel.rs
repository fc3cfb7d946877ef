//! Cooperative stop signal shared between the loops and the CLI handlers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// SIGINT / SIGTERM.
    Interrupt,
    /// The operator typed the stop key.
    StopKey,
    /// Programmatic stop.
    Requested,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::StopKey => write!(f, "stop key"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

/// Cloneable stop flag, checked once per loop iteration.
///
/// The first reason passed to [`cancel`](Self::cancel) wins; later calls
/// only keep the flag set.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
            tracing::info!(%reason, "stop requested");
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock()
    }

    /// Clear the flag and reason so the token can be raised again.
    ///
    /// Used for per-session signals; a process-wide token is never reset.
    pub fn reset(&self) -> Option<CancelReason> {
        let mut slot = self.reason.lock();
        self.cancelled.store(false, Ordering::SeqCst);
        slot.take()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
