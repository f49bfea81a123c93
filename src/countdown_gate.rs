use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::cancel::{lock, wait, Wake, WaitOptions};
use crate::SyncError;

struct Inner {
    remaining: Mutex<usize>,
    cvar: Condvar,
}

impl Wake for Inner {
    fn wake(&self) {
        let _remaining = lock(&self.remaining);
        self.cvar.notify_all();
    }
}

/// One-shot gate that opens once `count` signals have arrived.
///
/// Cloning shares the same gate.
#[derive(Clone)]
pub struct CountdownGate {
    inner: Arc<Inner>,
}

impl CountdownGate {
    pub fn new(count: usize) -> Result<CountdownGate, SyncError> {
        if count == 0 {
            return Err(SyncError::InvalidArgument("gate count must be positive"));
        }
        Ok(CountdownGate {
            inner: Arc::new(Inner {
                remaining: Mutex::new(count),
                cvar: Condvar::new(),
            }),
        })
    }

    /// Counts down by one. Returns true only for the signal that opened the
    /// gate; signals after that are ignored.
    pub fn signal(&self) -> bool {
        let mut remaining = lock(&self.inner.remaining);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        if *remaining > 0 {
            return false;
        }
        debug!("countdown gate opened");
        self.inner.cvar.notify_all();
        true
    }

    /// Signals when the returned guard is dropped, including during unwinding.
    pub fn signal_guard(&self) -> SignalGuard {
        SignalGuard { gate: self.clone() }
    }

    pub fn wait(&self) {
        let mut remaining = lock(&self.inner.remaining);
        while *remaining > 0 {
            remaining = wait(&self.inner.cvar, remaining);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), SyncError> {
        self.wait_with(&WaitOptions::new().timeout(timeout))
    }

    /// Waits until the gate opens. Cancellation or timeout ends this wait only;
    /// the count is left as it was. An open gate always succeeds.
    pub fn wait_with(&self, options: &WaitOptions) -> Result<(), SyncError> {
        let waiting = options.begin(self.inner.clone());
        let mut remaining = lock(&self.inner.remaining);
        while *remaining > 0 {
            if let Some(err) = waiting.interrupted() {
                debug!(remaining = *remaining, "gate wait abandoned: {}", err);
                return Err(err);
            }
            remaining = waiting.block(&self.inner.cvar, remaining);
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        *lock(&self.inner.remaining)
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }
}

/// Signals its gate once when dropped.
pub struct SignalGuard {
    gate: CountdownGate,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.gate.signal();
    }
}
