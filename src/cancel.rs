use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::SyncError;

/// Something a blocked waiter sleeps on. Waking must take the primitive's
/// lock before notifying so the wakeup cannot slip in between the waiter's
/// cancellation check and its sleep.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Weak<dyn Wake>)>,
}

/// Cancellation handle shared by whoever may abandon a wait and the waiters
/// themselves.
///
/// Cancelling wakes every waiter currently blocked on a gate or barrier with
/// this token, and makes later waits with it fail at once.
#[derive(Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    listeners: Arc<Mutex<Listeners>>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();

        let targets: Vec<Weak<dyn Wake>> = {
            let mut listeners = lock(&self.listeners);
            listeners.entries.drain(..).map(|(_, target)| target).collect()
        };
        for target in targets {
            if let Some(target) = target.upgrade() {
                target.wake();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](CancelToken::cancel) has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    fn listen(&self, target: Weak<dyn Wake>) -> Listening<'_> {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, target));
        Listening {
            listeners: &self.listeners,
            id,
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct Listening<'a> {
    listeners: &'a Mutex<Listeners>,
    id: u64,
}

impl Drop for Listening<'_> {
    fn drop(&mut self) {
        let mut listeners = lock(self.listeners);
        let id = self.id;
        listeners.entries.retain(|(entry, _)| *entry != id);
    }
}

/// How long a blocking call may wait and what may cut it short.
///
/// The default waits forever and cannot be cancelled.
#[derive(Clone, Debug, Default)]
pub struct WaitOptions {
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl WaitOptions {
    pub fn new() -> WaitOptions {
        WaitOptions::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> WaitOptions {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_on(mut self, token: &CancelToken) -> WaitOptions {
        self.cancel = Some(token.clone());
        self
    }

    /// Starts the clock and subscribes `target` to cancellation. Must be
    /// called before taking the primitive's lock.
    pub(crate) fn begin(&self, target: Arc<dyn Wake>) -> Waiting<'_> {
        Waiting {
            // a deadline past what Instant can represent is no deadline
            deadline: self.timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
            cancel: self.cancel.as_ref(),
            _listening: self
                .cancel
                .as_ref()
                .map(|token| token.listen(Arc::downgrade(&target))),
        }
    }
}

/// One blocking call in progress.
pub(crate) struct Waiting<'a> {
    deadline: Option<Instant>,
    cancel: Option<&'a CancelToken>,
    _listening: Option<Listening<'a>>,
}

impl Waiting<'_> {
    /// Cancellation is reported ahead of an expired deadline.
    pub(crate) fn interrupted(&self) -> Option<SyncError> {
        if self.cancel.map_or(false, CancelToken::is_cancelled) {
            return Some(SyncError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SyncError::Timeout),
            _ => None,
        }
    }

    /// Sleeps until notified or until the deadline passes.
    pub(crate) fn block<'g, T>(&self, cvar: &Condvar, guard: MutexGuard<'g, T>) -> MutexGuard<'g, T> {
        match self.deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                cvar.wait_timeout(guard, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => wait(cvar, guard),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait<'g, T>(cvar: &Condvar, guard: MutexGuard<'g, T>) -> MutexGuard<'g, T> {
    cvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}
