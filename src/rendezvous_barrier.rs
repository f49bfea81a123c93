use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace};

use crate::cancel::{lock, wait, Wake, WaitOptions};
use crate::SyncError;

/// Callback run by the triggering party before a generation is released.
pub type Action = Box<dyn Fn() -> crate::Result<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Filling,
    /// The last party is running the action outside the lock.
    Triggering,
    /// `generation` was broken and `pending` of its parties have yet to
    /// observe it. No new generation fills until they have.
    Broken { generation: u64, pending: usize },
}

struct State {
    arrived: usize,
    generation: u64,
    phase: Phase,
}

impl State {
    /// Ends the current generation with the waiters still in it failing.
    fn break_generation(&mut self) {
        let broken = self.generation;
        self.phase = if self.arrived > 0 {
            Phase::Broken {
                generation: broken,
                pending: self.arrived,
            }
        } else {
            Phase::Filling
        };
        self.arrived = 0;
        self.generation += 1;
        debug!(generation = broken, "barrier generation broken");
    }
}

struct Inner {
    parties: usize,
    action: Option<Action>,
    state: Mutex<State>,
    cvar: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn run_action(&self) -> crate::Result<()> {
        let action = match &self.action {
            Some(action) => action,
            None => return Ok(()),
        };
        match panic::catch_unwind(AssertUnwindSafe(|| action())) {
            Ok(result) => result,
            Err(payload) => {
                let msg = if let Some(msg) = payload.downcast_ref::<&str>() {
                    msg.to_string()
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    String::from("barrier action panicked")
                };
                Err(msg.into())
            }
        }
    }
}

impl Wake for Inner {
    fn wake(&self) {
        let _state = self.lock();
        self.cvar.notify_all();
    }
}

/// A party's successful pass through the barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrival {
    index: usize,
    generation: u64,
}

impl Arrival {
    /// Position counted down from `parties - 1` for the first to arrive to
    /// 0 for the party that completed the generation.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True for the triggering party, the one that ran the action.
    pub fn is_leader(&self) -> bool {
        self.index == 0
    }
}

/// Reusable barrier for a fixed number of parties.
///
/// When the last party of a generation arrives it runs the action, if any,
/// and then every party of that generation is released together. A party
/// that times out or is cancelled breaks the generation: the others fail
/// with [`SyncError::BrokenBarrier`] and the next arrival starts afresh.
///
/// Cloning shares the same barrier.
#[derive(Clone)]
pub struct RendezvousBarrier {
    inner: Arc<Inner>,
}

impl RendezvousBarrier {
    pub fn new(parties: usize) -> Result<RendezvousBarrier, SyncError> {
        RendezvousBarrier::build(parties, None)
    }

    pub fn with_action<F>(parties: usize, action: F) -> Result<RendezvousBarrier, SyncError>
    where
        F: Fn() -> crate::Result<()> + Send + Sync + 'static,
    {
        RendezvousBarrier::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<Action>) -> Result<RendezvousBarrier, SyncError> {
        if parties == 0 {
            return Err(SyncError::InvalidArgument("barrier needs at least one party"));
        }
        Ok(RendezvousBarrier {
            inner: Arc::new(Inner {
                parties,
                action,
                state: Mutex::new(State {
                    arrived: 0,
                    generation: 0,
                    phase: Phase::Filling,
                }),
                cvar: Condvar::new(),
            }),
        })
    }

    pub fn arrive_and_wait(&self) -> Result<Arrival, SyncError> {
        self.arrive_and_wait_with(&WaitOptions::new())
    }

    pub fn arrive_and_wait_timeout(&self, timeout: Duration) -> Result<Arrival, SyncError> {
        self.arrive_and_wait_with(&WaitOptions::new().timeout(timeout))
    }

    /// Arrives at the barrier and blocks until the generation is released or
    /// broken.
    ///
    /// Running out of time or being cancelled while the generation is still
    /// filling breaks it for everyone; the caller gets `Timeout` or
    /// `Cancelled` and the rest get `BrokenBarrier`. Once the generation is
    /// triggering, the outcome is already decided and is always delivered.
    pub fn arrive_and_wait_with(&self, options: &WaitOptions) -> Result<Arrival, SyncError> {
        let waiting = options.begin(self.inner.clone());
        let mut state = self.inner.lock();

        // Not yet part of any generation, so giving up here breaks nothing.
        while state.phase != Phase::Filling {
            if let Some(err) = waiting.interrupted() {
                return Err(err);
            }
            state = waiting.block(&self.inner.cvar, state);
        }

        let generation = state.generation;
        state.arrived += 1;
        let index = self.inner.parties - state.arrived;
        trace!(generation, index, "arrived at barrier");

        if index == 0 {
            return self.trip(state, generation);
        }

        loop {
            if state.generation != generation {
                let phase = state.phase;
                return match phase {
                    Phase::Broken {
                        generation: broken,
                        pending,
                    } if broken == generation => {
                        state.phase = if pending > 1 {
                            Phase::Broken {
                                generation: broken,
                                pending: pending - 1,
                            }
                        } else {
                            // Drained; let blocked arrivals start the next generation.
                            self.inner.cvar.notify_all();
                            Phase::Filling
                        };
                        Err(SyncError::BrokenBarrier)
                    }
                    _ => Ok(Arrival { index, generation }),
                };
            }

            if state.phase == Phase::Triggering {
                state = wait(&self.inner.cvar, state);
                continue;
            }

            if let Some(err) = waiting.interrupted() {
                state.arrived -= 1;
                state.break_generation();
                self.inner.cvar.notify_all();
                return Err(err);
            }
            state = waiting.block(&self.inner.cvar, state);
        }
    }

    fn trip(&self, mut state: MutexGuard<'_, State>, generation: u64) -> Result<Arrival, SyncError> {
        state.phase = Phase::Triggering;
        drop(state);

        let outcome = self.inner.run_action();

        let mut state = self.inner.lock();
        let result = match outcome {
            Ok(()) => {
                state.arrived = 0;
                state.generation += 1;
                state.phase = Phase::Filling;
                debug!(generation, "barrier tripped");
                Ok(Arrival {
                    index: 0,
                    generation,
                })
            }
            Err(err) => {
                // Everyone but the caller is still waiting on this generation.
                state.arrived -= 1;
                state.break_generation();
                Err(SyncError::BarrierActionFailed(err))
            }
        };
        self.inner.cvar.notify_all();
        result
    }

    /// Breaks the generation currently filling, failing its waiters with
    /// `BrokenBarrier`, and starts a fresh one. A trip in progress is allowed
    /// to finish first.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        while state.phase == Phase::Triggering {
            state = wait(&self.inner.cvar, state);
        }
        if state.phase == Phase::Filling {
            state.break_generation();
            self.inner.cvar.notify_all();
        }
        debug!(generation = state.generation, "barrier reset");
    }

    pub fn parties(&self) -> usize {
        self.inner.parties
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.lock().arrived
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// True while the waiters of a broken generation are still leaving.
    pub fn is_broken(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Broken { .. })
    }
}

impl fmt::Debug for RendezvousBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RendezvousBarrier")
            .field("parties", &self.inner.parties)
            .field("arrived", &state.arrived)
            .field("generation", &state.generation)
            .field("phase", &state.phase)
            .finish()
    }
}
