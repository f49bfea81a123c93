use thiserror::Error;

/// Failures reported by [`CountdownGate`](crate::CountdownGate) and
/// [`RendezvousBarrier`](crate::RendezvousBarrier).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("wait was cancelled")]
    Cancelled,

    #[error("wait timed out")]
    Timeout,

    #[error("barrier generation was broken")]
    BrokenBarrier,

    #[error("barrier action failed: {0}")]
    BarrierActionFailed(#[source] crate::Error),
}
