pub mod cancel;
pub mod countdown_gate;
pub mod error;
pub mod rendezvous_barrier;

pub use cancel::{CancelToken, WaitOptions};
pub use countdown_gate::{CountdownGate, SignalGuard};
pub use error::SyncError;
pub use rendezvous_barrier::{Action, Arrival, RendezvousBarrier};

/// Error returned by barrier actions and the demo binaries.
///
/// The primitives themselves report the typed [`SyncError`]; anything a
/// caller-supplied callback can fail with is boxed, and `SyncError` converts
/// into it with `?`.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for barrier actions and binaries.
///
/// This is defined as a convenience.
pub type Result<T> = std::result::Result<T, Error>;
