//! Run-level helpers: locking, interrupts, logging and remote retention.

pub mod lock;
pub mod logging;
pub mod retention;
pub mod signal;

pub use lock::{LockError, LockFile};
pub use retention::{PruneReport, Retention};
pub use signal::CancellationToken;
