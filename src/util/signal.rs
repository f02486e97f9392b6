//! Interrupt handling.
//!
//! SIGINT and SIGTERM cancel the run: the lock file is removed and the
//! process exits with [EXIT_INTERRUPTED](crate::coordinator::EXIT_INTERRUPTED)
//! right away. Sites are additionally checked against the
//! [CancellationToken] between each other.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::coordinator::EXIT_INTERRUPTED;
use crate::util::lock;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static RECEIVED: AtomicBool = AtomicBool::new(false);

/// Shared flag telling a run to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

extern "C" fn on_signal(_signum: libc::c_int) {
    RECEIVED.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers cancelling `token`.
///
/// The handlers only set a flag; a watcher thread does the cleanup and
/// exits the process.
#[allow(unsafe_code)]
pub fn install(lock_path: PathBuf, token: CancellationToken) {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        if unsafe { libc::signal(signum, handler) } == libc::SIG_ERR {
            log::warn!(target: "coordinator", "Installing handler for signal {signum} failed");
        }
    }

    thread::spawn(move || loop {
        if RECEIVED.load(Ordering::SeqCst) {
            token.cancel();
            log::warn!(target: "coordinator", "Received interrupt signal, cleaning up...");
            if let Err(e) = lock::remove_if_owned(&lock_path) {
                log::warn!(target: "lock", "Removing lock file {} failed: {e}", lock_path.display());
            }
            log::logger().flush();
            process::exit(EXIT_INTERRUPTED.into());
        }
        thread::sleep(POLL_INTERVAL);
    });
}
