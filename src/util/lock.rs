//! Single-instance guard using a PID file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use derive_more::{Display, Error, From};

#[derive(Debug, Display, Error, From)]
pub enum LockError {
    #[display("Backup script is already running (PID: {_0})")]
    AlreadyRunning(#[error(ignore)] u32),
    #[display("Lock file I/O failed: {_0}")]
    #[from]
    Io(io::Error),
}

/// A held lock. The lock file is removed on [release](Self::release) or drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Take the lock at `path`, reclaiming it if the recorded process is gone.
    ///
    /// A lock file whose content isn't a PID is stale as well. Checking and
    /// writing are not atomic against a concurrent acquirer.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                if let Some(pid) = holder(&content) {
                    log::error!(target: "lock", "Backup script is already running (PID: {pid})");
                    return Err(LockError::AlreadyRunning(pid));
                }
                log::warn!(target: "lock", "Removing stale lock file");
                remove_missing_ok(path)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // unreadable content can't name a live holder
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                log::warn!(target: "lock", "Removing stale lock file");
                remove_missing_ok(path)?;
            }
            Err(e) => return Err(e.into()),
        }

        fs::write(path, process::id().to_string())?;
        log::debug!(target: "lock", "Acquired {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_missing_ok(&self.path)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_missing_ok(&self.path) {
                log::warn!(target: "lock", "Removing lock file {} failed: {e}", self.path.display());
            }
        }
    }
}

/// Remove the lock file at `path` if it names this process.
///
/// Used on interrupt, where the [LockFile] itself can't be reached.
pub fn remove_if_owned(path: &Path) -> io::Result<()> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().parse::<u32>().ok() == Some(process::id()) => {
            remove_missing_ok(path)
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// PID of a live process named by the lock content.
fn holder(content: &str) -> Option<u32> {
    let pid = content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)?;
    is_alive(pid).then_some(pid)
}

#[allow(unsafe_code)]
fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: signal 0 performs only the existence and permission checks.
    let ret = unsafe { libc::kill(pid, 0) };
    // EPERM: the process exists but belongs to someone else
    ret == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn remove_missing_ok(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}
