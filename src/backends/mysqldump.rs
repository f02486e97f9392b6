//! Implements consistent SQL exports of a site's database using [MysqlDump].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use derive_more::{Display, Error, From};

use crate::site::DatabaseCredentials;

pub const DEFAULT_DUMP_COMMAND: &str = "mysqldump";

/// Errors on dumping a site's database.
#[derive(Debug, Display, Error, From)]
pub enum DumpError {
    /// The dump executable isn't installed or not on `PATH`.
    #[display("{_0} not available")]
    ToolUnavailable(#[error(ignore)] String),
    /// Database name or user couldn't be determined.
    #[display("database name or user missing")]
    MissingCredentials,
    /// Spawning the dump or writing its output failed.
    #[display("I/O error during database dump: {_0}")]
    #[from]
    Io(io::Error),
    /// The dump process exited unsuccessfully.
    #[display("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Dumps a database with `mysqldump` (or a compatible executable).
#[derive(Debug, Clone)]
pub struct MysqlDump {
    program: PathBuf,
}

impl Default for MysqlDump {
    fn default() -> Self {
        Self::new(DEFAULT_DUMP_COMMAND)
    }
}

impl MysqlDump {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Write a single-transaction export including routines and triggers to
    /// `destination`.
    ///
    /// Fails without spawning anything if the executable can't be found or the
    /// credentials lack a database or user. On every other failure the
    /// partially written `destination` is removed.
    pub fn dump(
        &self,
        site_name: &str,
        credentials: &DatabaseCredentials,
        destination: &Path,
    ) -> Result<(), DumpError> {
        let program = which::which(&self.program)
            .map_err(|_| DumpError::ToolUnavailable(self.program.display().to_string()))?;
        if !credentials.is_usable() {
            return Err(DumpError::MissingCredentials);
        }

        log::info!(target: "backend::mysqldump", "Create database dump of {} for {site_name}", credentials.database);
        log::trace!(target: "backend::mysqldump", "Using {credentials:?}");

        let result = self.run(&program, credentials, destination);
        if result.is_err() {
            if let Err(e) = remove_partial(destination) {
                log::warn!(target: "backend::mysqldump", "Removing partial dump {} failed: {e}", destination.display());
            }
        }

        result
    }

    fn run(
        &self,
        program: &Path,
        credentials: &DatabaseCredentials,
        destination: &Path,
    ) -> Result<(), DumpError> {
        let dump_file = File::create(destination)?;

        let mut dump_command = Command::new(program);
        dump_command
            .arg("-h")
            .arg(&credentials.host)
            .arg("-P")
            .arg(&credentials.port)
            .arg("-u")
            .arg(&credentials.user)
            .arg("--single-transaction")
            .arg("--routines")
            .arg("--triggers")
            .arg(&credentials.database)
            .stdin(Stdio::null())
            .stdout(dump_file)
            .stderr(Stdio::piped());

        // never on the command line, never prompted for
        if !credentials.password.is_empty() {
            dump_command.env("MYSQL_PWD", &credentials.password);
        }

        let dump_output = dump_command.output()?;
        let stderr = String::from_utf8_lossy(&dump_output.stderr);

        if !dump_output.status.success() {
            return Err(DumpError::Failed {
                program: self.program.display().to_string(),
                status: dump_output.status,
                stderr: stderr.trim().to_string(),
            });
        }

        // relay stderr
        if !stderr.trim().is_empty() {
            log::warn!(target: "backend::mysqldump", "{}", stderr.trim());
        }

        log::debug!(target: "backend::mysqldump", "Saved database dump at: {}", destination.display());
        Ok(())
    }
}

fn remove_partial(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}
