//! Implements creation of site archives using [Tar].
//!
//! The site directory is archived by the `tar` executable, so exclusion
//! patterns follow tar's own glob semantics. The uncompressed tar stream is
//! gzip-compressed while it is read, which allows every compression level
//! from `0` to `9`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{self, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;

use chrono::{DateTime, Local};
use derive_more::{Display, Error, From};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

pub const DEFAULT_TAR_COMMAND: &str = "tar";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+_\d{8}_\d{6}\.tar\.gz$").expect("archive name pattern should be valid")
});

/// Whether `file_name` has the form of an archive built by [Tar].
pub fn is_archive_name(file_name: &str) -> bool {
    ARCHIVE_NAME.is_match(file_name)
}

/// Errors on archiving a site.
#[derive(Debug, Display, Error, From)]
pub enum ArchiveError {
    /// The site root has no final path component to archive it under.
    #[display("Site root can't be archived: {}", _0.display())]
    InvalidSiteRoot(#[error(ignore)] PathBuf),
    /// Spawning tar, compressing or writing the archive failed.
    #[display("I/O error while archiving: {_0}")]
    #[from]
    Io(io::Error),
    /// Tar exited unsuccessfully. The archive is unusable.
    #[display("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// A finished archive on the local disk.
///
/// The file is removed when the [ArchiveFile] is dropped, so an archive never
/// outlives the run that created it.
#[derive(Debug)]
pub struct ArchiveFile {
    path: PathBuf,
    name: String,
    size_bytes: u64,
    created_at: DateTime<Local>,
    removed: bool,
}

impl ArchiveFile {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// File name, `{site}_{YYYYMMDD_HHMMSS}.tar.gz`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Remove the archive from the local disk.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for ArchiveFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!(target: "backend::archive", "Removed local archive {}", self.path.display());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!(target: "backend::archive", "Removing local archive {} failed: {e}", self.path.display());
            }
        }
    }
}

/// Builds gzip-compressed tar archives in a local backup directory.
#[derive(Debug, Clone)]
pub struct Tar {
    program: PathBuf,
    backup_dir: PathBuf,
}

impl Tar {
    pub fn new(program: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        let backup_dir = backup_dir.into();
        if backup_dir.is_relative() {
            log::warn!(target: "backend::archive", "backup_dir is relative: {}", backup_dir.display());
        }

        Self {
            program: program.into(),
            backup_dir,
        }
    }

    fn archive_name(site_name: &str, created_at: &DateTime<Local>) -> String {
        let timestamp = created_at.format(TIMESTAMP_FORMAT);
        format!("{site_name}_{timestamp}{ARCHIVE_SUFFIX}")
    }

    /// Archive `site_root` (as a top-level directory) plus `extra_files` (at
    /// the archive root) into `{backup_dir}/{site}_{timestamp}.tar.gz`.
    pub fn build(
        &self,
        site_name: &str,
        site_root: &Path,
        extra_files: &[PathBuf],
        exclude_patterns: &[String],
        compression_level: u32,
    ) -> Result<ArchiveFile, ArchiveError> {
        let site_root = path::absolute(site_root)?;
        let (Some(parent), Some(dir_name)) = (site_root.parent(), site_root.file_name()) else {
            return Err(ArchiveError::InvalidSiteRoot(site_root.clone()));
        };

        let created_at = Local::now();
        let name = Self::archive_name(site_name, &created_at);
        let archive_path = self.backup_dir.join(&name);
        log::info!(target: "backend::archive", "Creating archive: {name}");

        let mut tar_command = Command::new(&self.program);
        tar_command.arg("-cf").arg("-");

        // must outlive the tar process
        let exclude_file = if exclude_patterns.is_empty() {
            None
        } else {
            let exclude_file = write_exclude_file(exclude_patterns)?;
            tar_command.arg("--exclude-from").arg(exclude_file.path());
            Some(exclude_file)
        };

        tar_command.arg("-C").arg(parent).arg(dir_name);
        for extra_file in extra_files {
            if let (Some(dir), Some(file_name)) = (extra_file.parent(), extra_file.file_name()) {
                tar_command.arg("-C").arg(dir).arg(file_name);
            }
        }
        tar_command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let archive_file = File::create_new(&archive_path)?;
        let mut archive = ArchiveFile {
            path: archive_path,
            name,
            size_bytes: 0,
            created_at,
            removed: false,
        };

        // `archive` is dropped, and with it the partial file removed, on error
        archive.size_bytes = self.compress(&mut tar_command, archive_file, compression_level)?;
        drop(exclude_file);

        Ok(archive)
    }

    fn compress(
        &self,
        tar_command: &mut Command,
        archive_file: File,
        compression_level: u32,
    ) -> Result<u64, ArchiveError> {
        let mut tar_process = tar_command.spawn()?;
        log::trace!(target: "backend::archive", "Started tar process: {tar_command:?}");

        let stderr_reader = tar_process.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut captured = String::new();
                let _ = stderr.read_to_string(&mut captured);
                captured
            })
        });

        // compress and capture stdout of tar
        let copied = match tar_process.stdout.take() {
            Some(stdout) => {
                let mut reader = BufReader::new(stdout);
                let mut encoder =
                    GzEncoder::new(archive_file, Compression::new(compression_level.min(9)));
                io::copy(&mut reader, &mut encoder).and_then(|_| encoder.finish())
            }
            None => Err(io::Error::other("tar stdout not captured")),
        };

        let exit_status = tar_process.wait()?;
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !exit_status.success() {
            return Err(ArchiveError::Failed {
                program: self.program.display().to_string(),
                status: exit_status,
                stderr: stderr.trim().to_string(),
            });
        }
        let file = copied?;

        // relay stderr
        if !stderr.trim().is_empty() {
            log::warn!(target: "backend::archive", "{}", stderr.trim());
        }

        Ok(file.metadata()?.len())
    }
}

fn write_exclude_file(exclude_patterns: &[String]) -> io::Result<tempfile::NamedTempFile> {
    let mut exclude_file = tempfile::Builder::new()
        .prefix("exclude_patterns")
        .suffix(".txt")
        .tempfile()?;
    for pattern in exclude_patterns {
        writeln!(exclude_file, "{pattern}")?;
    }
    exclude_file.flush()?;

    Ok(exclude_file)
}
