//! Drives a backup run from lock acquisition to the summary notification.
//!
//! ```text
//! LOCK → CONFIG → CLIENTS → per site (DATABASE? → ARCHIVE → UPLOAD → PRUNE → CLEANUP) → SUMMARY → UNLOCK
//! ```
//!
//! Errors of a single site only fail that site. Everything before the first
//! site is fatal for the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::backends::archive::is_archive_name;
use crate::backends::{ArchiveError, MysqlDump, Tar};
use crate::config::{ConfigError, Settings};
use crate::notify::{Disabled, DiscordWebhook, Notification, Notifier};
use crate::remote::{RemoteError, RemoteStore, S3Store};
use crate::site::{self, SiteSpec};
use crate::util::{CancellationToken, LockError, LockFile, Retention};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Prefix of the per-site staging directories in the backup directory.
const STAGING_PREFIX: &str = "backup_";

/// Outcome counts of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, succeeded: bool) {
        self.processed += 1;
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Errors failing a single site.
#[derive(Debug, Display, Error, From)]
pub enum SiteError {
    #[display("Site path not found: {}", _0.display())]
    MissingPath(#[error(ignore)] PathBuf),
    #[display("Creating the staging directory failed: {_0}")]
    #[from]
    Staging(io::Error),
    #[display("Creating the archive failed: {_0}")]
    #[from]
    Archive(ArchiveError),
    #[display("Upload failed: {_0}")]
    Upload(RemoteError),
}

/// Errors aborting the whole run.
#[derive(Debug, Display, Error, From)]
pub enum RunError {
    #[display("{_0}")]
    #[from]
    Lock(LockError),
    #[display("Preparing the backup directory failed: {_0}")]
    #[from]
    Io(io::Error),
    #[display("{_0}")]
    #[from]
    Config(ConfigError),
    #[display("Failed to initialize S3 client: {_0}")]
    Client(RemoteError),
    #[display("Interrupted")]
    Interrupted,
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FATAL,
        }
    }
}

/// Paths and external programs of a run, as given on the command line.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config_path: PathBuf,
    /// Local staging area for archives.
    pub backup_dir: PathBuf,
    pub lock_path: PathBuf,
    pub dump_program: PathBuf,
    pub tar_program: PathBuf,
}

/// Remote collaborators of a run.
pub struct Clients {
    pub store: Box<dyn RemoteStore>,
    pub notifier: Box<dyn Notifier>,
}

/// Build the S3 store and the webhook notifier from `settings`.
///
/// Without a usable webhook, notifications are disabled.
pub fn connect(settings: &Settings) -> Result<Clients, RunError> {
    let store = S3Store::new(&settings.s3).map_err(RunError::Client)?;
    log::info!(target: "coordinator", "S3 client initialized");

    let notifier: Box<dyn Notifier> = match &settings.webhook_url {
        Some(url) => match DiscordWebhook::new(url.as_str()) {
            Ok(webhook) => Box::new(webhook),
            Err(e) => {
                log::warn!(target: "notify", "Discord webhook unusable, notifications disabled: {e}");
                Box::new(Disabled)
            }
        },
        None => {
            log::warn!(target: "notify", "Discord webhook URL not configured, notifications disabled");
            Box::new(Disabled)
        }
    };

    Ok(Clients {
        store: Box::new(store),
        notifier,
    })
}

/// Perform a complete run.
///
/// `connect` builds the remote collaborators once the configuration is
/// loaded. The lock is released however the run ends.
pub fn execute<F>(
    ctx: &RunContext,
    token: &CancellationToken,
    connect: F,
) -> Result<RunSummary, RunError>
where
    F: FnOnce(&Settings) -> Result<Clients, RunError>,
{
    log::info!(target: "coordinator", "Starting backup process");
    let lock = LockFile::acquire(&ctx.lock_path)?;

    let result = execute_locked(ctx, token, connect);
    if let Err(e) = &result {
        log::error!(target: "coordinator", "{e}");
    }

    if let Err(e) = lock.release() {
        log::warn!(target: "lock", "Removing lock file {} failed: {e}", ctx.lock_path.display());
    }

    result
}

fn execute_locked<F>(
    ctx: &RunContext,
    token: &CancellationToken,
    connect: F,
) -> Result<RunSummary, RunError>
where
    F: FnOnce(&Settings) -> Result<Clients, RunError>,
{
    fs::create_dir_all(&ctx.backup_dir)?;
    sweep_leftovers(&ctx.backup_dir);
    let settings = Settings::load(&ctx.config_path)?;
    let clients = connect(&settings)?;

    Coordinator::new(ctx, clients.store.as_ref(), clients.notifier.as_ref())
        .run(&settings.sites, token)
}

/// Remove archives and staging directories an interrupted run left behind.
///
/// Only called while holding the lock, so no other run owns them.
fn sweep_leftovers(backup_dir: &Path) {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!(target: "coordinator", "Listing {} failed: {e}", backup_dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        let removed = if file_type.is_file() && is_archive_name(&name) {
            fs::remove_file(entry.path())
        } else if file_type.is_dir() && name.starts_with(STAGING_PREFIX) {
            fs::remove_dir_all(entry.path())
        } else {
            continue;
        };

        match removed {
            Ok(()) => log::warn!(target: "coordinator", "Removed leftover of an interrupted run: {name}"),
            Err(e) => log::warn!(target: "coordinator", "Removing leftover {name} failed: {e}"),
        }
    }
}

/// Runs the per-site pipeline against a store and notifier.
pub struct Coordinator<'a> {
    backup_dir: &'a Path,
    store: &'a dyn RemoteStore,
    notifier: &'a dyn Notifier,
    dumper: MysqlDump,
    tar: Tar,
}

impl<'a> Coordinator<'a> {
    pub fn new(ctx: &'a RunContext, store: &'a dyn RemoteStore, notifier: &'a dyn Notifier) -> Self {
        Self {
            backup_dir: &ctx.backup_dir,
            store,
            notifier,
            dumper: MysqlDump::new(&ctx.dump_program),
            tar: Tar::new(&ctx.tar_program, &ctx.backup_dir),
        }
    }

    /// Back up `sites` one after another and send the summary.
    ///
    /// `token` is checked before every site; a cancelled run sends no
    /// summary.
    pub fn run(&self, sites: &[SiteSpec], token: &CancellationToken) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();

        for site in sites {
            if token.is_cancelled() {
                log::warn!(target: "coordinator", "Run cancelled before site {}", site.name);
                return Err(RunError::Interrupted);
            }

            let result = self.backup_site(site);
            if let Err(e) = &result {
                log::error!(target: "coordinator", "Failed to backup site {}: {e}", site.name);
            }
            summary.record(result.is_ok());
        }

        if summary.failed == 0 {
            log::info!(target: "coordinator", "Backup process completed successfully");
        } else {
            log::warn!(target: "coordinator", "Backup process completed with {} failures", summary.failed);
        }
        self.notifier.notify(Notification::Summary(summary));

        Ok(summary)
    }

    /// Run all stages of one site. The local archive and staging directory
    /// are gone when this returns.
    pub fn backup_site(&self, site: &SiteSpec) -> Result<(), SiteError> {
        log::info!(target: "coordinator", "Starting backup for site: {}", site.name);

        if !site.root().is_dir() {
            log::warn!(target: "coordinator", "Site path not found: {} for {}", site.root().display(), site.name);
            self.notifier.notify(Notification::SiteMissing {
                site: site.name.clone(),
                path: site.root.clone(),
            });
            return Err(SiteError::MissingPath(site.root.clone()));
        }

        let staging = tempfile::Builder::new()
            .prefix(&format!("{STAGING_PREFIX}{}_", site.name))
            .tempdir_in(self.backup_dir)?;

        let mut extra_files = Vec::new();
        if site.backup_database {
            extra_files.extend(self.dump_database(site, staging.path()));
        }

        let archive = self.tar.build(
            &site.name,
            site.root(),
            &extra_files,
            &site.exclude_patterns,
            site.compression_level,
        )?;
        log::info!(
            target: "coordinator",
            "Backup created: {} ({:.1} MB) at {}",
            archive.name(),
            archive.size_mb(),
            archive.created_at().format("%Y-%m-%d %H:%M:%S")
        );

        let key = site.remote_key(archive.name());
        log::info!(target: "coordinator", "Uploading to S3: {key}");
        self.store
            .upload(archive.path(), &key)
            .map_err(SiteError::Upload)?;
        log::info!(target: "coordinator", "Upload successful: {key}");

        self.notifier.notify(Notification::BackupSucceeded {
            site: site.name.clone(),
            file: archive.name().to_string(),
            size_bytes: archive.size_bytes(),
        });

        Retention::new(self.store, self.notifier).prune(&site.name, site.retention_count);

        let name = archive.name().to_string();
        match archive.remove() {
            Ok(()) => log::info!(target: "coordinator", "Local backup removed: {name}"),
            Err(e) => log::warn!(target: "coordinator", "Removing local backup {name} failed: {e}"),
        }

        Ok(())
    }

    /// Dump the site's database into `staging`. Any problem only skips the
    /// database.
    fn dump_database(&self, site: &SiteSpec, staging: &Path) -> Option<PathBuf> {
        log::info!(target: "coordinator", "Backing up database for {}", site.name);

        let credentials = site::extract(site.root());
        let destination = staging.join(format!("{}_database.sql", site.name));

        match self.dumper.dump(&site.name, &credentials, &destination) {
            Ok(()) => {
                log::info!(target: "coordinator", "Database backup completed for {}", site.name);
                Some(destination)
            }
            Err(e) => {
                log::warn!(target: "coordinator", "Database backup skipped for {}: {e}", site.name);
                None
            }
        }
    }
}
