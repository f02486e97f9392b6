//! Count-based pruning of a site's archives in the remote store.

use crate::backends::archive::ARCHIVE_SUFFIX;
use crate::notify::{Notification, Notifier};
use crate::remote::{RemoteObject, RemoteStore};

/// Outcome of [Retention::prune].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Keys of removed archives, oldest first.
    pub deleted: Vec<String>,
    /// Keys whose deletion failed.
    pub failed: Vec<String>,
}

/// Returns the archives of `site` that exceed `keep`, oldest first.
///
/// Only keys of the form `{site}/{site}_*.tar.gz` are considered, so objects
/// of other sites sharing the prefix are never selected. Archives are ordered
/// by their modification time, not by the timestamp in their name.
pub fn expired(site: &str, objects: Vec<RemoteObject>, keep: usize) -> Vec<RemoteObject> {
    let archive_prefix = format!("{site}/{site}_");

    let mut archives: Vec<_> = objects
        .into_iter()
        .filter(|object| {
            object.key.starts_with(&archive_prefix) && object.key.ends_with(ARCHIVE_SUFFIX)
        })
        .collect();
    archives.sort_by_key(|object| object.last_modified);

    let excess = archives.len().saturating_sub(keep);
    archives.truncate(excess);
    archives
}

/// Keeps the `N` most recent archives of a site in the remote store.
///
/// `N` is derived from the configured retention days, assuming one backup
/// per day.
pub struct Retention<'a> {
    store: &'a dyn RemoteStore,
    notifier: &'a dyn Notifier,
}

impl<'a> Retention<'a> {
    pub fn new(store: &'a dyn RemoteStore, notifier: &'a dyn Notifier) -> Self {
        Self { store, notifier }
    }

    /// Delete all but the `keep` most recent archives of `site`.
    ///
    /// Every deletion is notified once. A failing deletion is logged and the
    /// remaining ones are still attempted.
    pub fn prune(&self, site: &str, keep: usize) -> PruneReport {
        log::info!(target: "retention", "Cleaning up old backups for {site} (keeping {keep})");
        let mut report = PruneReport::default();

        let objects = match self.store.list(&format!("{site}/")) {
            Ok(objects) => objects,
            Err(e) => {
                log::warn!(target: "retention", "Error during cleanup for {site}: {e}");
                return report;
            }
        };

        for object in expired(site, objects, keep) {
            let file = object.file_name().to_string();
            match self.store.delete(&object.key) {
                Ok(()) => {
                    log::info!(target: "retention", "Deleted old backup: {file}");
                    self.notifier.notify(Notification::BackupDeleted {
                        site: site.to_string(),
                        file,
                    });
                    report.deleted.push(object.key);
                }
                Err(e) => {
                    log::warn!(target: "retention", "Failed to delete old backup {file}: {e}");
                    report.failed.push(object.key);
                }
            }
        }

        report
    }
}
