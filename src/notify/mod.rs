//! Outcome reports sent to operators.

pub mod discord;

use std::path::PathBuf;

use derive_more::{Display, Error, From};

use crate::coordinator::RunSummary;

pub use discord::DiscordWebhook;

pub const COLOR_SUCCESS: u32 = 3066993;
pub const COLOR_WARNING: u32 = 16776960;
pub const COLOR_DELETED: u32 = 10181046;

/// Events worth telling an operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The configured site directory doesn't exist.
    SiteMissing { site: String, path: PathBuf },
    /// An archive was uploaded.
    BackupSucceeded {
        site: String,
        file: String,
        size_bytes: u64,
    },
    /// An archive was removed by retention.
    BackupDeleted { site: String, file: String },
    /// End of run.
    Summary(RunSummary),
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Self::SiteMissing { .. } => "⚠️ **Backup Warning**",
            Self::BackupSucceeded { .. } => "✅ **Backup Successful**",
            Self::BackupDeleted { .. } => "🗑️ **Old Backup Deleted**",
            Self::Summary(summary) if summary.failed == 0 => "📊 **Backup Complete**",
            Self::Summary(_) => "⚠️ **Backup Complete with Errors**",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::SiteMissing { site, path } => {
                format!("Site path not found: {} for {site}", path.display())
            }
            Self::BackupSucceeded {
                site,
                file,
                size_bytes,
            } => {
                let size_mb = *size_bytes as f64 / (1024.0 * 1024.0);
                format!("Site: {site}\nSize: {size_mb:.1} MB\nFile: {file}")
            }
            Self::BackupDeleted { site, file } => format!("Site: {site}\nFile: {file}"),
            Self::Summary(summary) => format!(
                "**Backup Summary**\nSites processed: {}\nSuccessful: {}\nFailed: {}",
                summary.processed, summary.succeeded, summary.failed
            ),
        }
    }

    pub fn color(&self) -> u32 {
        match self {
            Self::SiteMissing { .. } => COLOR_WARNING,
            Self::BackupSucceeded { .. } => COLOR_SUCCESS,
            Self::BackupDeleted { .. } => COLOR_DELETED,
            Self::Summary(summary) if summary.failed == 0 => COLOR_SUCCESS,
            Self::Summary(_) => COLOR_WARNING,
        }
    }
}

/// Errors on delivering a [Notification].
#[derive(Debug, Display, Error, From)]
pub enum NotifyError {
    #[display("Request failed: {_0}")]
    #[from]
    Http(reqwest::Error),
    #[display("Webhook returned {_0}")]
    Status(#[error(ignore)] reqwest::StatusCode),
}

/// A channel operators receive [Notification]s on.
pub trait Notifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Best-effort [send](Self::send): failures are only logged.
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.send(&notification) {
            log::warn!(target: "notify", "Failed to send notification: {e}");
        }
    }
}

/// Drops every notification. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

impl Notifier for Disabled {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        log::debug!(target: "notify", "Notifications disabled, dropping: {}", notification.title());
        Ok(())
    }
}
