//! A site is one independently backed-up web application.

pub mod credentials;

use std::path::{Path, PathBuf};

pub use credentials::{extract, CredentialsPatch, DatabaseCredentials};

/// Resolved, immutable description of a site for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    /// Unique name, used in archive names and as the remote key prefix.
    pub name: String,
    /// Site root on the local filesystem.
    pub root: PathBuf,
    /// Number of most recent remote archives to keep.
    pub retention_count: usize,
    pub backup_database: bool,
    /// Gzip level, `0..=9`.
    pub compression_level: u32,
    /// Globs handed to tar's `--exclude-from`.
    pub exclude_patterns: Vec<String>,
}

impl SiteSpec {
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Object key prefix all archives of this site live under.
    pub fn remote_prefix(&self) -> String {
        format!("{}/", self.name)
    }

    /// Remote object key of an archive file name.
    pub fn remote_key(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> SiteSpec {
        SiteSpec {
            name: "blog".into(),
            root: PathBuf::from("/home/blog"),
            retention_count: 7,
            backup_database: true,
            compression_level: 6,
            exclude_patterns: Vec::new(),
        }
    }

    #[test]
    fn remote_keys_are_prefixed_by_site_name() {
        let site = blog();
        assert_eq!(site.remote_prefix(), "blog/");
        assert_eq!(
            site.remote_key("blog_20240101_000000.tar.gz"),
            "blog/blog_20240101_000000.tar.gz"
        );
    }
}
