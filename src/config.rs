//! Loading and validation of the backup configuration.
//!
//! The file is TOML, or YAML if its extension is `.yaml`/`.yml`:
//!
//! ```toml
//! [global]
//! discord_webhook_url = "https://discord.com/api/webhooks/..."
//!
//! [global.s3]
//! endpoint = "https://s3.example.com"
//! bucket = "backups"
//! access_key = "..."
//! secret_key = "..."
//!
//! [defaults]
//! retention_days = 7
//!
//! [[sites]]
//! name = "blog"
//! user_path = "/home/blog"
//! exclude_patterns = ["*.log", "cache/*"]
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::site::SiteSpec;

pub const DEFAULT_REGION: &str = "auto";
const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Errors on loading the configuration. All of them are fatal for a run.
#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("Configuration file not found: {}", _0.display())]
    NotFound(#[error(ignore)] PathBuf),
    #[display("Reading the configuration failed: {_0}")]
    #[from]
    Read(io::Error),
    #[display("Invalid configuration: {_0}")]
    #[from]
    Toml(toml::de::Error),
    #[display("Invalid configuration: {_0}")]
    #[from]
    Yaml(serde_yaml::Error),
    #[display("Missing required S3 configuration: {}", _0.join(", "))]
    MissingS3Fields(#[error(ignore)] Vec<&'static str>),
    #[display("No sites configured")]
    NoSites,
    #[display("Site name must be non-empty and must not contain '/': {_0:?}")]
    InvalidSiteName(#[error(ignore)] String),
    #[display("Site {_0} is configured more than once")]
    DuplicateSite(#[error(ignore)] String),
    #[display("Compression level {level} of site {site} is not within 0-9")]
    InvalidCompressionLevel { site: String, level: u32 },
    #[display("Retention of site {_0} must keep at least one day")]
    ZeroRetention(#[error(ignore)] String),
}

/// File formats of the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Yaml,
}

impl Format {
    /// Format by file extension, TOML unless it is `.yaml` or `.yml`.
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Toml,
        }
    }
}

/// Configuration as written in the file.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub s3: S3Config,
    pub discord_webhook_url: Option<String>,
}

/// S3 settings before validation; every field may be absent.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

/// Values used by sites that don't set their own.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Number of archives to keep, assuming one backup per day.
    pub retention_days: usize,
    pub backup_database: bool,
    pub compression_level: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            retention_days: 7,
            backup_database: true,
            compression_level: 6,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SiteConfig {
    pub name: String,
    /// Root directory of the site.
    pub user_path: PathBuf,
    pub retention_days: Option<usize>,
    pub backup_database: Option<bool>,
    pub compression_level: Option<u32>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Validated connection settings of the object storage.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

/// Validated configuration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub s3: S3Settings,
    /// [None] disables notifications.
    pub webhook_url: Option<String>,
    pub sites: Vec<SiteSpec>,
}

impl Settings {
    /// Read, parse and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Read(e),
        })?;
        log::info!(target: "config", "Loading configuration from {}", path.display());

        Self::parse(&contents, Format::of(path))
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str, format: Format) -> Result<Self, ConfigError> {
        let config: BackupConfig = match format {
            Format::Toml => toml::from_str(contents)?,
            Format::Yaml => serde_yaml::from_str(contents)?,
        };

        config.validate()
    }
}

impl BackupConfig {
    /// Check the configuration and resolve every site against the defaults.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let s3 = self.global.s3.validate()?;

        if self.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        let mut names = HashSet::new();
        let mut sites = Vec::with_capacity(self.sites.len());
        for site in self.sites {
            if site.name.is_empty() || site.name.contains('/') {
                return Err(ConfigError::InvalidSiteName(site.name));
            }
            if !names.insert(site.name.clone()) {
                return Err(ConfigError::DuplicateSite(site.name));
            }
            sites.push(site.resolve(&self.defaults)?);
        }

        let webhook_url = self
            .global
            .discord_webhook_url
            .filter(|url| !url.trim().is_empty());

        Ok(Settings {
            s3,
            webhook_url,
            sites,
        })
    }
}

impl S3Config {
    fn validate(self) -> Result<S3Settings, ConfigError> {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }

        let endpoint = present(self.endpoint);
        let bucket = present(self.bucket);
        let access_key = present(self.access_key);
        let secret_key = present(self.secret_key);

        match (endpoint, bucket, access_key, secret_key) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) => Ok(S3Settings {
                endpoint,
                bucket,
                access_key,
                secret_key,
                region: present(self.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            }),
            (endpoint, bucket, access_key, secret_key) => {
                let missing = [
                    ("endpoint", endpoint.is_none()),
                    ("bucket", bucket.is_none()),
                    ("access_key", access_key.is_none()),
                    ("secret_key", secret_key.is_none()),
                ]
                .into_iter()
                .filter_map(|(field, missing)| missing.then_some(field))
                .collect();
                Err(ConfigError::MissingS3Fields(missing))
            }
        }
    }
}

impl SiteConfig {
    fn resolve(self, defaults: &Defaults) -> Result<SiteSpec, ConfigError> {
        let retention_days = self.retention_days.unwrap_or(defaults.retention_days);
        if retention_days == 0 {
            return Err(ConfigError::ZeroRetention(self.name));
        }

        let compression_level = self.compression_level.unwrap_or(defaults.compression_level);
        if compression_level > MAX_COMPRESSION_LEVEL {
            return Err(ConfigError::InvalidCompressionLevel {
                site: self.name,
                level: compression_level,
            });
        }

        Ok(SiteSpec {
            name: self.name,
            root: self.user_path,
            retention_count: retention_days,
            backup_database: self.backup_database.unwrap_or(defaults.backup_database),
            compression_level,
            exclude_patterns: self.exclude_patterns,
        })
    }
}
