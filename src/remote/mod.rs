//! Object storage the archives are shipped to.
//!
//! The backup pipeline only talks to a [RemoteStore]; [S3Store] implements
//! it for S3-compatible services.

pub mod s3;
mod sigv4;

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};

pub use s3::S3Store;

/// An object in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full key, e.g. `blog/blog_20240101_030000.tar.gz`.
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

impl RemoteObject {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key
            .rsplit_once('/')
            .map_or(self.key.as_str(), |(_, name)| name)
    }
}

/// Errors of [RemoteStore] operations.
#[derive(Debug, Display, Error, From)]
pub enum RemoteError {
    /// The configured endpoint is not a usable base URL.
    #[display("Invalid object storage endpoint: {_0}")]
    InvalidEndpoint(#[error(ignore)] String),
    /// Reading the local file failed.
    #[display("I/O error: {_0}")]
    #[from]
    Io(io::Error),
    /// The request couldn't be sent or its response not read.
    #[display("Request failed: {_0}")]
    #[from]
    Http(reqwest::Error),
    /// The service answered with an error status.
    #[display("{method} {key} returned {status}: {body}")]
    Status {
        method: &'static str,
        key: String,
        status: reqwest::StatusCode,
        body: String,
    },
    /// A listing response wasn't understood.
    #[display("Malformed listing response: {_0}")]
    #[from]
    Listing(quick_xml::DeError),
}

/// Operations the backup pipeline needs from object storage.
///
/// Endpoint, bucket and credentials are fixed when the store is created.
pub trait RemoteStore {
    /// Upload a local file, silently replacing an existing object at `key`.
    fn upload(&self, local_path: &Path, key: &str) -> Result<(), RemoteError>;

    /// All objects whose key starts with `prefix`. Pagination is resolved
    /// before returning.
    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Delete the object at `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), RemoteError>;
}
