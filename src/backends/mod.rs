//! Backend modules wrapping the external programs a site backup runs.
//!
//! Currently the following backends are implemented:
//!
//! - [MysqlDump]: Consistent SQL export of a site's MySQL/MariaDB database.
//! - [Tar]: Gzip-compressed archive of a site directory and its dump.

pub mod archive;
pub mod mysqldump;

pub use archive::{ArchiveError, ArchiveFile, Tar};
pub use mysqldump::{DumpError, MysqlDump};
