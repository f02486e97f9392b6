//! Library to backup the sites of a shared hosting server to S3-compatible
//! object storage.
//!
//! Every configured site is archived with its database dump, uploaded under
//! the site's key prefix and pruned down to its retention count. Operators are
//! informed through a Discord webhook.
//!
//! The backup pipeline is driven by the [`coordinator`]; the external
//! programs it runs are wrapped in [`backends`].

#![deny(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod notify;
pub mod remote;
pub mod site;
pub mod util;
