//! Client library for the RestBackup HTTP APIs.
//!
//! [`BackupApi`] talks to a backup account: upload, download and list
//! files, optionally passing them through the `chlorocrypt` stream filters
//! so plaintext never reaches the wire. [`ManagementApi`] talks to a
//! management account and administers backup accounts. Both are addressed
//! by an [`AccessUrl`] carrying the account credentials.
//!
//! Transient transport failures are retried with exponential backoff;
//! errors reported by the service itself surface as [`ApiError`].

pub mod access_url;
pub mod api;
pub mod management;
mod util;

pub use access_url::AccessUrl;
pub use api::{ApiError, BackupApi, FileEntry};
pub use management::{BackupAccount, ManagementApi};
