//! Command-line tools for the RestBackup service: `restbackup-cli` for
//! one-off uploads, downloads and account management, and `restbackup-tar`
//! for incremental tar backups with optional encryption.

use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter};

pub mod cli;
pub mod commands;
pub mod config;
pub mod passphrase;
pub mod tar;

/// Logs go to stderr so command output can be piped.
pub fn setup_logger() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}
