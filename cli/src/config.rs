use std::path::{Path, PathBuf};

use anyhow::{format_err, Context as _, Result};
use restbackup_sdk::AccessUrl;
use zeroize::Zeroizing;

/// Well-known paths for account secrets, passed explicitly instead of
/// read from globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub backup_url_file: PathBuf,
    pub management_url_file: PathBuf,
    pub passphrase_file: PathBuf,
    /// Directory for default tar snapshot files.
    pub snapshot_dir: PathBuf,
}

impl Config {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| format_err!("cannot find home directory"))?;
        Ok(Self {
            backup_url_file: home.join(".restbackup-backup-api-access-url"),
            management_url_file: home.join(".restbackup-management-api-access-url"),
            passphrase_file: home.join(".restbackup-file-encryption-passphrase"),
            snapshot_dir: home.join(".restbackup-tar"),
        })
    }
}

/// Reads a secret file, dropping surrounding whitespace and the trailing
/// newline that `echo secret > file` leaves behind.
pub fn read_secret(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let raw = Zeroizing::new(fs_err::read(path)?);
    Ok(Zeroizing::new(raw.trim_ascii().to_vec()))
}

/// Resolves the access url from an explicit `-u` value or a url file.
pub fn resolve_access_url(explicit: Option<&str>, url_file: &Path) -> Result<AccessUrl> {
    if let Some(url) = explicit {
        return url.parse();
    }
    let secret = read_secret(url_file)?;
    let url = std::str::from_utf8(&secret)
        .with_context(|| format!("{} is not valid utf-8", url_file.display()))?;
    url.parse()
        .with_context(|| format!("bad access url in {}", url_file.display()))
}
