use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use chrono::DateTime;
use restbackup_sdk::{ApiError, BackupApi, ManagementApi};
use zeroize::Zeroizing;

use crate::cli::{Cli, Command};
use crate::config::{self, Config};
use crate::passphrase;

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::new()?;
    match cli.command {
        Command::Put {
            ref local_file,
            ref remote_file,
        } => {
            let api = backup_api(&cli, &config)?;
            put_file(&api, None, local_file, remote_file.as_deref()).await
        }
        Command::EncryptAndPut {
            ref local_file,
            ref remote_file,
        } => {
            let api = backup_api(&cli, &config)?;
            let passphrase = read_passphrase(&cli, &config)?;
            put_file(&api, Some(&passphrase), local_file, remote_file.as_deref()).await
        }
        Command::Get {
            ref remote_file,
            ref local_file,
        } => {
            let api = backup_api(&cli, &config)?;
            get_file(&api, None, cli.force, remote_file, local_file.as_deref()).await
        }
        Command::GetAndDecrypt {
            ref remote_file,
            ref local_file,
        } => {
            let api = backup_api(&cli, &config)?;
            let passphrase = read_passphrase(&cli, &config)?;
            get_file(
                &api,
                Some(&passphrase),
                cli.force,
                remote_file,
                local_file.as_deref(),
            )
            .await
        }
        Command::List => {
            let api = backup_api(&cli, &config)?;
            for entry in api.list().await? {
                println!("{} {} {}", format_time(entry.createtime)?, entry.size, entry.name);
            }
            Ok(())
        }
        Command::MakeRandomPassphrase => {
            println!("{}", passphrase::generate_three().join(" "));
            Ok(())
        }
        Command::CreateBackupAccount {
            ref description,
            retain_uploads_days,
        } => {
            let api = management_api(&cli, &config)?;
            let account = api
                .create_backup_account(description, retain_uploads_days)
                .await
                .map_err(|err| {
                    hint_on_method_not_allowed(
                        err,
                        "is this a management api access url, not a backup api one?",
                    )
                })?;
            print_account(&account);
            Ok(())
        }
        Command::GetBackupAccount { ref account_id } => {
            let api = management_api(&cli, &config)?;
            print_account(&api.get_backup_account(account_id).await?);
            Ok(())
        }
        Command::DeleteBackupAccount { ref account_id } => {
            let api = management_api(&cli, &config)?;
            api.delete_backup_account(account_id).await?;
            println!("Deleted {account_id}");
            Ok(())
        }
        Command::ListBackupAccounts => {
            let api = management_api(&cli, &config)?;
            println!("account_id retain_uploads_days description");
            for account in api.list_backup_accounts().await? {
                println!(
                    "{} {} {}",
                    account.account, account.retaindays, account.description
                );
            }
            Ok(())
        }
    }
}

fn backup_api(cli: &Cli, config: &Config) -> Result<BackupApi> {
    let url_file = cli
        .backup_url_file
        .as_deref()
        .unwrap_or(&config.backup_url_file);
    BackupApi::new(config::resolve_access_url(
        cli.access_url.as_deref(),
        url_file,
    )?)
}

fn management_api(cli: &Cli, config: &Config) -> Result<ManagementApi> {
    let url_file = cli
        .management_url_file
        .as_deref()
        .unwrap_or(&config.management_url_file);
    ManagementApi::new(config::resolve_access_url(
        cli.access_url.as_deref(),
        url_file,
    )?)
}

fn read_passphrase(cli: &Cli, config: &Config) -> Result<Zeroizing<Vec<u8>>> {
    let path = cli
        .passphrase_file
        .as_deref()
        .unwrap_or(&config.passphrase_file);
    config::read_secret(path).context(
        "cannot read the passphrase file; generate one with make-random-passphrase",
    )
}

/// Remote name for a file, defaulting to its base name, always with a
/// leading '/'.
pub fn remote_name(local_file: &Path, remote_file: Option<&str>) -> Result<String> {
    let name = match remote_file {
        Some(name) => name.to_owned(),
        None => local_file
            .file_name()
            .context("local file has no name")?
            .to_str()
            .context("local file name is not valid utf-8")?
            .to_owned(),
    };
    if name.starts_with('/') {
        Ok(name)
    } else {
        Ok(format!("/{name}"))
    }
}

async fn put_file(
    api: &BackupApi,
    passphrase: Option<&[u8]>,
    local_file: &Path,
    remote_file: Option<&str>,
) -> Result<()> {
    let name = remote_name(local_file, remote_file)?;
    let file = fs_err::File::open(local_file)?;
    let result = match passphrase {
        Some(passphrase) => api.put_encrypted(&name, passphrase, file).await,
        None => api.put(&name, file).await,
    };
    result.map_err(|err| hint_on_method_not_allowed(err, "cannot overwrite an existing file"))
}

async fn get_file(
    api: &BackupApi,
    passphrase: Option<&[u8]>,
    force: bool,
    remote_file: &str,
    local_file: Option<&Path>,
) -> Result<()> {
    let name = if remote_file.starts_with('/') {
        remote_file.to_owned()
    } else {
        format!("/{remote_file}")
    };
    let local_file = match local_file {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(name.rsplit('/').next().unwrap_or(remote_file)),
    };
    if local_file.exists() && !force {
        bail!(
            "refusing to overwrite {}; pass -f to allow it",
            local_file.display()
        );
    }
    let file = fs_err::File::create(local_file)?;
    match passphrase {
        Some(passphrase) => api.get_encrypted(&name, passphrase, file).await,
        None => api.get(&name, file).await,
    }
}

fn print_account(account: &restbackup_sdk::BackupAccount) {
    println!("account_id retain_uploads_days access_url description");
    println!(
        "{} {} {} {}",
        account.account,
        account.retaindays,
        account.access_url.to_unmasked_string(),
        account.description
    );
}

pub fn format_time(timestamp: i64) -> Result<String> {
    let time = DateTime::from_timestamp(timestamp, 0)
        .with_context(|| format!("timestamp {timestamp} out of range"))?;
    Ok(time.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn hint_on_method_not_allowed(err: anyhow::Error, hint: &str) -> anyhow::Error {
    if matches!(err.downcast_ref(), Some(ApiError::MethodNotAllowed)) {
        err.context(hint.to_owned())
    } else {
        err
    }
}
