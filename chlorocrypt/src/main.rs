use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chlorocrypt::Error;
use clap::Parser;
use zeroize::Zeroizing;

#[derive(Debug, Parser)]
#[command(
    name = "chlorocrypt",
    about = "AES CBC-mode encryption tool with HMAC-SHA-256 integrity and PBKDF2 key derivation"
)]
struct Cli {
    /// Encrypt INFILE to OUTFILE.
    #[arg(
        short = 'e',
        conflicts_with = "decrypt",
        required_unless_present = "decrypt"
    )]
    encrypt: bool,
    /// Decrypt INFILE to OUTFILE, verifying integrity.
    #[arg(short = 'd')]
    decrypt: bool,
    /// Input file; standard input when omitted or `-`.
    infile: Option<PathBuf>,
    /// Output file; standard output when omitted or `-`.
    outfile: Option<PathBuf>,
    /// File holding the passphrase; `-` reads one line from standard input.
    /// Falls back to the well-known passphrase file, then to a prompt.
    passphrase_file: Option<PathBuf>,
}

/// Path conventions, passed explicitly instead of read from globals.
struct Config {
    default_passphrase_file: Option<PathBuf>,
}

impl Config {
    fn new() -> Self {
        Self {
            default_passphrase_file: dirs::home_dir()
                .map(|home| home.join(".restbackup-file-encryption-passphrase")),
        }
    }
}

fn read_passphrase(cli_path: Option<&Path>, config: &Config) -> Result<Zeroizing<Vec<u8>>> {
    if let Some(path) = cli_path {
        if path.as_os_str() == "-" {
            let mut line = Zeroizing::new(String::new());
            io::stdin().lock().read_line(&mut line)?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            return Ok(Zeroizing::new(trimmed.as_bytes().to_vec()));
        }
        return Ok(Zeroizing::new(fs_err::read(path)?));
    }
    if let Some(path) = &config.default_passphrase_file {
        if path.exists() {
            return Ok(Zeroizing::new(fs_err::read(path)?));
        }
    }
    let value = Zeroizing::new(rpassword::prompt_password("Passphrase: ")?);
    Ok(Zeroizing::new(value.as_bytes().to_vec()))
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::new();
    let passphrase = read_passphrase(cli.passphrase_file.as_deref(), &config)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut source: Box<dyn Read> = match &cli.infile {
        Some(path) if path.as_os_str() != "-" => Box::new(fs_err::File::open(path)?),
        _ => Box::new(stdin.lock()),
    };
    let mut sink: Box<dyn Write> = match &cli.outfile {
        Some(path) if path.as_os_str() != "-" => Box::new(fs_err::File::create(path)?),
        _ => Box::new(stdout.lock()),
    };
    if cli.decrypt {
        chlorocrypt::decrypt(&passphrase, &mut source, &mut sink)?;
    } else {
        chlorocrypt::encrypt(&passphrase, &mut source, &mut sink)?;
    }
    sink.flush()?;
    Ok(())
}

/// 2 for integrity or truncation failures, 3 for any other failure.
fn failure_code(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if Error::find_in(io_err).is_some() {
                return ExitCode::from(2);
            }
        }
        if cause.downcast_ref::<Error>().is_some() {
            return ExitCode::from(2);
        }
    }
    ExitCode::from(3)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                // Usage error.
                ExitCode::from(1)
            } else {
                // --help or --version.
                ExitCode::SUCCESS
            };
        }
    };
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            failure_code(&err)
        }
    }
}
