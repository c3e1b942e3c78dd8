#![deny(unsafe_code)]

mod auth;
mod commands;
mod config;
mod exit_code;
mod output;

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use oxsafe_core::error::{DateTimeError, LegacyCryptError, LockError, PwhError, PwsFileError};

use crate::commands::lock_status::LockedError;
use crate::commands::{check, decrypt, encrypt, info, lock_status, verify_date, verify_history};
use crate::config::Config;

/// Command-line interface for Password Safe databases
#[derive(Parser)]
#[command(name = "oxsafe")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Show database information
    oxsafe info ~/pwsafe.psafe3

    # Check a passphrase (pipe it from a secret manager)
    echo \"$SECRET\" | oxsafe --password-stdin check ~/pwsafe.psafe3

    # Is anyone editing the database?
    oxsafe lock-status ~/pwsafe.psafe3

    # Validate an exported password history
    oxsafe verify-history \"10301 1970-01-01 00:00:00 0003 abc\"
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Passphrase (insecure, prefer --password-stdin or OXSAFE_PASSWORD)
    #[arg(long, env = "OXSAFE_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read passphrase from stdin (single line)
    #[arg(long, conflicts_with = "password", global = true)]
    password_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ============ Container commands (require a passphrase) ============

    /// Encrypt a file to <FILE>.PSF
    Encrypt(encrypt::Args),

    /// Decrypt a .PSF file
    Decrypt(decrypt::Args),

    /// Verify the passphrase of a database
    Check(check::Args),

    /// Show database information
    Info(info::Args),

    // ============ Standalone commands ============

    /// Report whether a database is locked by another session
    LockStatus(lock_status::Args),

    /// Validate a date-time string
    VerifyDate(verify_date::Args),

    /// Validate an exported password-history field
    VerifyHistory(verify_history::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = Config::load()?;

    match &cli.command {
        Commands::Encrypt(args) => encrypt::execute(args, &get_passphrase(&cli)?),
        Commands::Decrypt(args) => decrypt::execute(args, &get_passphrase(&cli)?),
        Commands::Check(args) => check::execute(args, &get_passphrase(&cli)?),
        Commands::Info(args) => info::execute(args, &get_passphrase(&cli)?, &config.engine),
        Commands::LockStatus(args) => lock_status::execute(args, &config.engine),
        Commands::VerifyDate(args) => verify_date::execute(args),
        Commands::VerifyHistory(args) => verify_history::execute(args),
    }
}

/// Get passphrase using the priority chain:
/// 1. --password-stdin
/// 2. --password / OXSAFE_PASSWORD
/// 3. Interactive prompt
fn get_passphrase(cli: &Cli) -> Result<SecretString> {
    if cli.password_stdin {
        read_password_from_stdin()
    } else if let Some(ref password) = cli.password {
        Ok(SecretString::from(password.clone()))
    } else {
        auth::prompt_passphrase()
    }
}

/// Read password from stdin (first line only)
fn read_password_from_stdin() -> Result<SecretString> {
    if io::stdin().is_terminal() {
        anyhow::bail!(
            "--password-stdin requires password to be piped in.\n\
             Example: echo \"$SECRET\" | oxsafe --password-stdin check ~/pwsafe.psafe3"
        );
    }

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    let trimmed = password.trim_end_matches(['\n', '\r']).len();
    password.truncate(trimmed);

    if password.is_empty() {
        anyhow::bail!("Password from stdin is empty");
    }

    Ok(SecretString::from(password))
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<LockedError>().is_some() {
            return exit_code::LOCKED;
        }

        if let Some(file_err) = cause.downcast_ref::<PwsFileError>() {
            match file_err {
                PwsFileError::WrongPassword { .. } => return exit_code::AUTH_FAILED,
                PwsFileError::FileNotFound { .. } => return exit_code::NOT_FOUND,
                PwsFileError::Cancelled => return exit_code::CANCELLED,
                PwsFileError::Io { source, .. } => return io_exit_code(source),
                _ if file_err.is_corrupt() => return exit_code::INVALID_DATA,
                _ => {}
            }
        }

        if let Some(crypt_err) = cause.downcast_ref::<LegacyCryptError>() {
            match crypt_err {
                LegacyCryptError::WrongPassword { .. } => return exit_code::AUTH_FAILED,
                LegacyCryptError::Corrupt { .. } => return exit_code::INVALID_DATA,
                LegacyCryptError::MissingSuffix { .. } => return exit_code::USAGE_ERROR,
                LegacyCryptError::Io { source, .. } => return io_exit_code(source),
                LegacyCryptError::Crypto(_) => {}
            }
        }

        if let Some(LockError::Io { source, .. }) = cause.downcast_ref::<LockError>() {
            return io_exit_code(source);
        }

        if cause.downcast_ref::<DateTimeError>().is_some()
            || cause.downcast_ref::<PwhError>().is_some()
        {
            return exit_code::INVALID_DATA;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            let code = io_exit_code(io_err);
            if code != exit_code::GENERAL_ERROR {
                return code;
            }
        }
    }

    exit_code::GENERAL_ERROR
}

fn io_exit_code(err: &io::Error) -> u8 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => exit_code::PERMISSION_DENIED,
        io::ErrorKind::NotFound => exit_code::NOT_FOUND,
        io::ErrorKind::Interrupted => exit_code::CANCELLED,
        _ => exit_code::GENERAL_ERROR,
    }
}
