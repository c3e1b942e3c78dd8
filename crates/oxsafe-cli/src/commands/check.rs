//! Check command - verify a passphrase without reading any records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use secrecy::SecretString;
use tracing::instrument;

use oxsafe_core::check_password;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Password Safe database
    pub file: PathBuf,
}

#[instrument(level = "info", name = "cmd::check", skip_all, fields(file = %args.file.display()))]
pub fn execute(args: &Args, passkey: &SecretString) -> Result<()> {
    let version = check_password(&args.file, passkey)
        .with_context(|| format!("Passphrase check failed for {}", args.file.display()))?;

    println!("Passphrase OK (format {version})");
    Ok(())
}
