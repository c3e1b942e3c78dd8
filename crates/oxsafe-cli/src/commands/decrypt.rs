//! Decrypt command - restore `<file>` from `<file>.PSF`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use secrecy::SecretString;
use tracing::instrument;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Encrypted file (must end in .PSF)
    pub file: PathBuf,

    /// The file was written with --length-prefixed
    #[arg(long)]
    pub length_prefixed: bool,
}

#[instrument(level = "info", name = "cmd::decrypt", skip_all, fields(file = %args.file.display()))]
pub fn execute(args: &Args, passkey: &SecretString) -> Result<()> {
    let output = super::legacy_crypt(args.length_prefixed)
        .decrypt_file(&args.file, passkey)
        .with_context(|| format!("Failed to decrypt {}", args.file.display()))?;

    println!("Decrypted to: {}", output.display());
    Ok(())
}
