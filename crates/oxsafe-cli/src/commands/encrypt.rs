//! Encrypt command - encrypt a plain file into `<file>.PSF`.
//!
//! # Examples
//!
//! ```bash
//! oxsafe encrypt notes.txt            # writes notes.txt.PSF
//! oxsafe encrypt --length-prefixed notes.txt
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use secrecy::SecretString;
use tracing::instrument;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// File to encrypt
    pub file: PathBuf,

    /// Store the plaintext length instead of a password verifier
    #[arg(long)]
    pub length_prefixed: bool,
}

#[instrument(level = "info", name = "cmd::encrypt", skip_all, fields(file = %args.file.display()))]
pub fn execute(args: &Args, passkey: &SecretString) -> Result<()> {
    let output = super::legacy_crypt(args.length_prefixed)
        .encrypt_file(&args.file, passkey)
        .with_context(|| format!("Failed to encrypt {}", args.file.display()))?;

    println!("Encrypted to: {}", output.display());
    Ok(())
}
