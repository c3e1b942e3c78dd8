use anyhow::{Result, bail};
use rpassword::read_password;
use secrecy::SecretString;
use std::io::{self, Write};

/// Prompt for the container passphrase.
/// Input is hidden and not echoed to the terminal.
///
/// For non-interactive use, pass `--password-stdin` or set `OXSAFE_PASSWORD`.
pub fn prompt_passphrase() -> Result<SecretString> {
    eprint!("Passphrase: ");
    io::stderr().flush()?;

    let passphrase = read_password()?;

    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }

    Ok(SecretString::from(passphrase))
}
