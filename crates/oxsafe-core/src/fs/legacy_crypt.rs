//! Ad-hoc whole-file encryption with the legacy Blowfish scheme.
//!
//! Layout of an encrypted file:
//!
//! ```text
//! stuff[8] | randhash[20] | salt[8] | iv[8] | CBC block (type 0, whole plaintext)
//! ```
//!
//! [`LegacyCryptMode::LengthPrefixed`] replaces `stuff | randhash` with the
//! plaintext length as a 4-byte little-endian integer. Such files carry no
//! password verifier.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::cbc::{CbcError, CbcReader, CbcWriter, ReadOutcome, SecureBuffer};
use super::context::FileContext;
use crate::crypto::kdf::{self, SHA1_LEN, STUFF_LEN};
use crate::crypto::{BlowfishCipher, CryptoError, RandomSource};

/// Appended to the plaintext name to form the ciphertext name.
pub const CIPHERTEXT_SUFFIX: &str = ".PSF";

/// Salt length of the legacy key derivation.
pub const SALT_LEN: usize = 8;

const IV_LEN: usize = BlowfishCipher::BLOCK_SIZE;

/// How the header before the salt is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegacyCryptMode {
    /// Random prefix plus password verifier.
    #[default]
    Verified,
    /// Plaintext length only, for bit compatibility with very old files.
    LengthPrefixed,
}

#[derive(Error, Debug)]
pub enum LegacyCryptError {
    #[error("IO error for {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    /// The password verifier did not match.
    #[error("Incorrect password for {context}")]
    WrongPassword { context: FileContext },

    /// Decryption needs the ciphertext suffix to name its output.
    #[error("{path:?} does not end with .PSF")]
    MissingSuffix { path: PathBuf },

    /// The ciphertext is shorter than its header or its body is damaged.
    #[error("Corrupt encrypted file {context}: {source}")]
    Corrupt {
        #[source]
        source: CbcError,
        context: FileContext,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl LegacyCryptError {
    fn io(source: io::Error, path: &Path) -> Self {
        LegacyCryptError::Io {
            source,
            context: FileContext::new().with_path(path),
        }
    }

    fn from_cbc(source: CbcError) -> Self {
        match source {
            CbcError::Io(source) => LegacyCryptError::Io {
                source,
                context: FileContext::new(),
            },
            source => LegacyCryptError::Corrupt {
                source,
                context: FileContext::new(),
            },
        }
    }
}

/// Whole-file encrypt/decrypt.
pub struct LegacyCrypt {
    rng: Arc<dyn RandomSource>,
    mode: LegacyCryptMode,
}

impl LegacyCrypt {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            rng,
            mode: LegacyCryptMode::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: LegacyCryptMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> LegacyCryptMode {
        self.mode
    }

    /// Encrypt `path` into `path` + [`CIPHERTEXT_SUFFIX`]. Returns the output path.
    ///
    /// The output is written to a temporary file first and renamed into place
    /// on success, so a failure never leaves a partial ciphertext behind.
    #[instrument(level = "debug", skip(self, passkey), fields(path = %path.display()))]
    pub fn encrypt_file(&self, path: &Path, passkey: &SecretString) -> Result<PathBuf, LegacyCryptError> {
        let plaintext = SecureBuffer::new(fs::read(path).map_err(|e| LegacyCryptError::io(e, path))?);

        let mut out_name = path.as_os_str().to_os_string();
        out_name.push(CIPHERTEXT_SUFFIX);
        let out_path = PathBuf::from(out_name);

        let mut tmp = temp_beside(&out_path)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            self.encrypt_to(&plaintext, passkey, &mut writer)
                .map_err(|e| e.with_path(&out_path))?;
            writer.flush().map_err(|e| LegacyCryptError::io(e, &out_path))?;
        }
        tmp.persist(&out_path)
            .map_err(|e| LegacyCryptError::io(e.error, &out_path))?;

        debug!(bytes = plaintext.len(), output = %out_path.display(), "Encrypted file");
        Ok(out_path)
    }

    /// Decrypt `path` (which must end in [`CIPHERTEXT_SUFFIX`]) into the name
    /// with the suffix stripped. Returns the output path.
    ///
    /// The password is verified before the body is touched; on failure no
    /// output file is created.
    #[instrument(level = "debug", skip(self, passkey), fields(path = %path.display()))]
    pub fn decrypt_file(&self, path: &Path, passkey: &SecretString) -> Result<PathBuf, LegacyCryptError> {
        let out_path = path
            .to_str()
            .and_then(|s| s.strip_suffix(CIPHERTEXT_SUFFIX))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| LegacyCryptError::MissingSuffix {
                path: path.to_path_buf(),
            })?;

        let file = File::open(path).map_err(|e| LegacyCryptError::io(e, path))?;
        let total_len = file
            .metadata()
            .map_err(|e| LegacyCryptError::io(e, path))?
            .len();
        let plaintext = self
            .decrypt_from(BufReader::new(file), total_len, passkey)
            .map_err(|e| e.with_path(path))?;

        let mut tmp = temp_beside(&out_path)?;
        tmp.write_all(&plaintext)
            .map_err(|e| LegacyCryptError::io(e, &out_path))?;
        tmp.persist(&out_path)
            .map_err(|e| LegacyCryptError::io(e.error, &out_path))?;

        debug!(bytes = plaintext.len(), output = %out_path.display(), "Decrypted file");
        Ok(out_path)
    }

    /// Encrypt a buffer into any writer.
    pub fn encrypt_to<W: Write>(
        &self,
        plaintext: &[u8],
        passkey: &SecretString,
        out: &mut W,
    ) -> Result<(), LegacyCryptError> {
        let passkey = passkey.expose_secret().as_bytes();
        let io_err = |e| LegacyCryptError::Io {
            source: e,
            context: FileContext::new(),
        };

        match self.mode {
            LegacyCryptMode::Verified => {
                let mut stuff = [0u8; STUFF_LEN];
                self.rng.fill_bytes(&mut stuff);
                let randhash = kdf::legacy_randhash(passkey, &stuff)?;
                out.write_all(&stuff).map_err(io_err)?;
                out.write_all(&randhash).map_err(io_err)?;
            }
            LegacyCryptMode::LengthPrefixed => {
                let len = u32::try_from(plaintext.len()).map_err(|_| {
                    LegacyCryptError::from_cbc(CbcError::PayloadTooLarge(plaintext.len()))
                })?;
                out.write_all(&len.to_le_bytes()).map_err(io_err)?;
            }
        }

        let mut salt = [0u8; SALT_LEN];
        self.rng.fill_bytes(&mut salt);
        let mut iv = [0u8; IV_LEN];
        self.rng.fill_bytes(&mut iv);
        out.write_all(&salt).map_err(io_err)?;
        out.write_all(&iv).map_err(io_err)?;

        let cipher = kdf::legacy_cipher(passkey, &salt)?;
        let mut writer = CbcWriter::new(out, Box::new(cipher), &iv, Arc::clone(&self.rng));
        writer
            .write_block(0, plaintext)
            .map_err(LegacyCryptError::from_cbc)?;
        Ok(())
    }

    /// Decrypt from any reader holding exactly `total_len` bytes of ciphertext.
    pub fn decrypt_from<R: Read>(
        &self,
        mut input: R,
        total_len: u64,
        passkey: &SecretString,
    ) -> Result<SecureBuffer, LegacyCryptError> {
        let passkey = passkey.expose_secret().as_bytes();
        let mut consumed = 0u64;

        match self.mode {
            LegacyCryptMode::Verified => {
                let mut stuff = [0u8; STUFF_LEN];
                let mut stored = [0u8; SHA1_LEN];
                read_header(&mut input, &mut stuff)?;
                read_header(&mut input, &mut stored)?;
                consumed += (STUFF_LEN + SHA1_LEN) as u64;

                let expected = kdf::legacy_randhash(passkey, &stuff)?;
                if !bool::from(expected[..].ct_eq(&stored[..])) {
                    warn!("Legacy password verifier mismatch");
                    return Err(LegacyCryptError::WrongPassword {
                        context: FileContext::new(),
                    });
                }
            }
            LegacyCryptMode::LengthPrefixed => {
                let mut len = [0u8; 4];
                read_header(&mut input, &mut len)?;
                consumed += 4;
            }
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        read_header(&mut input, &mut salt)?;
        read_header(&mut input, &mut iv)?;
        consumed += (SALT_LEN + IV_LEN) as u64;

        let cipher = kdf::legacy_cipher(passkey, &salt)?;
        let mut reader = CbcReader::new(input, Box::new(cipher), &iv, consumed, Some(total_len));
        match reader.read_block().map_err(LegacyCryptError::from_cbc)? {
            ReadOutcome::Block(block) => Ok(block.data),
            ReadOutcome::EndOfStream => Err(LegacyCryptError::from_cbc(CbcError::Truncated {
                expected: IV_LEN,
                actual: 0,
            })),
        }
    }
}

impl LegacyCryptError {
    /// Attach a path to errors that were raised without one.
    #[must_use]
    fn with_path(self, path: &Path) -> Self {
        match self {
            LegacyCryptError::Io { source, context } if context.path.is_none() => {
                LegacyCryptError::Io {
                    source,
                    context: context.with_path(path),
                }
            }
            LegacyCryptError::WrongPassword { context } if context.path.is_none() => {
                LegacyCryptError::WrongPassword {
                    context: context.with_path(path),
                }
            }
            LegacyCryptError::Corrupt { source, context } if context.path.is_none() => {
                LegacyCryptError::Corrupt {
                    source,
                    context: context.with_path(path),
                }
            }
            other => other,
        }
    }
}

fn read_header<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), LegacyCryptError> {
    let got = super::cbc::read_full(input, buf).map_err(|e| LegacyCryptError::Io {
        source: e,
        context: FileContext::new(),
    })?;
    if got < buf.len() {
        return Err(LegacyCryptError::from_cbc(CbcError::Truncated {
            expected: buf.len(),
            actual: got,
        }));
    }
    Ok(())
}

fn temp_beside(target: &Path) -> Result<NamedTempFile, LegacyCryptError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir).map_err(|e| LegacyCryptError::io(e, target))
}
