//! Legacy (1.x / 2.x) container codec.
//!
//! ```text
//! stuff[8] | randhash[20] | salt[8] | IV[8] | CBC(Blowfish) fields ..
//! ```
//!
//! 2.x files open with a magic record whose name is [`V2_MARKER`], whose
//! password is `"2.0"` and whose notes carry the preference string. 1.x
//! files start straight with entry data. The field stream has no terminator
//! and no MAC; it simply ends with the file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, trace, warn};

use super::error::PwsFileError;
use super::field::{FIELD_NAME, FIELD_NOTES, FIELD_PASSWORD, Field};
use super::header::HeaderRecord;
use super::{FileVersion, RwMode, VersionedFile};
use crate::crypto::kdf::{self, SHA1_LEN, STUFF_LEN};
use crate::crypto::{BlowfishCipher, RandomSource};
use crate::fs::cbc::read_full;
use crate::fs::legacy_crypt::SALT_LEN;
use crate::fs::{CancelToken, CbcReader, CbcWriter, FileContext, ReadOutcome, TruncationPolicy};

/// Name of the magic first record of a 2.x file.
pub const V2_MARKER: &str =
    " !!!Version 2 File Format!!! Please upgrade to PasswordSafe 2.0 or later";

/// Password of the magic first record of a 2.x file.
pub const V2_PASSWORD: &str = "2.0";

const IV_LEN: usize = BlowfishCipher::BLOCK_SIZE;
const VERIFIER_END: usize = STUFF_LEN + SHA1_LEN;
const PREAMBLE_LEN: usize = VERIFIER_END + SALT_LEN + IV_LEN;

/// Verify `passkey` against the stored randhash.
///
/// Files too short to hold a verifier are reported as
/// [`PwsFileError::NotThisFormat`].
#[instrument(level = "debug", skip(passkey), fields(path = %path.display()))]
pub fn check_password(path: &Path, passkey: &SecretString) -> Result<(), PwsFileError> {
    let mut file = open_existing(path)?;
    let mut buf = [0u8; VERIFIER_END];
    let got = read_full(&mut file, &mut buf).map_err(|e| io_error(e, path))?;
    if got < VERIFIER_END {
        return Err(PwsFileError::NotThisFormat {
            context: FileContext::new().with_path(path),
        });
    }
    verify_passkey(passkey, &buf, path)
}

fn verify_passkey(passkey: &SecretString, buf: &[u8], path: &Path) -> Result<(), PwsFileError> {
    let mut stuff = [0u8; STUFF_LEN];
    stuff.copy_from_slice(&buf[..STUFF_LEN]);
    let expected = kdf::legacy_randhash(passkey.expose_secret().as_bytes(), &stuff)?;
    if !bool::from(expected[..].ct_eq(&buf[STUFF_LEN..VERIFIER_END])) {
        warn!(path = %path.display(), "Legacy password verifier mismatch");
        return Err(PwsFileError::WrongPassword {
            context: FileContext::new().with_path(path),
        });
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<File, PwsFileError> {
    File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            PwsFileError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            io_error(e, path)
        }
    })
}

fn io_error(source: io::Error, path: &Path) -> PwsFileError {
    PwsFileError::io_with_context(source, FileContext::new().with_path(path))
}

struct Reader {
    cbc: CbcReader<BufReader<File>>,
    /// First field of a 1.x file, read while probing for the magic record.
    pending: Option<Field>,
    done: bool,
}

enum State {
    Closed,
    Reading(Box<Reader>),
    Writing(Box<CbcWriter<BufWriter<NamedTempFile>>>),
}

pub struct LegacyFile {
    path: PathBuf,
    mode: RwMode,
    version: FileVersion,
    rng: Arc<dyn RandomSource>,
    header: HeaderRecord,
    cancel: Option<CancelToken>,
    truncation: TruncationPolicy,
    state: State,
}

impl LegacyFile {
    /// `version` selects what is written; reads detect it. `Unknown` means 2.0.
    pub fn new(
        path: impl Into<PathBuf>,
        mode: RwMode,
        version: FileVersion,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        let version = match version {
            FileVersion::Legacy17 => FileVersion::Legacy17,
            _ => FileVersion::Legacy20,
        };
        Self {
            path: path.into(),
            mode,
            version,
            rng,
            header: HeaderRecord::default(),
            cancel: None,
            truncation: TruncationPolicy::default(),
            state: State::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    fn context(&self) -> FileContext {
        FileContext::new().with_path(&self.path)
    }

    fn open_read(&mut self, passkey: &SecretString) -> Result<(), PwsFileError> {
        let file = open_existing(&self.path)?;
        let file_len = file
            .metadata()
            .map_err(|e| io_error(e, &self.path))?
            .len();
        let mut input = BufReader::new(file);

        let mut buf = [0u8; PREAMBLE_LEN];
        let got = read_full(&mut input, &mut buf).map_err(|e| io_error(e, &self.path))?;
        if got < VERIFIER_END {
            return Err(PwsFileError::NotThisFormat {
                context: self.context(),
            });
        }
        verify_passkey(passkey, &buf, &self.path)?;
        if got < PREAMBLE_LEN {
            return Err(PwsFileError::Truncated {
                expected: PREAMBLE_LEN,
                actual: got,
                context: self.context(),
            });
        }

        let salt = &buf[VERIFIER_END..VERIFIER_END + SALT_LEN];
        let iv = &buf[VERIFIER_END + SALT_LEN..];
        let cipher = kdf::legacy_cipher(passkey.expose_secret().as_bytes(), salt)?;
        let mut cbc = CbcReader::new(
            input,
            Box::new(cipher),
            iv,
            PREAMBLE_LEN as u64,
            Some(file_len),
        );
        cbc.set_cancel_token(self.cancel.clone());

        let mut header = HeaderRecord::default();
        let mut pending = None;
        let mut done = false;
        match next_field(&mut cbc, self.context())? {
            Some(first) if first.data.as_slice() == V2_MARKER.as_bytes() => {
                let password = next_field(&mut cbc, self.context())?;
                if password.as_ref().map(|f| f.data.as_slice()) != Some(V2_PASSWORD.as_bytes()) {
                    return Err(PwsFileError::InvalidFormat {
                        reason: "2.0 magic record has an unexpected version".to_string(),
                        context: self.context().with_record(0),
                    });
                }
                if let Some(prefs) = next_field(&mut cbc, self.context())? {
                    header.prefs = String::from_utf8_lossy(&prefs.data).into_owned();
                }
                header.major = 2;
                header.minor = 0;
                self.version = FileVersion::Legacy20;
            }
            Some(first) => {
                header.major = 1;
                header.minor = 7;
                pending = Some(first);
                self.version = FileVersion::Legacy17;
            }
            None => {
                header.major = 1;
                header.minor = 7;
                done = true;
                self.version = FileVersion::Legacy17;
            }
        }

        debug!(version = %self.version, "Opened legacy file for reading");
        self.header = header;
        self.state = State::Reading(Box::new(Reader { cbc, pending, done }));
        Ok(())
    }

    fn open_write(&mut self, passkey: &SecretString) -> Result<(), PwsFileError> {
        let passkey = passkey.expose_secret().as_bytes();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(e, &self.path))?;
        let mut out = BufWriter::new(tmp);

        let mut stuff = [0u8; STUFF_LEN];
        self.rng.fill_bytes(&mut stuff);
        let randhash = kdf::legacy_randhash(passkey, &stuff)?;
        let mut salt = [0u8; SALT_LEN];
        self.rng.fill_bytes(&mut salt);
        let mut iv = [0u8; IV_LEN];
        self.rng.fill_bytes(&mut iv);

        for part in [&stuff[..], &randhash[..], &salt[..], &iv[..]] {
            out.write_all(part).map_err(|e| io_error(e, &self.path))?;
        }

        let cipher = kdf::legacy_cipher(passkey, &salt)?;
        let mut cbc = CbcWriter::new(out, Box::new(cipher), &iv, Arc::clone(&self.rng));

        if self.version == FileVersion::Legacy20 {
            let magic = [
                (FIELD_NAME, V2_MARKER.as_bytes()),
                (FIELD_PASSWORD, V2_PASSWORD.as_bytes()),
                (FIELD_NOTES, self.header.prefs.as_bytes()),
            ];
            for (field_type, data) in magic {
                cbc.write_block(field_type, data)
                    .map_err(|e| PwsFileError::from_cbc(e, self.context().with_record(0)))?;
            }
            self.header.major = 2;
            self.header.minor = 0;
        } else {
            self.header.major = 1;
            self.header.minor = 7;
        }

        debug!(version = %self.version, "Opened legacy file for writing");
        self.state = State::Writing(Box::new(cbc));
        Ok(())
    }
}

fn next_field(
    cbc: &mut CbcReader<BufReader<File>>,
    context: FileContext,
) -> Result<Option<Field>, PwsFileError> {
    match cbc
        .read_block()
        .map_err(|e| PwsFileError::from_cbc(e, context))?
    {
        ReadOutcome::Block(block) => Ok(Some(Field {
            field_type: block.block_type,
            data: block.data,
        })),
        ReadOutcome::EndOfStream => Ok(None),
    }
}

impl VersionedFile for LegacyFile {
    fn version(&self) -> FileVersion {
        self.version
    }

    fn mode(&self) -> RwMode {
        self.mode
    }

    fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(level = "debug", skip(self, passkey), fields(path = %self.path.display(), mode = ?self.mode))]
    fn open(&mut self, passkey: &SecretString) -> Result<(), PwsFileError> {
        self.close()?;
        match self.mode {
            RwMode::Read => self.open_read(passkey),
            RwMode::Write => self.open_write(passkey),
        }
    }

    fn close(&mut self) -> Result<(), PwsFileError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => Ok(()),
            State::Reading(_) => {
                trace!(path = %self.path.display(), "Closed legacy reader");
                Ok(())
            }
            State::Writing(cbc) => {
                let tmp = cbc
                    .into_inner()
                    .into_inner()
                    .map_err(|e| io_error(e.into_error(), &self.path))?;
                tmp.as_file()
                    .sync_all()
                    .map_err(|e| io_error(e, &self.path))?;
                tmp.persist(&self.path)
                    .map_err(|e| io_error(e.error, &self.path))?;
                debug!(path = %self.path.display(), "Committed legacy file");
                Ok(())
            }
        }
    }

    fn read_field(&mut self) -> Result<Option<Field>, PwsFileError> {
        let context = self.context();
        let reader = match &mut self.state {
            State::Reading(reader) => reader,
            State::Closed => return Err(PwsFileError::NotOpen),
            State::Writing(_) => {
                return Err(PwsFileError::WrongMode {
                    operation: "read_field",
                    mode: self.mode,
                });
            }
        };
        if let Some(field) = reader.pending.take() {
            return Ok(Some(field));
        }
        if reader.done {
            return Ok(None);
        }
        let field = next_field(&mut reader.cbc, context)?;
        if field.is_none() {
            reader.done = true;
        }
        Ok(field)
    }

    fn write_field(&mut self, field_type: u8, data: &[u8]) -> Result<usize, PwsFileError> {
        let context = self.context().with_field_type(field_type);
        let cbc = match &mut self.state {
            State::Writing(cbc) => cbc,
            State::Closed => return Err(PwsFileError::NotOpen),
            State::Reading(_) => {
                return Err(PwsFileError::WrongMode {
                    operation: "write_field",
                    mode: self.mode,
                });
            }
        };
        cbc.write_block(field_type, data)
            .map_err(|e| PwsFileError::from_cbc(e, context))
    }

    fn header(&self) -> &HeaderRecord {
        &self.header
    }

    fn set_header(&mut self, header: HeaderRecord) {
        self.header = header;
    }

    fn set_cancel_token(&mut self, token: Option<CancelToken>) {
        if let State::Reading(reader) = &mut self.state {
            reader.cbc.set_cancel_token(token.clone());
        }
        self.cancel = token;
    }

    fn truncation_policy(&self) -> TruncationPolicy {
        self.truncation
    }

    fn set_truncation_policy(&mut self, policy: TruncationPolicy) {
        self.truncation = policy;
    }

    fn records_with_unknown_fields(&self) -> usize {
        0
    }
}

impl fmt::Debug for LegacyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("version", &self.version)
            .field("open", &self.is_open())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}
