#![forbid(unsafe_code)]

//! V3 container codec.
//!
//! ```text
//! "PWS3" | salt[32] | iter u32 LE | H(P')[32] | B1B2[32] | B3B4[32] | IV[16]
//!        | CBC(Twofish, K) header fields .. 0xff | record fields ..
//!        | "PWS3-EOFPWS3-EOF" | HMAC-SHA256(L, all field data)[32]
//! ```
//!
//! `P'` is the stretched passkey, `K` and `L` are random per-file keys stored
//! Twofish-ECB encrypted under `P'` in `B1B2` and `B3B4`.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ring::hmac;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use super::error::PwsFileError;
use super::field::{FIELD_END, Field, is_known_record_field};
use super::header::{HDR_END, HeaderRecord, V3_MAJOR, V3_MINOR};
use super::{FileVersion, RwMode, VersionedFile};
use crate::crypto::kdf::{self, MIN_HASH_ITERATIONS, SHA256_LEN};
use crate::crypto::{BlockCipher, RandomSource, TwofishCipher};
use crate::fs::cbc::read_full;
use crate::fs::{CancelToken, CbcReader, CbcWriter, FileContext, ReadOutcome, TruncationPolicy};

pub const V3_TAG: &[u8; 4] = b"PWS3";

/// Raw (unencrypted) block that ends the field stream.
pub const V3_EOF: &[u8; 16] = b"PWS3-EOFPWS3-EOF";

pub const SALT_LEN: usize = 32;

const KEY_LEN: usize = 32;
const HMAC_LEN: usize = 32;
const IV_LEN: usize = TwofishCipher::BLOCK_SIZE;

/// Bytes needed to check a password: tag, salt, iterations, verifier.
const VERIFIER_END: usize = 4 + SALT_LEN + 4 + SHA256_LEN;

/// Everything before the first encrypted block.
pub const PREAMBLE_LEN: usize = VERIFIER_END + 2 * KEY_LEN + IV_LEN;

/// Whether the file starts with the V3 tag.
pub fn is_v3_file(path: &Path) -> Result<bool, PwsFileError> {
    let mut file = open_existing(path)?;
    let mut tag = [0u8; 4];
    let got = read_full(&mut file, &mut tag).map_err(|e| io_error(e, path))?;
    Ok(got == tag.len() && &tag == V3_TAG)
}

/// Verify `passkey` against the preamble without decrypting anything.
///
/// Fails with [`PwsFileError::NotThisFormat`] if the file has no V3 tag.
#[instrument(level = "debug", skip(passkey), fields(path = %path.display()))]
pub fn check_password(path: &Path, passkey: &SecretString) -> Result<(), PwsFileError> {
    let mut file = open_existing(path)?;
    let mut buf = [0u8; VERIFIER_END];
    let got = read_full(&mut file, &mut buf).map_err(|e| io_error(e, path))?;
    check_tag(&buf, got, path)?;
    if got < VERIFIER_END {
        return Err(PwsFileError::Truncated {
            expected: VERIFIER_END,
            actual: got,
            context: FileContext::new().with_path(path),
        });
    }
    let preamble = Preamble::parse_verifier(&buf);
    verify_passkey(passkey, &preamble, path)?;
    Ok(())
}

struct Preamble {
    salt: [u8; SALT_LEN],
    iterations: u32,
    verifier: [u8; SHA256_LEN],
    b1b2: [u8; KEY_LEN],
    b3b4: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Preamble {
    fn parse_verifier(buf: &[u8]) -> Self {
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[4..4 + SALT_LEN]);
        let mut iterations = [0u8; 4];
        iterations.copy_from_slice(&buf[4 + SALT_LEN..8 + SALT_LEN]);
        let mut verifier = [0u8; SHA256_LEN];
        verifier.copy_from_slice(&buf[8 + SALT_LEN..VERIFIER_END]);
        Self {
            salt,
            iterations: u32::from_le_bytes(iterations),
            verifier,
            b1b2: [0; KEY_LEN],
            b3b4: [0; KEY_LEN],
            iv: [0; IV_LEN],
        }
    }

    fn parse(buf: &[u8; PREAMBLE_LEN]) -> Self {
        let mut preamble = Self::parse_verifier(buf);
        let keys = &buf[VERIFIER_END..];
        preamble.b1b2.copy_from_slice(&keys[..KEY_LEN]);
        preamble.b3b4.copy_from_slice(&keys[KEY_LEN..2 * KEY_LEN]);
        preamble.iv.copy_from_slice(&keys[2 * KEY_LEN..]);
        preamble
    }
}

fn check_tag(buf: &[u8], got: usize, path: &Path) -> Result<(), PwsFileError> {
    if got < V3_TAG.len() || &buf[..V3_TAG.len()] != V3_TAG {
        return Err(PwsFileError::NotThisFormat {
            context: FileContext::new().with_path(path),
        });
    }
    Ok(())
}

fn verify_passkey(
    passkey: &SecretString,
    preamble: &Preamble,
    path: &Path,
) -> Result<Zeroizing<[u8; SHA256_LEN]>, PwsFileError> {
    if preamble.iterations < MIN_HASH_ITERATIONS {
        return Err(PwsFileError::InvalidFormat {
            reason: format!(
                "hash iteration count {} is below the minimum of {MIN_HASH_ITERATIONS}",
                preamble.iterations
            ),
            context: FileContext::new().with_path(path),
        });
    }
    let stretched = kdf::stretch_key(
        passkey.expose_secret().as_bytes(),
        &preamble.salt,
        preamble.iterations,
    )?;
    let verifier = kdf::stretched_key_verifier(&stretched);
    if !bool::from(verifier[..].ct_eq(&preamble.verifier[..])) {
        warn!(path = %path.display(), "V3 password verifier mismatch");
        return Err(PwsFileError::WrongPassword {
            context: FileContext::new().with_path(path),
        });
    }
    Ok(stretched)
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

/// Twofish-ECB over a two-block key slot.
fn crypt_key_slot(cipher: &TwofishCipher, slot: &mut [u8; KEY_LEN], encrypt: bool) {
    for block in slot.chunks_mut(TwofishCipher::BLOCK_SIZE) {
        if encrypt {
            cipher.encrypt_block(block);
        } else {
            cipher.decrypt_block(block);
        }
    }
}

struct Reader {
    cbc: CbcReader<BufReader<File>>,
    hmac: Option<hmac::Context>,
    record: usize,
    record_has_unknown: bool,
    done: bool,
}

struct Writer {
    cbc: CbcWriter<BufWriter<NamedTempFile>>,
    hmac: hmac::Context,
}

enum State {
    Closed,
    Reading(Box<Reader>),
    Writing(Box<Writer>),
}

/// An open (or openable) V3 file.
pub struct V3File {
    path: PathBuf,
    mode: RwMode,
    rng: Arc<dyn RandomSource>,
    iterations: u32,
    header: HeaderRecord,
    cancel: Option<CancelToken>,
    truncation: TruncationPolicy,
    unknown_records: usize,
    state: State,
}

impl V3File {
    pub fn new(path: impl Into<PathBuf>, mode: RwMode, rng: Arc<dyn RandomSource>) -> Self {
        Self {
            path: path.into(),
            mode,
            rng,
            iterations: MIN_HASH_ITERATIONS,
            header: HeaderRecord::new_v3(),
            cancel: None,
            truncation: TruncationPolicy::default(),
            unknown_records: 0,
            state: State::Closed,
        }
    }

    /// Key-stretch work factor used when writing.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
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
        check_tag(&buf, got, &self.path)?;
        if got < PREAMBLE_LEN {
            return Err(PwsFileError::Truncated {
                expected: PREAMBLE_LEN,
                actual: got,
                context: self.context(),
            });
        }
        let preamble = Preamble::parse(&buf);
        let stretched = verify_passkey(passkey, &preamble, &self.path)?;

        let key_cipher = TwofishCipher::new(&stretched[..])?;
        let mut record_key = Zeroizing::new(preamble.b1b2);
        crypt_key_slot(&key_cipher, &mut record_key, false);
        let mut hmac_key = Zeroizing::new(preamble.b3b4);
        crypt_key_slot(&key_cipher, &mut hmac_key, false);

        let cipher = TwofishCipher::new(&record_key[..])?;
        let mut cbc = CbcReader::new(
            input,
            Box::new(cipher),
            &preamble.iv,
            PREAMBLE_LEN as u64,
            Some(file_len),
        )
        .with_terminal(V3_EOF);
        cbc.set_cancel_token(self.cancel.clone());
        let mut hmac = hmac::Context::with_key(&hmac::Key::new(hmac::HMAC_SHA256, &hmac_key[..]));

        let mut header = HeaderRecord {
            iterations: preamble.iterations,
            ..HeaderRecord::default()
        };
        loop {
            let block = match cbc
                .read_block()
                .map_err(|e| PwsFileError::from_cbc(e, self.context()))?
            {
                ReadOutcome::Block(block) => block,
                ReadOutcome::EndOfStream => {
                    return Err(PwsFileError::InvalidFormat {
                        reason: "header block is not terminated".to_string(),
                        context: self.context(),
                    });
                }
            };
            hmac.update(&block.data);
            if block.block_type == HDR_END {
                break;
            }
            header
                .apply_field(block.block_type, &block.data)
                .map_err(|e| PwsFileError::InvalidFormat {
                    reason: e.to_string(),
                    context: self.context().with_field_type(block.block_type),
                })?;
        }

        debug!(
            major = header.major,
            minor = header.minor,
            iterations = header.iterations,
            unknown_header_fields = header.unknown_fields.len(),
            "Opened V3 file for reading"
        );
        self.header = header;
        self.unknown_records = 0;
        self.state = State::Reading(Box::new(Reader {
            cbc,
            hmac: Some(hmac),
            record: 0,
            record_has_unknown: false,
            done: false,
        }));
        Ok(())
    }

    fn open_write(&mut self, passkey: &SecretString) -> Result<(), PwsFileError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(e, &self.path))?;
        let mut out = BufWriter::new(tmp);

        let mut salt = [0u8; SALT_LEN];
        self.rng.fill_bytes(&mut salt);
        let stretched = kdf::stretch_key(passkey.expose_secret().as_bytes(), &salt, self.iterations)?;
        let verifier = kdf::stretched_key_verifier(&stretched);

        let mut record_key = Zeroizing::new([0u8; KEY_LEN]);
        self.rng.fill_bytes(&mut record_key[..]);
        let mut hmac_key = Zeroizing::new([0u8; KEY_LEN]);
        self.rng.fill_bytes(&mut hmac_key[..]);
        let mut iv = [0u8; IV_LEN];
        self.rng.fill_bytes(&mut iv);

        let key_cipher = TwofishCipher::new(&stretched[..])?;
        let mut b1b2 = *record_key;
        crypt_key_slot(&key_cipher, &mut b1b2, true);
        let mut b3b4 = *hmac_key;
        crypt_key_slot(&key_cipher, &mut b3b4, true);

        let preamble: [&[u8]; 7] = [
            V3_TAG,
            &salt,
            &self.iterations.to_le_bytes(),
            &verifier,
            &b1b2,
            &b3b4,
            &iv,
        ];
        for part in preamble {
            out.write_all(part).map_err(|e| io_error(e, &self.path))?;
        }

        if self.header.major == 0 {
            self.header.major = V3_MAJOR;
            self.header.minor = V3_MINOR;
        }
        if self.header.file_uuid == [0; 16] {
            self.header.file_uuid = uuid::Uuid::new_v4().into_bytes();
        }
        self.header.iterations = self.iterations;
        self.header.when_last_saved = chrono::Utc::now().timestamp();
        self.header.what_last_saved = format!("oxsafe V{}", env!("CARGO_PKG_VERSION"));

        let cipher = TwofishCipher::new(&record_key[..])?;
        let mut cbc = CbcWriter::new(out, Box::new(cipher), &iv, Arc::clone(&self.rng));
        let mut hmac = hmac::Context::with_key(&hmac::Key::new(hmac::HMAC_SHA256, &hmac_key[..]));

        for (field_type, data) in self.header.to_fields() {
            hmac.update(&data);
            cbc.write_block(field_type, &data)
                .map_err(|e| PwsFileError::from_cbc(e, self.context().with_field_type(field_type)))?;
        }
        cbc.write_block(HDR_END, &[])
            .map_err(|e| PwsFileError::from_cbc(e, self.context()))?;

        debug!(iterations = self.iterations, "Opened V3 file for writing");
        self.state = State::Writing(Box::new(Writer { cbc, hmac }));
        Ok(())
    }

    fn finish_read(&mut self) -> Result<(), PwsFileError> {
        let context = self.context();
        let State::Reading(reader) = &mut self.state else {
            return Ok(());
        };
        reader.done = true;

        if !reader.cbc.reached_terminal() {
            return Err(PwsFileError::Truncated {
                expected: V3_EOF.len(),
                actual: 0,
                context,
            });
        }

        let mut stored = [0u8; HMAC_LEN];
        let got = read_full(reader.cbc.get_mut(), &mut stored).map_err(|e| io_error(e, &self.path))?;
        if got < HMAC_LEN {
            return Err(PwsFileError::Truncated {
                expected: HMAC_LEN,
                actual: got,
                context,
            });
        }
        let Some(hmac) = reader.hmac.take() else {
            return Ok(());
        };
        let computed = hmac.sign();
        if !bool::from(computed.as_ref().ct_eq(&stored[..])) {
            warn!(path = %self.path.display(), "V3 HMAC mismatch");
            return Err(PwsFileError::IntegrityViolation { context });
        }
        trace!(records = reader.record, "V3 HMAC verified");
        Ok(())
    }
}

impl VersionedFile for V3File {
    fn version(&self) -> FileVersion {
        FileVersion::V30
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
                trace!(path = %self.path.display(), "Closed V3 reader");
                Ok(())
            }
            State::Writing(writer) => {
                let Writer { cbc, hmac } = *writer;
                let mut out = cbc.into_inner();
                let tag = hmac.sign();
                out.write_all(V3_EOF)
                    .and_then(|()| out.write_all(tag.as_ref()))
                    .map_err(|e| io_error(e, &self.path))?;
                let tmp = out
                    .into_inner()
                    .map_err(|e| io_error(e.into_error(), &self.path))?;
                tmp.as_file()
                    .sync_all()
                    .map_err(|e| io_error(e, &self.path))?;
                tmp.persist(&self.path)
                    .map_err(|e| io_error(e.error, &self.path))?;
                debug!(path = %self.path.display(), "Committed V3 file");
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
        if reader.done {
            return Ok(None);
        }

        let outcome = reader
            .cbc
            .read_block()
            .map_err(|e| PwsFileError::from_cbc(e, context.with_record(reader.record)))?;
        let block = match outcome {
            ReadOutcome::Block(block) => block,
            ReadOutcome::EndOfStream => {
                self.finish_read()?;
                return Ok(None);
            }
        };

        if let Some(hmac) = reader.hmac.as_mut() {
            hmac.update(&block.data);
        }
        if block.block_type == FIELD_END {
            if reader.record_has_unknown {
                self.unknown_records += 1;
            }
            reader.record_has_unknown = false;
            reader.record += 1;
        } else if !is_known_record_field(block.block_type) {
            trace!(field_type = block.block_type, record = reader.record, "Unknown record field");
            reader.record_has_unknown = true;
        }

        Ok(Some(Field {
            field_type: block.block_type,
            data: block.data,
        }))
    }

    fn write_field(&mut self, field_type: u8, data: &[u8]) -> Result<usize, PwsFileError> {
        let context = self.context().with_field_type(field_type);
        let writer = match &mut self.state {
            State::Writing(writer) => writer,
            State::Closed => return Err(PwsFileError::NotOpen),
            State::Reading(_) => {
                return Err(PwsFileError::WrongMode {
                    operation: "write_field",
                    mode: self.mode,
                });
            }
        };
        writer.hmac.update(data);
        writer
            .cbc
            .write_block(field_type, data)
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
        self.unknown_records
    }
}

impl fmt::Debug for V3File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V3File")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("iterations", &self.iterations)
            .field("open", &self.is_open())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::field::{FIELD_PASSWORD, FIELD_TITLE, FIELD_UUID};
    use crate::format::header::UnknownField;
    use rand_chacha::ChaCha20Rng;
    use rand_chacha::rand_core::SeedableRng;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn rng() -> Arc<dyn RandomSource> {
        Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(3)))
    }

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn write_sample(path: &Path, header: HeaderRecord, records: &[&[(u8, &[u8])]]) {
        let mut file = V3File::new(path, RwMode::Write, rng());
        file.set_header(header);
        file.open(&pw("correct horse")).unwrap();
        for record in records {
            for (ty, data) in *record {
                file.write_field(*ty, data).unwrap();
            }
            file.write_field(FIELD_END, &[]).unwrap();
        }
        file.close().unwrap();
    }

    fn read_all(file: &mut V3File) -> Vec<(u8, Vec<u8>)> {
        let mut fields = Vec::new();
        while let Some(field) = file.read_field().unwrap() {
            fields.push((field.field_type, field.data.to_vec()));
        }
        fields
    }

    #[test]
    fn test_write_then_read_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(
            &path,
            HeaderRecord::new_v3(),
            &[&[(FIELD_UUID, &[1u8; 16]), (FIELD_TITLE, b"mail"), (FIELD_PASSWORD, b"s3cret")]],
        );

        let mut file = V3File::new(&path, RwMode::Read, rng());
        file.open(&pw("correct horse")).unwrap();
        let fields = read_all(&mut file);
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[1], (FIELD_TITLE, b"mail".to_vec()));
        assert_eq!(fields[3].0, FIELD_END);
        assert_eq!(file.header().major, V3_MAJOR);
        assert_eq!(file.header().iterations, MIN_HASH_ITERATIONS);
        assert_ne!(file.header().file_uuid, [0; 16]);
        assert_eq!(file.records_with_unknown_fields(), 0);
        file.close().unwrap();
        file.close().unwrap();
    }

    #[test]
    fn test_unknown_header_fields_survive_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        let header = HeaderRecord {
            db_name: "Work".into(),
            unknown_fields: vec![UnknownField {
                field_type: 0x60,
                data: vec![9, 8, 7, 0, 255],
            }],
            ..HeaderRecord::new_v3()
        };
        write_sample(&path, header, &[]);

        let mut file = V3File::new(&path, RwMode::Read, rng());
        file.open(&pw("correct horse")).unwrap();
        let read_back = file.header().clone();
        assert!(read_all(&mut file).is_empty());
        assert_eq!(read_back.db_name, "Work");
        assert_eq!(read_back.unknown_fields[0].data, vec![9, 8, 7, 0, 255]);

        let copy = dir.path().join("copy.psafe3");
        write_sample(&copy, read_back.clone(), &[]);
        let mut file = V3File::new(&copy, RwMode::Read, rng());
        file.open(&pw("correct horse")).unwrap();
        assert_eq!(file.header().unknown_fields, read_back.unknown_fields);
        assert_eq!(file.header().file_uuid, read_back.file_uuid);
    }

    #[test]
    fn test_records_with_unknown_fields_are_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(
            &path,
            HeaderRecord::new_v3(),
            &[
                &[(FIELD_TITLE, b"a"), (0x70, b"x"), (0x71, b"y")],
                &[(FIELD_TITLE, b"b")],
                &[(0x7f, b"z")],
            ],
        );
        let mut file = V3File::new(&path, RwMode::Read, rng());
        file.open(&pw("correct horse")).unwrap();
        read_all(&mut file);
        assert_eq!(file.records_with_unknown_fields(), 2);
    }

    #[test]
    fn test_wrong_password() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(&path, HeaderRecord::new_v3(), &[]);

        let mut file = V3File::new(&path, RwMode::Read, rng());
        assert!(matches!(
            file.open(&pw("wrong")),
            Err(PwsFileError::WrongPassword { .. })
        ));
        assert!(matches!(
            check_password(&path, &pw("wrong")),
            Err(PwsFileError::WrongPassword { .. })
        ));
        check_password(&path, &pw("correct horse")).unwrap();
    }

    #[test]
    fn test_tampered_field_fails_integrity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(&path, HeaderRecord::new_v3(), &[&[(FIELD_TITLE, &[0x41; 64])]]);

        let mut bytes = std::fs::read(&path).unwrap();
        let hmac_start = bytes.len() - HMAC_LEN;
        bytes[hmac_start] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let mut file = V3File::new(&path, RwMode::Read, rng());
        file.open(&pw("correct horse")).unwrap();
        let err = loop {
            match file.read_field() {
                Ok(Some(_)) => {}
                Ok(None) => panic!("tampering not detected"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, PwsFileError::IntegrityViolation { .. }));
    }

    #[test]
    fn test_missing_terminator_is_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(&path, HeaderRecord::new_v3(), &[&[(FIELD_TITLE, b"t")]]);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - HMAC_LEN - V3_EOF.len()]).unwrap();

        let mut file = V3File::new(&path, RwMode::Read, rng());
        file.open(&pw("correct horse")).unwrap();
        file.read_field().unwrap();
        file.read_field().unwrap();
        assert!(matches!(
            file.read_field(),
            Err(PwsFileError::Truncated { .. })
        ));
    }

    #[test]
    fn test_not_v3_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.dat");
        std::fs::write(&path, b"definitely not a safe").unwrap();
        assert!(!is_v3_file(&path).unwrap());
        assert!(matches!(
            check_password(&path, &pw("x")),
            Err(PwsFileError::NotThisFormat { .. })
        ));
    }

    #[test]
    fn test_cancel_token_stops_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(&path, HeaderRecord::new_v3(), &[&[(FIELD_TITLE, b"t")]]);

        let token = CancelToken::new();
        let mut file = V3File::new(&path, RwMode::Read, rng());
        file.set_cancel_token(Some(token.clone()));
        file.open(&pw("correct horse")).unwrap();
        token.cancel();
        assert!(matches!(file.read_field(), Err(PwsFileError::Cancelled)));
    }

    #[test]
    fn test_mode_is_enforced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(&path, HeaderRecord::new_v3(), &[]);

        let mut file = V3File::new(&path, RwMode::Read, rng());
        assert!(matches!(file.read_field(), Err(PwsFileError::NotOpen)));
        file.open(&pw("correct horse")).unwrap();
        assert!(matches!(
            file.write_field(FIELD_TITLE, b"x"),
            Err(PwsFileError::WrongMode { .. })
        ));
    }

    #[test]
    fn test_dropped_writer_leaves_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.psafe3");
        write_sample(&path, HeaderRecord::new_v3(), &[&[(FIELD_TITLE, b"keep")]]);
        let before = std::fs::read(&path).unwrap();

        {
            let mut file = V3File::new(&path, RwMode::Write, rng());
            file.open(&pw("other")).unwrap();
            file.write_field(FIELD_TITLE, b"discard").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let file = V3File::new("x.psafe3", RwMode::Read, rng());
        assert!(format!("{file:?}").contains("REDACTED"));
    }
}
