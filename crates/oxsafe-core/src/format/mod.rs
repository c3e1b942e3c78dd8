//! Password Safe container formats
//!
//! Two generations share the typed-block CBC stream from [`crate::fs::cbc`]:
//! the V3 format (Twofish, stretched key, HMAC) and the legacy 1.x/2.x format
//! (Blowfish). [`dispatch`] picks the right codec for a path.

pub mod dispatch;
pub mod error;
pub mod field;
pub mod header;
pub mod legacy;
pub mod v3;

use std::fmt;
use std::path::Path;

use secrecy::SecretString;

use crate::fs::{CancelToken, FileContext, TruncationPolicy, copy_into};

pub use dispatch::{check_password, make_pws_file, read_version};
pub use error::PwsFileError;
pub use field::Field;
pub use header::{HeaderRecord, UnknownField};
pub use legacy::LegacyFile;
pub use v3::V3File;

/// Container format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileVersion {
    /// 1.7 layout: records without a magic header record.
    Legacy17,
    /// 2.0 layout: same cipher, with a magic header record.
    Legacy20,
    V30,
    /// Not known yet; the dispatcher inspects the file.
    Unknown,
}

impl FileVersion {
    pub fn is_legacy(self) -> bool {
        matches!(self, FileVersion::Legacy17 | FileVersion::Legacy20)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileVersion::Legacy17 => "1.7",
            FileVersion::Legacy20 => "2.0",
            FileVersion::V30 => "3.0",
            FileVersion::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwMode {
    Read,
    Write,
}

/// An open container session.
///
/// The handle owns the descriptor and cipher state. Reading yields the raw
/// field stream (records end with [`field::FIELD_END`]); interpreting fields
/// into entries is up to the caller. [`close`](Self::close) is idempotent;
/// for a writer it is also what commits the new file.
pub trait VersionedFile: Send {
    /// The resolved version. For legacy reads this is refined on open.
    fn version(&self) -> FileVersion;

    fn mode(&self) -> RwMode;

    fn path(&self) -> &Path;

    /// Derive keys and read (or write) the preamble and header.
    fn open(&mut self, passkey: &SecretString) -> Result<(), PwsFileError>;

    /// Release cipher state and the descriptor. A writer finalizes and
    /// renames its temporary file over the target here.
    fn close(&mut self) -> Result<(), PwsFileError>;

    /// Next field, or `None` once the end of the stream is reached.
    fn read_field(&mut self) -> Result<Option<Field>, PwsFileError>;

    /// Append one field. Returns the encrypted bytes written.
    fn write_field(&mut self, field_type: u8, data: &[u8]) -> Result<usize, PwsFileError>;

    fn header(&self) -> &HeaderRecord;

    /// Replace the header. Must be called before `open` to affect a write.
    fn set_header(&mut self, header: HeaderRecord);

    fn set_cancel_token(&mut self, token: Option<CancelToken>);

    /// Records read so far that contained field types this engine does not know.
    fn records_with_unknown_fields(&self) -> usize;

    /// Policy applied by [`read_field_into`](Self::read_field_into).
    fn truncation_policy(&self) -> TruncationPolicy;

    fn set_truncation_policy(&mut self, policy: TruncationPolicy);

    /// Read the next field into a caller buffer.
    ///
    /// Returns the field type and bytes copied. Fields larger than `dest`
    /// fail with [`PwsFileError::BufferTooSmall`] unless the handle's
    /// [`truncation_policy`](Self::truncation_policy) allows truncation.
    fn read_field_into(&mut self, dest: &mut [u8]) -> Result<Option<(u8, usize)>, PwsFileError> {
        let Some(field) = self.read_field()? else {
            return Ok(None);
        };
        let copied = copy_into(&field.data, dest, self.truncation_policy())
            .map_err(|e| PwsFileError::from_cbc(e, FileContext::new().with_path(self.path())))?;
        Ok(Some((field.field_type, copied)))
    }
}
