//! Version probing and codec construction.

use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, instrument};

use super::error::PwsFileError;
use super::legacy::{self, LegacyFile};
use super::v3::{self, V3File};
use super::{FileVersion, RwMode, VersionedFile};
use crate::config::EngineConfig;
use crate::crypto::RandomSource;

/// Detect the on-disk version of an existing file.
///
/// Anything without the V3 tag is reported as [`FileVersion::Legacy20`];
/// the two legacy sub-versions read the same way and are only told apart
/// after decryption.
pub fn read_version(path: &Path) -> Result<FileVersion, PwsFileError> {
    if v3::is_v3_file(path)? {
        Ok(FileVersion::V30)
    } else {
        Ok(FileVersion::Legacy20)
    }
}

/// Build the codec for `path`.
///
/// With `hint = Unknown` a read inspects the file; a write defaults to V3.
/// An explicit hint is used as-is without touching the file. The returned
/// handle is not yet open and carries the configured truncation policy.
#[instrument(level = "debug", skip(config, rng), fields(path = %path.display()))]
pub fn make_pws_file(
    path: &Path,
    hint: FileVersion,
    mode: RwMode,
    config: &EngineConfig,
    rng: Arc<dyn RandomSource>,
) -> Result<(Box<dyn VersionedFile>, FileVersion), PwsFileError> {
    if mode == RwMode::Read && !path.exists() {
        return Err(PwsFileError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let version = match (hint, mode) {
        (FileVersion::Unknown, RwMode::Read) => read_version(path)?,
        (FileVersion::Unknown, RwMode::Write) => FileVersion::V30,
        (explicit, _) => explicit,
    };

    let mut file: Box<dyn VersionedFile> = if version == FileVersion::V30 {
        Box::new(V3File::new(path, mode, rng).with_iterations(config.hash_iterations))
    } else {
        Box::new(LegacyFile::new(path, mode, version, rng))
    };
    file.set_truncation_policy(config.truncation_policy());
    debug!(%version, ?mode, truncation = ?file.truncation_policy(), "Selected codec");
    Ok((file, version))
}

/// Check `passkey` against whatever format `path` holds.
///
/// The V3 check runs first; the legacy check only runs when the file is
/// structurally not V3, so a V3 file with a wrong password is reported as
/// [`PwsFileError::WrongPassword`], never as a legacy mismatch.
#[instrument(level = "debug", skip(passkey), fields(path = %path.display()))]
pub fn check_password(path: &Path, passkey: &SecretString) -> Result<FileVersion, PwsFileError> {
    match v3::check_password(path, passkey) {
        Ok(()) => Ok(FileVersion::V30),
        Err(PwsFileError::NotThisFormat { .. }) => {
            legacy::check_password(path, passkey).map(|()| FileVersion::Legacy20)
        }
        Err(e) => Err(e),
    }
}
