use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::RwMode;
use crate::crypto::CryptoError;
use crate::fs::{CbcError, FileContext};

#[derive(Error, Debug)]
pub enum PwsFileError {
    /// Opening for read, but nothing exists at the path.
    #[error("File not found: {path:?}")]
    FileNotFound { path: PathBuf },

    #[error("IO error for {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    /// The file does not carry the tag of the codec that was asked to read it.
    #[error("Not a file of this format: {context}")]
    NotThisFormat { context: FileContext },

    /// The file has the right tag but its structure is wrong.
    #[error("Invalid file format for {context}: {reason}")]
    InvalidFormat { reason: String, context: FileContext },

    #[error("Truncated file {context}: expected {expected} bytes, got {actual}")]
    Truncated {
        expected: usize,
        actual: usize,
        context: FileContext,
    },

    #[error("Field length {declared} exceeds the {remaining} bytes left in {context}")]
    DeclaredLengthExceedsFile {
        declared: u64,
        remaining: u64,
        context: FileContext,
    },

    #[error("Incorrect password for {context}")]
    WrongPassword { context: FileContext },

    /// **[INTEGRITY VIOLATION]** The V3 HMAC over the field data did not match.
    #[error("Integrity check failed for {context}: HMAC mismatch - possible tampering")]
    IntegrityViolation { context: FileContext },

    #[error("Read cancelled")]
    Cancelled,

    #[error("Field holds {needed} bytes but the destination buffer has {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// e.g. writing a field through a handle opened for reading.
    #[error("Operation '{operation}' is not valid on a file opened for {mode:?}")]
    WrongMode {
        operation: &'static str,
        mode: RwMode,
    },

    #[error("File is not open")]
    NotOpen,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl PwsFileError {
    #[must_use]
    pub fn io_with_context(source: io::Error, context: FileContext) -> Self {
        PwsFileError::Io { source, context }
    }

    /// Map a codec error, attaching where it happened.
    #[must_use]
    pub fn from_cbc(err: CbcError, context: FileContext) -> Self {
        match err {
            CbcError::Io(source) => PwsFileError::Io { source, context },
            CbcError::Truncated { expected, actual } => PwsFileError::Truncated {
                expected,
                actual,
                context,
            },
            CbcError::DeclaredLengthExceedsFile {
                declared,
                remaining,
                ..
            } => PwsFileError::DeclaredLengthExceedsFile {
                declared,
                remaining,
                context,
            },
            CbcError::PayloadTooLarge(len) => PwsFileError::InvalidFormat {
                reason: format!("field of {len} bytes is too large"),
                context,
            },
            CbcError::Cancelled => PwsFileError::Cancelled,
            CbcError::BufferTooSmall { needed, available } => {
                PwsFileError::BufferTooSmall { needed, available }
            }
        }
    }

    /// Whether this is a wrong-password failure (callers re-prompt).
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, PwsFileError::WrongPassword { .. })
    }

    /// Whether the file is damaged or of another version, as opposed to an
    /// I/O or password problem.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            PwsFileError::NotThisFormat { .. }
                | PwsFileError::InvalidFormat { .. }
                | PwsFileError::Truncated { .. }
                | PwsFileError::DeclaredLengthExceedsFile { .. }
                | PwsFileError::IntegrityViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbc_errors_keep_their_kind() {
        let ctx = FileContext::new().with_record(2);
        let err = PwsFileError::from_cbc(CbcError::Cancelled, ctx.clone());
        assert!(matches!(err, PwsFileError::Cancelled));

        let err = PwsFileError::from_cbc(
            CbcError::Truncated {
                expected: 16,
                actual: 3,
            },
            ctx.clone(),
        );
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("record 2"));

        let err = PwsFileError::from_cbc(CbcError::Io(io::Error::other("disk")), ctx);
        assert!(!err.is_corrupt());
    }

    #[test]
    fn test_wrong_password_is_not_corruption() {
        let err = PwsFileError::WrongPassword {
            context: FileContext::new(),
        };
        assert!(err.is_wrong_password());
        assert!(!err.is_corrupt());
    }
}
