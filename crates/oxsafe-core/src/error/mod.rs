//! Error types for the oxsafe-core crate
//!
//! Each module owns its error enum; this module gathers them so callers
//! can match on any of them from one place.

pub use crate::config::ConfigError;
pub use crate::crypto::CryptoError;
pub use crate::format::PwsFileError;
pub use crate::fs::{CbcError, FileContext, LegacyCryptError};
pub use crate::import::{DateTimeError, HistoryError, PwhError, PwhErrorKind};
pub use crate::lock::LockError;
