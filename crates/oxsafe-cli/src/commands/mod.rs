pub mod check;
pub mod decrypt;
pub mod encrypt;
pub mod info;
pub mod lock_status;
pub mod verify_date;
pub mod verify_history;

use oxsafe_core::crypto::random::os_random;
use oxsafe_core::fs::{LegacyCrypt, LegacyCryptMode};

/// Whole-file crypt helper for the encrypt/decrypt commands.
pub(crate) fn legacy_crypt(length_prefixed: bool) -> LegacyCrypt {
    let mode = if length_prefixed {
        LegacyCryptMode::LengthPrefixed
    } else {
        LegacyCryptMode::Verified
    };
    LegacyCrypt::new(os_random()).with_mode(mode)
}
