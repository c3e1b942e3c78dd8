//! Record field types and the owned field value handed to callers.

use std::fmt;

use crate::fs::SecureBuffer;

pub const FIELD_NAME: u8 = 0x00;
pub const FIELD_UUID: u8 = 0x01;
pub const FIELD_GROUP: u8 = 0x02;
pub const FIELD_TITLE: u8 = 0x03;
pub const FIELD_USER: u8 = 0x04;
pub const FIELD_NOTES: u8 = 0x05;
pub const FIELD_PASSWORD: u8 = 0x06;
pub const FIELD_CTIME: u8 = 0x07;
pub const FIELD_PMTIME: u8 = 0x08;
pub const FIELD_ATIME: u8 = 0x09;
pub const FIELD_XTIME: u8 = 0x0a;
pub const FIELD_RMTIME: u8 = 0x0c;
pub const FIELD_URL: u8 = 0x0d;
pub const FIELD_AUTOTYPE: u8 = 0x0e;
pub const FIELD_PWHIST: u8 = 0x0f;
pub const FIELD_POLICY: u8 = 0x10;
pub const FIELD_XTIME_INTERVAL: u8 = 0x11;
pub const FIELD_RUNCMD: u8 = 0x12;
pub const FIELD_DCA: u8 = 0x13;
pub const FIELD_EMAIL: u8 = 0x14;
pub const FIELD_PROTECTED: u8 = 0x15;
pub const FIELD_SYMBOLS: u8 = 0x16;
pub const FIELD_SHIFT_DCA: u8 = 0x17;
pub const FIELD_POLICY_NAME: u8 = 0x18;
pub const FIELD_KB_SHORTCUT: u8 = 0x19;

/// Terminates a record (and the V3 header).
pub const FIELD_END: u8 = 0xff;

/// Whether a V3 record field type is understood by this engine.
///
/// Records carrying anything else are counted so that callers can warn
/// before a save that would otherwise look lossy.
pub fn is_known_record_field(field_type: u8) -> bool {
    matches!(field_type, FIELD_UUID..=FIELD_KB_SHORTCUT | FIELD_END)
}

/// One decrypted field.
pub struct Field {
    pub field_type: u8,
    pub data: SecureBuffer,
}

impl Field {
    pub fn is_end(&self) -> bool {
        self.field_type == FIELD_END
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("field_type", &format_args!("0x{:02x}", self.field_type))
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_field_range() {
        assert!(is_known_record_field(FIELD_TITLE));
        assert!(is_known_record_field(FIELD_KB_SHORTCUT));
        assert!(is_known_record_field(FIELD_END));
        assert!(!is_known_record_field(FIELD_NAME));
        assert!(!is_known_record_field(0x42));
    }
}
