//! Per-database metadata stored in the V3 header block.
//!
//! Legacy files only carry a preference string (in the V2 magic record);
//! the other fields stay at their defaults for them.

use thiserror::Error;

pub const HDR_VERSION: u8 = 0x00;
pub const HDR_UUID: u8 = 0x01;
pub const HDR_PREFS: u8 = 0x02;
pub const HDR_DISPLAY_STATUS: u8 = 0x03;
pub const HDR_LAST_SAVE_TIME: u8 = 0x04;
pub const HDR_LAST_SAVE_WHO: u8 = 0x05;
pub const HDR_LAST_SAVE_WHAT: u8 = 0x06;
pub const HDR_LAST_SAVED_BY_USER: u8 = 0x07;
pub const HDR_LAST_SAVED_ON_HOST: u8 = 0x08;
pub const HDR_DB_NAME: u8 = 0x09;
pub const HDR_DB_DESC: u8 = 0x0a;
pub const HDR_END: u8 = 0xff;

/// Major version written into new V3 files.
pub const V3_MAJOR: u8 = 0x03;
/// Minor version written into new V3 files.
pub const V3_MINOR: u8 = 0x0d;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderFieldError {
    #[error("Header field 0x{field_type:02x} has invalid length {len}")]
    BadLength { field_type: u8, len: usize },
}

/// A header field this engine does not interpret, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub field_type: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderRecord {
    pub major: u8,
    pub minor: u8,
    /// Key-stretch work factor (V3 only; stored in the preamble, not a field).
    pub iterations: u32,
    pub file_uuid: [u8; 16],
    pub prefs: String,
    pub display_status: String,
    /// Seconds since the Unix epoch, 0 when never saved.
    pub when_last_saved: i64,
    pub last_saved_by: String,
    pub last_saved_on: String,
    pub what_last_saved: String,
    pub db_name: String,
    pub db_desc: String,
    pub unknown_fields: Vec<UnknownField>,
}

impl HeaderRecord {
    /// A fresh V3 header with the current format version.
    pub fn new_v3() -> Self {
        Self {
            major: V3_MAJOR,
            minor: V3_MINOR,
            ..Self::default()
        }
    }

    /// Apply one decoded header field.
    pub fn apply_field(&mut self, field_type: u8, data: &[u8]) -> Result<(), HeaderFieldError> {
        let bad_length = || HeaderFieldError::BadLength {
            field_type,
            len: data.len(),
        };

        match field_type {
            HDR_VERSION => {
                let [minor, major] = data else {
                    return Err(bad_length());
                };
                self.minor = *minor;
                self.major = *major;
            }
            HDR_UUID => {
                self.file_uuid = data.try_into().map_err(|_| bad_length())?;
            }
            HDR_PREFS => self.prefs = text(data),
            HDR_DISPLAY_STATUS => self.display_status = text(data),
            HDR_LAST_SAVE_TIME => {
                self.when_last_saved = decode_time(data).ok_or_else(bad_length)?;
            }
            HDR_LAST_SAVE_WHO => {
                // "LLLL<user><host>", LLLL = user length in hex
                if let Some((user, host)) = split_who(data) {
                    if self.last_saved_by.is_empty() {
                        self.last_saved_by = user;
                    }
                    if self.last_saved_on.is_empty() {
                        self.last_saved_on = host;
                    }
                }
            }
            HDR_LAST_SAVE_WHAT => self.what_last_saved = text(data),
            HDR_LAST_SAVED_BY_USER => self.last_saved_by = text(data),
            HDR_LAST_SAVED_ON_HOST => self.last_saved_on = text(data),
            HDR_DB_NAME => self.db_name = text(data),
            HDR_DB_DESC => self.db_desc = text(data),
            _ => self.unknown_fields.push(UnknownField {
                field_type,
                data: data.to_vec(),
            }),
        }
        Ok(())
    }

    /// Encode as header fields in write order, excluding the end marker.
    ///
    /// Empty optional strings are omitted; unknown fields follow the known
    /// ones in the order they were read.
    pub fn to_fields(&self) -> Vec<(u8, Vec<u8>)> {
        let mut fields = vec![
            (HDR_VERSION, vec![self.minor, self.major]),
            (HDR_UUID, self.file_uuid.to_vec()),
        ];

        let strings = [
            (HDR_PREFS, &self.prefs),
            (HDR_DISPLAY_STATUS, &self.display_status),
        ];
        for (field_type, value) in strings {
            if !value.is_empty() {
                fields.push((field_type, value.as_bytes().to_vec()));
            }
        }

        if self.when_last_saved != 0 {
            fields.push((HDR_LAST_SAVE_TIME, encode_time(self.when_last_saved)));
        }

        let strings = [
            (HDR_LAST_SAVE_WHAT, &self.what_last_saved),
            (HDR_LAST_SAVED_BY_USER, &self.last_saved_by),
            (HDR_LAST_SAVED_ON_HOST, &self.last_saved_on),
            (HDR_DB_NAME, &self.db_name),
            (HDR_DB_DESC, &self.db_desc),
        ];
        for (field_type, value) in strings {
            if !value.is_empty() {
                fields.push((field_type, value.as_bytes().to_vec()));
            }
        }

        fields.extend(
            self.unknown_fields
                .iter()
                .map(|f| (f.field_type, f.data.clone())),
        );
        fields
    }

    pub fn file_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.file_uuid).hyphenated().to_string()
    }
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Save times are 4-byte LE (8-byte for values beyond 32 bits). Some old
/// writers stored 8 ASCII hex digits instead.
fn decode_time(data: &[u8]) -> Option<i64> {
    match data.len() {
        8 if data.iter().all(u8::is_ascii_hexdigit) => {
            let bytes: [u8; 4] = hex::decode(data).ok()?.try_into().ok()?;
            Some(i64::from(u32::from_be_bytes(bytes)))
        }
        4 => {
            let bytes: [u8; 4] = data.try_into().ok()?;
            Some(i64::from(u32::from_le_bytes(bytes)))
        }
        8 => {
            let bytes: [u8; 8] = data.try_into().ok()?;
            Some(i64::from_le_bytes(bytes))
        }
        _ => None,
    }
}

fn encode_time(t: i64) -> Vec<u8> {
    match u32::try_from(t) {
        Ok(small) => small.to_le_bytes().to_vec(),
        Err(_) => t.to_le_bytes().to_vec(),
    }
}

fn split_who(data: &[u8]) -> Option<(String, String)> {
    let s = std::str::from_utf8(data).ok()?;
    let user_len = usize::from_str_radix(s.get(..4)?, 16).ok()?;
    let rest = s.get(4..)?;
    let user = rest.get(..user_len)?;
    let host = rest.get(user_len..)?;
    Some((user.to_string(), host.to_string()))
}
