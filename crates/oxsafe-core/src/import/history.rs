//! Password-history strings.
//!
//! Export/import form (human editable):
//!
//! ```text
//! S MM NN ( ' ' yyyy/mm/dd hh:mm:ss ' ' LLLL ' ' password )*
//! ```
//!
//! written without the spaces between the header parts: `S` is the status
//! digit (0 = history off, 1 = on), `MM` the maximum kept entries and `NN`
//! the entry count, both two hex digits. `LLLL` is the password length in
//! characters as four hex digits. A date starting `1970-01-01` means the
//! change time is unknown.
//!
//! Stored (normalized) form drops the separators and encodes the time as
//! eight hex digits of seconds since the epoch:
//!
//! ```text
//! S MM NN ( TTTTTTTT LLLL password )*
//! ```

use std::fmt;

use thiserror::Error;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::datetime::{MAX_TIMESTAMP, format_import_date_time, verify_import_date_time};

const HEADER_LEN: usize = 5;
const DATE_TIME_LEN: usize = 19;
const LENGTH_LEN: usize = 4;
const STORED_TIME_LEN: usize = 8;
/// Separator, date-time, separator, length, separator.
const ENTRY_PREFIX_LEN: usize = 1 + DATE_TIME_LEN + 1 + LENGTH_LEN + 1;
const UNKNOWN_DATE: &str = "1970-01-01";
const MAX_PASSWORD_LEN: usize = 0xffff;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwhErrorKind {
    #[error("invalid password history header")]
    InvalidHeader,

    #[error("invalid password history status {0}")]
    InvalidStatus(u32),

    #[error("{count} saved passwords exceed the maximum of {max}")]
    InvalidCount { count: u8, max: u8 },

    #[error("invalid date-time")]
    InvalidDateTime,

    #[error("invalid password length")]
    InvalidPasswordLength,

    #[error("password history is too short")]
    TooShort,

    #[error("password history is too long")]
    TooLong,

    #[error("expected a space separator")]
    InvalidSeparator,
}

/// A parse failure with its 1-based character position.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("password history error at position {offset}: {kind}")]
pub struct PwhError {
    pub kind: PwhErrorKind,
    pub offset: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("{count} entries exceed the maximum of {max}")]
    TooManyEntries { count: usize, max: u8 },

    #[error("a saved password is longer than 65535 characters")]
    PasswordTooLong,

    #[error("timestamp {0} is outside 1970 to 2038")]
    InvalidTimestamp(i64),
}

/// One previous password. `changed_at` is 0 when unknown.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHistoryEntry {
    pub changed_at: i64,
    pub password: Zeroizing<String>,
}

impl PasswordHistoryEntry {
    pub fn new(changed_at: i64, password: &str) -> Self {
        Self {
            changed_at,
            password: Zeroizing::new(password.to_owned()),
        }
    }
}

impl fmt::Debug for PasswordHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHistoryEntry")
            .field("changed_at", &self.changed_at)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHistory {
    enabled: bool,
    max_entries: u8,
    entries: Vec<PasswordHistoryEntry>,
}

impl PasswordHistory {
    pub fn new(
        enabled: bool,
        max_entries: u8,
        entries: Vec<PasswordHistoryEntry>,
    ) -> Result<Self, HistoryError> {
        if entries.len() > usize::from(max_entries) {
            return Err(HistoryError::TooManyEntries {
                count: entries.len(),
                max: max_entries,
            });
        }
        for entry in &entries {
            if entry.password.chars().count() > MAX_PASSWORD_LEN {
                return Err(HistoryError::PasswordTooLong);
            }
            if !(0..=MAX_TIMESTAMP).contains(&entry.changed_at) {
                return Err(HistoryError::InvalidTimestamp(entry.changed_at));
            }
        }
        Ok(Self {
            enabled,
            max_entries,
            entries,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_entries(&self) -> u8 {
        self.max_entries
    }

    pub fn entries(&self) -> &[PasswordHistoryEntry] {
        &self.entries
    }

    fn header(&self) -> String {
        // `new` caps the entry count at max_entries, which is a u8
        let count = u8::try_from(self.entries.len()).unwrap_or(u8::MAX);
        format!("{}{:02x}{:02x}", u8::from(self.enabled), self.max_entries, count)
    }

    fn capacity(&self, per_entry: usize) -> usize {
        HEADER_LEN
            + self
                .entries
                .iter()
                .map(|e| per_entry + e.password.len())
                .sum::<usize>()
    }

    /// Export form, accepted back by [`verify_import_history`].
    pub fn to_import_string(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(String::with_capacity(self.capacity(ENTRY_PREFIX_LEN)));
        out.push_str(&self.header());
        for entry in &self.entries {
            let when = match entry.changed_at {
                0 => None,
                t => format_import_date_time(t),
            }
            .unwrap_or_else(|| format!("{UNKNOWN_DATE} 00:00:00"));
            out.push(' ');
            out.push_str(&when);
            out.push_str(&format!(" {:04x} ", entry.password.chars().count()));
            out.push_str(&entry.password);
        }
        out
    }

    /// Stored form.
    pub fn to_normalized_string(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(String::with_capacity(
            self.capacity(STORED_TIME_LEN + LENGTH_LEN),
        ));
        out.push_str(&self.header());
        for entry in &self.entries {
            out.push_str(&format!(
                "{:08x}{:04x}",
                entry.changed_at,
                entry.password.chars().count()
            ));
            out.push_str(&entry.password);
        }
        out
    }

    /// Parse the stored form. Errors use the same kinds and offsets as
    /// the import parser.
    pub fn from_stored(stored: &str) -> Result<Self, PwhError> {
        let chars = Zeroizing::new(stored.chars().collect::<Vec<char>>());
        let mut cursor = Cursor::new(&chars);
        let (enabled, max_entries, count) = cursor.header()?;

        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            if cursor.remaining() < STORED_TIME_LEN + LENGTH_LEN {
                return Err(cursor.error(PwhErrorKind::TooShort));
            }
            let changed_at = cursor
                .hex(STORED_TIME_LEN)
                .map(i64::from)
                .filter(|t| *t <= MAX_TIMESTAMP)
                .ok_or(cursor.error(PwhErrorKind::InvalidDateTime))?;
            let len = cursor
                .hex(LENGTH_LEN)
                .ok_or(cursor.error(PwhErrorKind::InvalidPasswordLength))?;
            let password = cursor.password(len)?;
            entries.push(PasswordHistoryEntry {
                changed_at,
                password,
            });
        }
        if cursor.remaining() > 0 {
            return Err(cursor.error(PwhErrorKind::TooLong));
        }

        Ok(Self {
            enabled,
            max_entries,
            entries,
        })
    }
}

/// Result of checking an imported history field.
#[derive(Clone, PartialEq, Eq)]
pub enum HistoryImport {
    /// Nothing to import.
    Empty,
    /// `00000`: history off with no entries; treat as absent.
    Ignored,
    Parsed {
        history: PasswordHistory,
        normalized: Zeroizing<String>,
    },
}

impl fmt::Debug for HistoryImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryImport::Empty => f.write_str("Empty"),
            HistoryImport::Ignored => f.write_str("Ignored"),
            HistoryImport::Parsed { history, .. } => f
                .debug_struct("Parsed")
                .field("history", history)
                .field("normalized", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Validate an export-form history and convert it to the stored form.
#[instrument(level = "debug", skip(input), fields(len = input.len()))]
pub fn verify_import_history(input: &str) -> Result<HistoryImport, PwhError> {
    if input.is_empty() {
        return Ok(HistoryImport::Empty);
    }

    let chars = Zeroizing::new(input.chars().collect::<Vec<char>>());
    let mut cursor = Cursor::new(&chars);
    let (enabled, max_entries, count) = cursor.header()?;

    if cursor.remaining() == 0 && !enabled && max_entries == 0 && count == 0 {
        debug!("Empty history header, ignoring");
        return Ok(HistoryImport::Ignored);
    }

    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        if cursor.remaining() < ENTRY_PREFIX_LEN {
            return Err(cursor.error(PwhErrorKind::TooShort));
        }
        cursor.separator()?;

        let changed_at = {
            let when: String = cursor.take(DATE_TIME_LEN).iter().collect();
            if when.starts_with(UNKNOWN_DATE) {
                0
            } else {
                verify_import_date_time(&when)
                    .map_err(|_| cursor.error(PwhErrorKind::InvalidDateTime))?
            }
        };
        cursor.advance(DATE_TIME_LEN);

        cursor.separator()?;
        let len = cursor
            .hex(LENGTH_LEN)
            .ok_or(cursor.error(PwhErrorKind::InvalidPasswordLength))?;
        cursor.separator()?;

        let password = cursor.password(len)?;
        entries.push(PasswordHistoryEntry {
            changed_at,
            password,
        });
    }

    if cursor.remaining() > 0 {
        return Err(cursor.error(PwhErrorKind::TooLong));
    }

    let history = PasswordHistory {
        enabled,
        max_entries,
        entries,
    };
    let normalized = history.to_normalized_string();
    debug!(entries = history.entries.len(), "Parsed password history");
    Ok(HistoryImport::Parsed {
        history,
        normalized,
    })
}

/// Character cursor shared by both parsers.
struct Cursor<'a> {
    chars: &'a [char],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(chars: &'a [char]) -> Self {
        Self { chars, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.chars.len() - self.pos
    }

    /// Error at the current position, 1-based.
    fn error(&self, kind: PwhErrorKind) -> PwhError {
        PwhError {
            kind,
            offset: self.pos + 1,
        }
    }

    fn take(&self, n: usize) -> &'a [char] {
        let end = (self.pos + n).min(self.chars.len());
        &self.chars[self.pos..end]
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.chars.len());
    }

    /// Exactly `n` hex digits; advances only on success.
    fn hex(&mut self, n: usize) -> Option<u32> {
        let digits = self.take(n);
        if digits.len() != n {
            return None;
        }
        let value = digits
            .iter()
            .try_fold(0u32, |acc, c| Some(acc * 16 + c.to_digit(16)?))?;
        self.advance(n);
        Some(value)
    }

    fn separator(&mut self) -> Result<(), PwhError> {
        if self.take(1) != [' '] {
            return Err(self.error(PwhErrorKind::InvalidSeparator));
        }
        self.advance(1);
        Ok(())
    }

    /// `S MM NN`, with status and count validated.
    fn header(&mut self) -> Result<(bool, u8, u8), PwhError> {
        if self.remaining() < HEADER_LEN {
            return Err(self.error(PwhErrorKind::InvalidHeader));
        }
        let invalid = self.error(PwhErrorKind::InvalidHeader);
        let status = self.take(1)[0].to_digit(10).ok_or(invalid)?;
        let digits = self.take(HEADER_LEN);
        let byte = |range: std::ops::Range<usize>| -> Option<u8> {
            digits[range]
                .iter()
                .try_fold(0u8, |acc, c| Some(acc * 16 + u8::try_from(c.to_digit(16)?).ok()?))
        };
        let max = byte(1..3).ok_or(invalid)?;
        let count = byte(3..5).ok_or(invalid)?;

        let enabled = match status {
            0 => false,
            1 => true,
            other => return Err(self.error(PwhErrorKind::InvalidStatus(other))),
        };
        if count > max {
            return Err(self.error(PwhErrorKind::InvalidCount { count, max }));
        }
        self.advance(HEADER_LEN);
        Ok((enabled, max, count))
    }

    fn password(&mut self, len: u32) -> Result<Zeroizing<String>, PwhError> {
        let len = usize::try_from(len).map_err(|_| self.error(PwhErrorKind::InvalidPasswordLength))?;
        if self.remaining() < len {
            return Err(self.error(PwhErrorKind::TooShort));
        }
        let mut password = Zeroizing::new(String::with_capacity(len * 4));
        password.extend(self.take(len).iter());
        self.advance(len);
        Ok(password)
    }
}
