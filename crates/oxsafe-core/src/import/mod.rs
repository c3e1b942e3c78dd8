//! Validators for the text encodings found in imported data
//!
//! Date-time fields use one of four fixed grammars ([`datetime`]); the
//! password-history field has its own compact encoding ([`history`]) whose
//! entries carry import-grammar date-times.

pub mod datetime;
pub mod history;

pub use datetime::{
    DateTimeError, format_asc_date_time, format_import_date_time, format_xml_date,
    format_xml_date_time, is_valid_calendar_date, verify_asc_date_time, verify_import_date_time,
    verify_xml_date, verify_xml_date_time,
};
pub use history::{
    HistoryError, HistoryImport, PasswordHistory, PasswordHistoryEntry, PwhError, PwhErrorKind,
    verify_import_history,
};
