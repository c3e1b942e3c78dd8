//! Fixed-grammar date-time strings used by text and XML import/export.
//!
//! | Grammar            | Example                    |
//! |--------------------|----------------------------|
//! | import date-time   | `2024/02/28 10:00:00`      |
//! | ASCII date-time    | `Wed Feb 28 10:00:00 2024` |
//! | XML date-time      | `2024-02-28T10:00:00`      |
//! | XML date           | `2024-02-28`               |
//!
//! All four share one calendar check: years 1970 to 2038, and February has
//! 29 days in every year divisible by 4. Existing exports were produced with
//! that rule so it is kept as-is (within the accepted year range it agrees
//! with the Gregorian calendar anyway). `1970-01-01` at any time of day is
//! the "unset" value and always yields timestamp 0.
//!
//! Timestamps are seconds since the Unix epoch, interpreted as UTC.

use chrono::{DateTime, Datelike, NaiveDate};
use thiserror::Error;

pub const MIN_YEAR: u32 = 1970;
pub const MAX_YEAR: u32 = 2038;
/// Last second of [`MAX_YEAR`], UTC.
pub const MAX_TIMESTAMP: i64 = 2_177_452_799;

/// Never valid in any grammar.
const RESERVED_CHAR: char = '#';

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateTimeError {
    #[error("expected {expected} characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("unexpected character at position {position}")]
    Syntax { position: usize },

    #[error("reserved character '#' is not allowed")]
    ReservedCharacter,

    #[error("year {0} is outside 1970-2038")]
    YearOutOfRange(u32),

    #[error("invalid date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: u32, month: u32, day: u32 },

    #[error("invalid time {hour:02}:{minute:02}:{second:02}")]
    InvalidTime { hour: u32, minute: u32, second: u32 },

    #[error("unknown month name")]
    UnknownMonth,

    #[error("unknown weekday name")]
    UnknownWeekday,

    #[error("weekday does not match the date")]
    WeekdayMismatch,
}

/// Layout of one grammar.
struct Grammar {
    len: usize,
    separators: &'static [(usize, char)],
    digits: &'static [usize],
}

const IMPORT_GRAMMAR: Grammar = Grammar {
    len: 19,
    separators: &[(4, '/'), (7, '/'), (10, ' '), (13, ':'), (16, ':')],
    digits: &[0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18],
};

const ASC_GRAMMAR: Grammar = Grammar {
    len: 24,
    separators: &[(3, ' '), (7, ' '), (10, ' '), (13, ':'), (16, ':'), (19, ' ')],
    digits: &[8, 9, 11, 12, 14, 15, 17, 18, 20, 21, 22, 23],
};

const XML_DATE_TIME_GRAMMAR: Grammar = Grammar {
    len: 19,
    separators: &[(4, '-'), (7, '-'), (10, 'T'), (13, ':'), (16, ':')],
    digits: &[0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18],
};

const XML_DATE_GRAMMAR: Grammar = Grammar {
    len: 10,
    separators: &[(4, '-'), (7, '-')],
    digits: &[0, 1, 2, 3, 5, 6, 8, 9],
};

impl Grammar {
    fn check(&self, chars: &[char]) -> Result<(), DateTimeError> {
        if chars.len() != self.len {
            return Err(DateTimeError::Length {
                expected: self.len,
                actual: chars.len(),
            });
        }
        for &(position, sep) in self.separators {
            if chars[position] != sep {
                return Err(DateTimeError::Syntax { position });
            }
        }
        for &position in self.digits {
            if !chars[position].is_ascii_digit() {
                return Err(DateTimeError::Syntax { position });
            }
        }
        if chars.contains(&RESERVED_CHAR) {
            return Err(DateTimeError::ReservedCharacter);
        }
        // Spaces are only allowed where the layout puts them.
        if let Some(position) = chars
            .iter()
            .enumerate()
            .position(|(i, c)| *c == ' ' && !self.separators.contains(&(i, ' ')))
        {
            return Err(DateTimeError::Syntax { position });
        }
        Ok(())
    }
}

/// Decimal value of a run of (already checked) ASCII digits.
fn number(chars: &[char]) -> u32 {
    chars
        .iter()
        .filter_map(|c| c.to_digit(10))
        .fold(0, |acc, d| acc * 10 + d)
}

/// Day count of a month under the divisible-by-4 leap rule.
pub fn days_in_month(year: u32, month: u32) -> Option<u32> {
    let index = usize::try_from(month.checked_sub(1)?).ok()?;
    let days = *MONTH_LENGTHS.get(index)?;
    Some(if month == 2 && year % 4 == 0 { 29 } else { days })
}

/// Whether `year-month-day` exists under the divisible-by-4 leap rule.
///
/// This does not apply the year range; `2100-02-29` is a valid calendar
/// date here even though no grammar accepts year 2100.
pub fn is_valid_calendar_date(year: u32, month: u32, day: u32) -> bool {
    days_in_month(year, month).is_some_and(|max| (1..=max).contains(&day))
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl Fields {
    fn is_unset(&self) -> bool {
        self.year == MIN_YEAR && self.month == 1 && self.day == 1
    }

    fn validate(&self) -> Result<(), DateTimeError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&self.year) {
            return Err(DateTimeError::YearOutOfRange(self.year));
        }
        if !is_valid_calendar_date(self.year, self.month, self.day) {
            return Err(DateTimeError::InvalidDate {
                year: self.year,
                month: self.month,
                day: self.day,
            });
        }
        if self.hour > 23 || self.minute > 59 || self.second > 59 {
            return Err(DateTimeError::InvalidTime {
                hour: self.hour,
                minute: self.minute,
                second: self.second,
            });
        }
        Ok(())
    }

    fn date(&self) -> Result<NaiveDate, DateTimeError> {
        let year = i32::try_from(self.year).map_err(|_| DateTimeError::YearOutOfRange(self.year))?;
        NaiveDate::from_ymd_opt(year, self.month, self.day).ok_or(DateTimeError::InvalidDate {
            year: self.year,
            month: self.month,
            day: self.day,
        })
    }

    /// Validate, then convert. The unset date short-circuits to 0.
    fn timestamp(&self) -> Result<i64, DateTimeError> {
        self.validate()?;
        if self.is_unset() {
            return Ok(0);
        }
        let invalid_time = DateTimeError::InvalidTime {
            hour: self.hour,
            minute: self.minute,
            second: self.second,
        };
        let stamp = self
            .date()?
            .and_hms_opt(self.hour, self.minute, self.second)
            .ok_or(invalid_time)?
            .and_utc()
            .timestamp();
        Ok(stamp)
    }
}

/// `yyyy/mm/dd hh:mm:ss`
pub fn verify_import_date_time(s: &str) -> Result<i64, DateTimeError> {
    let chars: Vec<char> = s.chars().collect();
    IMPORT_GRAMMAR.check(&chars)?;
    numeric_fields(&chars, true).timestamp()
}

/// `yyyy-mm-ddThh:mm:ss`
pub fn verify_xml_date_time(s: &str) -> Result<i64, DateTimeError> {
    let chars: Vec<char> = s.chars().collect();
    XML_DATE_TIME_GRAMMAR.check(&chars)?;
    numeric_fields(&chars, true).timestamp()
}

/// `yyyy-mm-dd`, as midnight UTC.
pub fn verify_xml_date(s: &str) -> Result<i64, DateTimeError> {
    let chars: Vec<char> = s.chars().collect();
    XML_DATE_GRAMMAR.check(&chars)?;
    numeric_fields(&chars, false).timestamp()
}

/// `ddd MMM dd hh:mm:ss yyyy`; the weekday must match the date.
pub fn verify_asc_date_time(s: &str) -> Result<i64, DateTimeError> {
    let chars: Vec<char> = s.chars().collect();
    ASC_GRAMMAR.check(&chars)?;

    let weekday: String = chars[0..3].iter().collect();
    let month: String = chars[4..7].iter().collect();
    let month = MONTHS
        .iter()
        .position(|m| *m == month)
        .ok_or(DateTimeError::UnknownMonth)?;

    let fields = Fields {
        year: number(&chars[20..24]),
        month: u32::try_from(month + 1).map_err(|_| DateTimeError::UnknownMonth)?,
        day: number(&chars[8..10]),
        hour: number(&chars[11..13]),
        minute: number(&chars[14..16]),
        second: number(&chars[17..19]),
    };
    let stamp = fields.timestamp()?;
    if fields.is_unset() {
        return Ok(stamp);
    }

    let weekday = WEEKDAYS
        .iter()
        .position(|d| *d == weekday)
        .ok_or(DateTimeError::UnknownWeekday)?;
    let actual = fields.date()?.weekday().num_days_from_sunday();
    if u32::try_from(weekday).ok() != Some(actual) {
        return Err(DateTimeError::WeekdayMismatch);
    }
    Ok(stamp)
}

/// Fields of the `yyyy?mm?dd?hh?mm?ss` layouts (import and XML).
fn numeric_fields(chars: &[char], with_time: bool) -> Fields {
    let (hour, minute, second) = if with_time {
        (
            number(&chars[11..13]),
            number(&chars[14..16]),
            number(&chars[17..19]),
        )
    } else {
        (0, 0, 0)
    };
    Fields {
        year: number(&chars[0..4]),
        month: number(&chars[5..7]),
        day: number(&chars[8..10]),
        hour,
        minute,
        second,
    }
}

fn format_with(t: i64, pattern: &str) -> Option<String> {
    DateTime::from_timestamp(t, 0).map(|dt| dt.format(pattern).to_string())
}

/// Timestamp as `yyyy/mm/dd hh:mm:ss` (UTC).
pub fn format_import_date_time(t: i64) -> Option<String> {
    format_with(t, "%Y/%m/%d %H:%M:%S")
}

/// Timestamp as `ddd MMM dd hh:mm:ss yyyy` (UTC, zero-padded day).
pub fn format_asc_date_time(t: i64) -> Option<String> {
    format_with(t, "%a %b %d %H:%M:%S %Y")
}

/// Timestamp as `yyyy-mm-ddThh:mm:ss` (UTC).
pub fn format_xml_date_time(t: i64) -> Option<String> {
    format_with(t, "%Y-%m-%dT%H:%M:%S")
}

/// Timestamp as `yyyy-mm-dd` (UTC).
pub fn format_xml_date(t: i64) -> Option<String> {
    format_with(t, "%Y-%m-%d")
}
