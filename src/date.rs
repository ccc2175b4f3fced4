use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use thiserror::Error;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(0[1-9]|1[0-2])/(0[1-9]|[12][0-9]|3[01])/(\d{4})\b").unwrap()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("expected {expected} ({width} characters), got {input:?}")]
    Shape {
        expected: &'static str,
        width: usize,
        input: String,
    },
    #[error("{0:?} is not a calendar date")]
    Calendar(String),
}

/// A calendar day. Index pages show `mm/dd/yyyy`, the posts table stores
/// `yyyymmdd`; both are rendered from this one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Parse the index-page form, `mm/dd/yyyy`.
    pub fn parse_display(s: &str) -> Result<Self, DateError> {
        let b = s.as_bytes();
        let shaped = b.len() == 10
            && b[2] == b'/'
            && b[5] == b'/'
            && b.iter()
                .enumerate()
                .all(|(i, c)| i == 2 || i == 5 || c.is_ascii_digit());
        if !shaped {
            return Err(DateError::Shape {
                expected: "mm/dd/yyyy",
                width: 10,
                input: s.to_string(),
            });
        }
        build(s, &s[6..10], &s[0..2], &s[3..5])
    }

    /// Parse the storage form, `yyyymmdd`.
    pub fn parse_storage(s: &str) -> Result<Self, DateError> {
        if s.len() != 8 || !s.bytes().all(|c| c.is_ascii_digit()) {
            return Err(DateError::Shape {
                expected: "yyyymmdd",
                width: 8,
                input: s.to_string(),
            });
        }
        build(s, &s[0..4], &s[4..6], &s[6..8])
    }

    /// The first `mm/dd/yyyy` match inside free text. If that match is not
    /// a real day (02/31/2025) the text has no date; later matches are ignored.
    pub fn find_in_text(text: &str) -> Option<(Self, String)> {
        let m = DATE_RE.find(text)?;
        let date = Self::parse_display(m.as_str()).ok()?;
        Some((date, m.as_str().to_string()))
    }

    /// The day `days` before `today`.
    pub fn days_before(today: NaiveDate, days: u32) -> Self {
        Self(today - Duration::days(i64::from(days)))
    }

    pub fn display(&self) -> String {
        format!("{:02}/{:02}/{:04}", self.0.month(), self.0.day(), self.0.year())
    }

    pub fn storage(&self) -> String {
        format!("{:04}{:02}{:02}", self.0.year(), self.0.month(), self.0.day())
    }

    pub fn sort_key(&self) -> String {
        format!("{:04}/{:02}/{:02}", self.0.year(), self.0.month(), self.0.day())
    }
}

fn build(input: &str, year: &str, month: &str, day: &str) -> Result<DateKey, DateError> {
    let calendar = || DateError::Calendar(input.to_string());
    let year: i32 = year.parse().map_err(|_| calendar())?;
    let month: u32 = month.parse().map_err(|_| calendar())?;
    let day: u32 = day.parse().map_err(|_| calendar())?;
    DateKey::from_ymd(year, month, day).ok_or_else(calendar)
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Command-line dates use the storage form.
impl FromStr for DateKey {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_storage(s)
    }
}
