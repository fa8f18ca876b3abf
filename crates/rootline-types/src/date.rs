//! Genealogical dates with optional month and day.
//!
//! Records routinely know only a year ("1850") or a year and month
//! ("1850-03"). [`PartialDate`] keeps that precision and orders dates so that
//! a missing component sorts before any known one.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A calendar date where month and day may be unknown.
///
/// Field order matters: the derived `Ord` compares year, then month, then day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

/// Error parsing a [`PartialDate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("empty date")]
    Empty,
    #[error("malformed date '{0}' (expected YYYY, YYYY-MM or YYYY-MM-DD)")]
    Malformed(String),
    #[error("no such calendar date: {0}")]
    OutOfRange(String),
}

impl PartialDate {
    /// A year-only date.
    pub fn year(year: i32) -> Self {
        Self { year, month: None, day: None }
    }

    /// A fully specified date, validated against the calendar.
    pub fn ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)?;
        Some(Self { year, month: Some(month), day: Some(day) })
    }

    /// Convert a chrono date.
    pub fn from_naive(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: Some(date.month()),
            day: Some(date.day()),
        }
    }

    /// The UTC calendar date for a Unix-millisecond timestamp.
    pub fn from_unix_millis(millis: u64) -> Self {
        let date = chrono::DateTime::from_timestamp_millis(millis as i64)
            .map(|dt| dt.date_naive())
            .unwrap_or_default();
        Self::from_naive(date)
    }

    /// Strictly earlier, compared only at the precision both dates share.
    ///
    /// `1900` neither precedes nor follows `1900-05`.
    pub fn precedes(&self, other: &PartialDate) -> bool {
        if self.year != other.year {
            return self.year < other.year;
        }
        match (self.month, other.month) {
            (Some(a), Some(b)) if a != b => a < b,
            (Some(_), Some(_)) => matches!((self.day, other.day), (Some(a), Some(b)) if a < b),
            _ => false,
        }
    }

    /// Whole years elapsed from `earlier` to `later`.
    ///
    /// When either side lacks a month (or day), the comparison falls back to
    /// the coarser precision, so `1900` → `1913-06-01` counts as 13 years.
    /// Negative when `later` precedes `earlier`.
    pub fn years_between(earlier: &PartialDate, later: &PartialDate) -> i32 {
        let mut years = later.year - earlier.year;
        let birthday_pending = match (earlier.month, later.month) {
            (Some(em), Some(lm)) if lm < em => true,
            (Some(em), Some(lm)) if lm == em => matches!(
                (earlier.day, later.day),
                (Some(ed), Some(ld)) if ld < ed
            ),
            _ => false,
        };
        if birthday_pending {
            years -= 1;
        }
        years
    }
}

impl FromStr for PartialDate {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DateError::Empty);
        }

        let malformed = || DateError::Malformed(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
            return Err(malformed());
        }
        if parts[0].len() != 4 || parts[1..].iter().any(|p| p.len() != 2) {
            return Err(malformed());
        }

        let year: i32 = parts[0].parse().map_err(|_| malformed())?;
        let month: Option<u32> = parts.get(1).map(|m| m.parse()).transpose().map_err(|_| malformed())?;
        let day: Option<u32> = parts.get(2).map(|d| d.parse()).transpose().map_err(|_| malformed())?;

        match (month, day) {
            (None, _) => Ok(Self::year(year)),
            (Some(m), None) if (1..=12).contains(&m) => Ok(Self { year, month: Some(m), day: None }),
            (Some(m), Some(d)) => {
                Self::ymd(year, m, d).ok_or_else(|| DateError::OutOfRange(s.to_string()))
            }
            _ => Err(DateError::OutOfRange(s.to_string())),
        }
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(m) = self.month {
            write!(f, "-{m:02}")?;
            if let Some(d) = self.day {
                write!(f, "-{d:02}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for PartialDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PartialDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precisions() {
        assert_eq!("1850".parse::<PartialDate>().unwrap(), PartialDate::year(1850));
        let ym: PartialDate = "1850-03".parse().unwrap();
        assert_eq!(ym.month, Some(3));
        assert_eq!(ym.day, None);
        let full: PartialDate = " 2020-01-01 ".parse().unwrap();
        assert_eq!(full, PartialDate::ymd(2020, 1, 1).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<PartialDate>(), Err(DateError::Empty));
        assert!(matches!("abt 1850".parse::<PartialDate>(), Err(DateError::Malformed(_))));
        assert!(matches!("1850-3".parse::<PartialDate>(), Err(DateError::Malformed(_))));
        assert!(matches!("1850-02-30".parse::<PartialDate>(), Err(DateError::OutOfRange(_))));
        assert!(matches!("1850-13".parse::<PartialDate>(), Err(DateError::OutOfRange(_))));
    }

    #[test]
    fn test_display_roundtrip_is_canonical() {
        for s in ["0987", "1850", "1850-03", "2020-01-01"] {
            assert_eq!(s.parse::<PartialDate>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_ordering_missing_components_first() {
        let y = PartialDate::year(1900);
        let ym: PartialDate = "1900-01".parse().unwrap();
        let ymd: PartialDate = "1900-01-01".parse().unwrap();
        assert!(y < ym);
        assert!(ym < ymd);
        assert!(ymd < PartialDate::year(1901));
    }

    #[test]
    fn test_precedes_uses_shared_precision() {
        let y: PartialDate = "1900".parse().unwrap();
        let ym: PartialDate = "1900-05".parse().unwrap();
        let later: PartialDate = "1900-05-02".parse().unwrap();
        assert!(!y.precedes(&ym));
        assert!(!ym.precedes(&y));
        assert!(ym.precedes(&"1900-06".parse().unwrap()));
        assert!("1900-05-01".parse::<PartialDate>().unwrap().precedes(&later));
        assert!(y.precedes(&PartialDate::year(1901)));
    }

    #[test]
    fn test_years_between() {
        let birth: PartialDate = "1900-06-15".parse().unwrap();
        let before_birthday: PartialDate = "1913-06-14".parse().unwrap();
        let on_birthday: PartialDate = "1913-06-15".parse().unwrap();
        assert_eq!(PartialDate::years_between(&birth, &before_birthday), 12);
        assert_eq!(PartialDate::years_between(&birth, &on_birthday), 13);
        assert_eq!(PartialDate::years_between(&PartialDate::year(1900), &before_birthday), 13);
        assert_eq!(PartialDate::years_between(&on_birthday, &birth), -13);
    }

    #[test]
    fn test_serde_as_string() {
        let date: PartialDate = "1850-03".parse().unwrap();
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"1850-03\"");
        assert_eq!(serde_json::from_str::<PartialDate>("\"1850-03\"").unwrap(), date);
        assert!(serde_json::from_str::<PartialDate>("\"soon\"").is_err());
    }

    #[test]
    fn test_from_unix_millis() {
        // 2021-01-01T00:00:00Z
        assert_eq!(
            PartialDate::from_unix_millis(1_609_459_200_000),
            PartialDate::ymd(2021, 1, 1).unwrap()
        );
    }
}
