use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Modified Julian Date of the Unix epoch.
const MJD_UNIX_EPOCH: f64 = 40587.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// A calendar month, the unit of work for the archive backfill (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

/// First month of the archive backfill.
pub const ARCHIVE_START: Month = Month {
    year: 2022,
    month: 1,
};

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::validation("month", format!("month {} is not in 1..=12", month)));
        }
        if !(1..=9999).contains(&year) {
            return Err(Error::validation("month", format!("year {} is out of range", year)));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: &impl Datelike) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn current() -> Self {
        Self::of(&Utc::now())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following calendar month.
    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Midnight UTC on the first day of the month (inclusive lower bound).
    pub fn start(self) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Midnight UTC on the first day of the next month (exclusive upper bound).
    pub fn end(self) -> DateTime<Utc> {
        self.succ().start()
    }

    /// The month as a half-open MJD interval, the archive's native time unit.
    pub fn mjd_range(self) -> (f64, f64) {
        (datetime_to_mjd(self.start()), datetime_to_mjd(self.end()))
    }

    /// Every month from `self` up to, but excluding, `end`.
    pub fn until(self, end: Month) -> impl Iterator<Item = Month> {
        std::iter::successors(Some(self), |m| Some(m.succ())).take_while(move |m| *m < end)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation("month", format!("expected YYYY-MM, got '{}'", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Month::new(year, month)
    }
}

pub fn datetime_to_mjd(dt: DateTime<Utc>) -> f64 {
    let seconds = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1e6;
    seconds / SECONDS_PER_DAY + MJD_UNIX_EPOCH
}

pub fn mjd_to_datetime(mjd: f64) -> Option<DateTime<Utc>> {
    if !mjd.is_finite() {
        return None;
    }
    let micros = ((mjd - MJD_UNIX_EPOCH) * SECONDS_PER_DAY * 1e6).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Fixed-width RFC 3339 form used for persisted timestamps; lexical order
/// matches chronological order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
