//! # Temporal Module
//!
//! Calendar-day validity intervals for versioned dimension records.
//! Intervals are half-open: `valid_from` is inclusive, `valid_to` is exclusive.
//! A version with no known end carries [`ValidTo::Open`], which on the wire is the
//! sentinel date `9999-12-31`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use time::macros::format_description;
use time::{Date, Duration};

/// Wire representation of an open end.
pub const OPEN_END_SENTINEL: &str = "9999-12-31";

/// Parse an ISO `YYYY-MM-DD` calendar date.
pub fn parse_day(raw: &str) -> Result<Date, time::error::Parse> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
}

/// Format a calendar date as ISO `YYYY-MM-DD`.
pub fn format_day(day: Date) -> String {
    day.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| day.to_string())
}

/// The date `days` calendar days before `day`, saturating at the earliest representable date.
pub fn days_before(day: Date, days: u32) -> Date {
    day.checked_sub(Duration::days(i64::from(days)))
        .unwrap_or(Date::MIN)
}

/// Exclusive end of a validity interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidTo {
    /// The version stopped applying on this date (exclusive).
    Until(Date),
    /// No known end yet.
    Open,
}

impl ValidTo {
    /// Parse an end date; the sentinel maps to [`ValidTo::Open`].
    pub fn parse(raw: &str) -> Result<Self, time::error::Parse> {
        let raw = raw.trim();
        if raw == OPEN_END_SENTINEL {
            return Ok(ValidTo::Open);
        }
        parse_day(raw).map(ValidTo::Until)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ValidTo::Open)
    }

    /// The closed end date, if any.
    pub fn date(&self) -> Option<Date> {
        match self {
            ValidTo::Until(day) => Some(*day),
            ValidTo::Open => None,
        }
    }

    /// True when `day` falls before this end.
    #[inline]
    pub fn is_after(&self, day: Date) -> bool {
        match self {
            ValidTo::Until(end) => day < *end,
            ValidTo::Open => true,
        }
    }
}

impl fmt::Display for ValidTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidTo::Until(day) => f.write_str(&format_day(*day)),
            ValidTo::Open => f.write_str(OPEN_END_SENTINEL),
        }
    }
}

impl PartialOrd for ValidTo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValidTo {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ValidTo::Until(a), ValidTo::Until(b)) => a.cmp(b),
            (ValidTo::Until(_), ValidTo::Open) => Ordering::Less,
            (ValidTo::Open, ValidTo::Until(_)) => Ordering::Greater,
            (ValidTo::Open, ValidTo::Open) => Ordering::Equal,
        }
    }
}

/// How a dimension file stores the end of a closed version.
///
/// In memory every end is exclusive; the convention only applies when reading
/// and writing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EndDates {
    /// `valid_to` is the first day the version no longer applies.
    Exclusive,
    /// `valid_to` is the last day the version applies.
    #[default]
    Inclusive,
}

impl EndDates {
    /// Convert a stored end into an exclusive one.
    pub fn to_exclusive(self, stored: ValidTo) -> ValidTo {
        match (self, stored) {
            (EndDates::Inclusive, ValidTo::Until(last)) => {
                last.next_day().map_or(ValidTo::Open, ValidTo::Until)
            }
            _ => stored,
        }
    }

    /// Convert an exclusive end back into its stored form.
    pub fn to_stored(self, end: ValidTo) -> ValidTo {
        match (self, end) {
            (EndDates::Inclusive, ValidTo::Until(end)) => {
                ValidTo::Until(end.previous_day().unwrap_or(end))
            }
            _ => end,
        }
    }
}

/// Relationship between a version and the one that follows it in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Succession {
    /// The successor starts on the predecessor's exclusive end.
    Adjacent,
    /// Days between the two versions are covered by neither.
    Gap,
    /// The successor starts before the predecessor ends.
    Overlap,
    /// The successor starts before the predecessor starts.
    OutOfOrder,
    /// The predecessor is open-ended, so nothing may follow it.
    AfterOpenEnd,
}

/// A validity interval `[from, to)` over calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Validity {
    /// First day the version applies (inclusive)
    pub from: Date,
    /// Day the version stops applying (exclusive)
    pub to: ValidTo,
}

impl Validity {
    /// Create a new validity interval.
    ///
    /// # Errors
    /// Returns an error if a closed end does not fall after `from`.
    pub fn new(from: Date, to: ValidTo) -> anyhow::Result<Self> {
        if let ValidTo::Until(end) = to {
            if end <= from {
                anyhow::bail!(
                    "Invalid validity: valid_from ({}) must be before valid_to ({})",
                    format_day(from),
                    format_day(end)
                );
            }
        }
        Ok(Self { from, to })
    }

    /// Create an interval from a stored row whose end follows `end_dates`.
    ///
    /// # Errors
    /// Returns an error if the converted end does not fall after `from`.
    pub fn from_stored(from: Date, stored_to: ValidTo, end_dates: EndDates) -> anyhow::Result<Self> {
        Self::new(from, end_dates.to_exclusive(stored_to))
    }

    /// Create an open-ended interval starting on `from`.
    pub fn open(from: Date) -> Self {
        Self {
            from,
            to: ValidTo::Open,
        }
    }

    /// Check if this interval contains a specific day.
    #[inline]
    pub fn contains(&self, day: Date) -> bool {
        self.from <= day && self.to.is_after(day)
    }

    pub fn is_open(&self) -> bool {
        self.to.is_open()
    }

    /// Half-open overlap test; an open end behaves as +infinity.
    pub fn overlaps(&self, other: &Validity) -> bool {
        self.to.is_after(other.from) && other.to.is_after(self.from)
    }

    /// The interval from the start of `self` to the end of `last`.
    pub fn span_to(&self, last: &Validity) -> Validity {
        Validity {
            from: self.from,
            to: last.to,
        }
    }

    /// Classify how `next` follows `self`.
    pub fn succession(&self, next: &Validity) -> Succession {
        if next.from < self.from {
            return Succession::OutOfOrder;
        }
        let end = match self.to {
            ValidTo::Open => return Succession::AfterOpenEnd,
            ValidTo::Until(end) => end,
        };
        match next.from.cmp(&end) {
            Ordering::Less => Succession::Overlap,
            Ordering::Equal => Succession::Adjacent,
            Ordering::Greater => Succession::Gap,
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            ValidTo::Until(end) => write!(f, "[{}, {})", format_day(self.from), format_day(end)),
            ValidTo::Open => write!(f, "[{}, +∞)", format_day(self.from)),
        }
    }
}

impl PartialOrd for Validity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Validity {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.from.cmp(&other.from) {
            Ordering::Equal => self.to.cmp(&other.to),
            ordering => ordering,
        }
    }
}

/// Compute the union of a set of intervals as a minimal sorted list.
///
/// Overlapping and touching intervals are merged; any day not covered by an input
/// interval stays uncovered. Two coverages are equal exactly when they cover the
/// same days.
pub fn coverage(intervals: &[Validity]) -> Vec<Validity> {
    if intervals.is_empty() {
        return Vec::new();
    }

    let mut sorted = intervals.to_vec();
    sorted.sort();

    let mut result = Vec::with_capacity(sorted.len());
    let mut current = sorted[0];

    for interval in sorted.iter().skip(1) {
        let touches = match current.to {
            ValidTo::Open => true,
            ValidTo::Until(end) => interval.from <= end,
        };
        if touches {
            current.to = current.to.max(interval.to);
        } else {
            result.push(current);
            current = *interval;
        }
    }

    result.push(current);
    result
}
