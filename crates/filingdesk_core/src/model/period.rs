//! Filing period arithmetic.
//!
//! # Responsibility
//! - Parse and format period labels (`2025-10`, `2025-Q2`, `2025-H1`, `2025`).
//! - Resolve period bounds and successor periods for every periodicity.
//!
//! # Invariants
//! - Monthly periods are calendar months and ignore the fiscal start month.
//! - Quarterly, half-yearly and annual periods are fiscal: the label year is
//!   the year in which the fiscal year starts.
//! - `start() <= end()` and `next().start() == end() + 1 day`.

use chrono::{Datelike, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

static MONTHLY_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("valid monthly label regex"));
static QUARTERLY_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-Q([1-4])$").expect("valid quarterly label regex"));
static HALF_YEARLY_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-H([12])$").expect("valid half-yearly label regex"));
static ANNUAL_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})$").expect("valid annual label regex"));

/// How often an obligation recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodicity {
    Monthly,
    Quarterly,
    HalfYearly,
    Annual,
}

impl Periodicity {
    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::HalfYearly => "half_yearly",
            Self::Annual => "annual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "half_yearly" => Some(Self::HalfYearly),
            "annual" => Some(Self::Annual),
            _ => None,
        }
    }

    /// Number of calendar months covered by one period.
    pub fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::HalfYearly => 6,
            Self::Annual => 12,
        }
    }

    fn slots_per_year(self) -> u32 {
        12 / self.months()
    }
}

impl Display for Periodicity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from period parsing and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    /// Label does not match the shape required by the periodicity.
    #[error("invalid {periodicity} period label `{label}`")]
    InvalidLabel {
        label: String,
        periodicity: Periodicity,
    },
    /// Fiscal year start month outside `1..=12`.
    #[error("fiscal year start month must be within 1..=12, got {0}")]
    InvalidFiscalStartMonth(u32),
    /// Period bounds fall outside the supported date range.
    #[error("period year {0} is out of the supported range")]
    OutOfRange(i32),
}

/// One concrete filing period, e.g. October 2025 or fiscal Q2 of 2025.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    periodicity: Periodicity,
    year: i32,
    index: u32,
    start: NaiveDate,
    end: NaiveDate,
    fiscal_start_month: u32,
}

impl Period {
    /// Builds a period from its label components.
    ///
    /// `index` is the calendar month for monthly periods and the 1-based slot
    /// inside the fiscal year otherwise.
    pub fn new(
        periodicity: Periodicity,
        year: i32,
        index: u32,
        fiscal_start_month: u32,
    ) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&fiscal_start_month) {
            return Err(PeriodError::InvalidFiscalStartMonth(fiscal_start_month));
        }
        if index == 0 || index > periodicity.slots_per_year() {
            return Err(PeriodError::InvalidLabel {
                label: format!("{year}/{index}"),
                periodicity,
            });
        }

        // Monthly labels are calendar months; normalize so equal months compare equal.
        let fiscal_start_month = match periodicity {
            Periodicity::Monthly => 1,
            _ => fiscal_start_month,
        };
        let start_offset = (fiscal_start_month - 1) + (index - 1) * periodicity.months();
        let start_year = year + (start_offset / 12) as i32;
        let start_month = start_offset % 12 + 1;

        let start = NaiveDate::from_ymd_opt(start_year, start_month, 1)
            .ok_or(PeriodError::OutOfRange(year))?;
        let end = start
            .checked_add_months(Months::new(periodicity.months()))
            .and_then(|next_start| next_start.pred_opt())
            .ok_or(PeriodError::OutOfRange(year))?;

        Ok(Self {
            periodicity,
            year,
            index,
            start,
            end,
            fiscal_start_month,
        })
    }

    /// Parses a period label for the given periodicity.
    pub fn parse(
        label: &str,
        periodicity: Periodicity,
        fiscal_start_month: u32,
    ) -> Result<Self, PeriodError> {
        let invalid = || PeriodError::InvalidLabel {
            label: label.to_string(),
            periodicity,
        };
        let trimmed = label.trim();
        let regex = match periodicity {
            Periodicity::Monthly => &MONTHLY_LABEL_RE,
            Periodicity::Quarterly => &QUARTERLY_LABEL_RE,
            Periodicity::HalfYearly => &HALF_YEARLY_LABEL_RE,
            Periodicity::Annual => &ANNUAL_LABEL_RE,
        };
        let caps = regex.captures(trimmed).ok_or_else(invalid)?;
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let index: u32 = match caps.get(2) {
            Some(value) => value.as_str().parse().map_err(|_| invalid())?,
            None => 1,
        };
        if periodicity == Periodicity::Monthly && !(1..=12).contains(&index) {
            return Err(invalid());
        }

        Self::new(periodicity, year, index, fiscal_start_month).map_err(|err| match err {
            PeriodError::InvalidLabel { .. } => invalid(),
            other => other,
        })
    }

    /// Returns the period of the given periodicity that contains `date`.
    pub fn containing(
        date: NaiveDate,
        periodicity: Periodicity,
        fiscal_start_month: u32,
    ) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&fiscal_start_month) {
            return Err(PeriodError::InvalidFiscalStartMonth(fiscal_start_month));
        }
        if periodicity == Periodicity::Monthly {
            return Self::new(periodicity, date.year(), date.month(), fiscal_start_month);
        }

        let fiscal_year = if date.month() >= fiscal_start_month {
            date.year()
        } else {
            date.year() - 1
        };
        let months_into_year = (date.month() + 12 - fiscal_start_month) % 12;
        let index = months_into_year / periodicity.months() + 1;
        Self::new(periodicity, fiscal_year, index, fiscal_start_month)
    }

    /// Returns the immediately following period.
    pub fn next(&self) -> Result<Self, PeriodError> {
        let (year, index) = if self.index >= self.periodicity.slots_per_year() {
            (self.year + 1, 1)
        } else {
            (self.year, self.index + 1)
        };
        Self::new(self.periodicity, year, index, self.fiscal_start_month)
    }

    pub fn periodicity(&self) -> Periodicity {
        self.periodicity
    }

    /// First day of the period (inclusive).
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the period (inclusive).
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Canonical label, stable across storage and API boundaries.
    pub fn label(&self) -> String {
        match self.periodicity {
            Periodicity::Monthly => format!("{:04}-{:02}", self.year, self.index),
            Periodicity::Quarterly => format!("{:04}-Q{}", self.year, self.index),
            Periodicity::HalfYearly => format!("{:04}-H{}", self.year, self.index),
            Periodicity::Annual => format!("{:04}", self.year),
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::{Period, PeriodError, Periodicity};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_label_resolves_calendar_bounds() {
        let period = Period::parse("2025-10", Periodicity::Monthly, 4).unwrap();
        assert_eq!(period.start(), date(2025, 10, 1));
        assert_eq!(period.end(), date(2025, 10, 31));
        assert_eq!(period.label(), "2025-10");
    }

    #[test]
    fn fiscal_quarters_follow_start_month() {
        let q1 = Period::parse("2025-Q1", Periodicity::Quarterly, 4).unwrap();
        assert_eq!(q1.start(), date(2025, 4, 1));
        assert_eq!(q1.end(), date(2025, 6, 30));

        let q4 = Period::parse("2025-Q4", Periodicity::Quarterly, 4).unwrap();
        assert_eq!(q4.start(), date(2026, 1, 1));
        assert_eq!(q4.end(), date(2026, 3, 31));
    }

    #[test]
    fn annual_period_spans_fiscal_year() {
        let fy = Period::parse("2025", Periodicity::Annual, 4).unwrap();
        assert_eq!(fy.start(), date(2025, 4, 1));
        assert_eq!(fy.end(), date(2026, 3, 31));

        let calendar = Period::parse("2025", Periodicity::Annual, 1).unwrap();
        assert_eq!(calendar.end(), date(2025, 12, 31));
    }

    #[test]
    fn containing_maps_early_months_to_previous_fiscal_year() {
        let period = Period::containing(date(2026, 2, 14), Periodicity::HalfYearly, 4).unwrap();
        assert_eq!(period.label(), "2025-H2");
        assert_eq!(period.start(), date(2025, 10, 1));
        assert_eq!(period.end(), date(2026, 3, 31));
    }

    #[test]
    fn next_wraps_into_following_year() {
        let december = Period::parse("2025-12", Periodicity::Monthly, 4).unwrap();
        assert_eq!(december.next().unwrap().label(), "2026-01");

        let q4 = Period::parse("2025-Q4", Periodicity::Quarterly, 4).unwrap();
        assert_eq!(q4.next().unwrap().label(), "2026-Q1");
    }

    #[test]
    fn malformed_labels_are_rejected() {
        for (label, periodicity) in [
            ("2025-13", Periodicity::Monthly),
            ("2025-00", Periodicity::Monthly),
            ("2025-Q5", Periodicity::Quarterly),
            ("2025-10", Periodicity::Quarterly),
            ("FY2025", Periodicity::Annual),
            ("2025-H3", Periodicity::HalfYearly),
        ] {
            let err = Period::parse(label, periodicity, 4).unwrap_err();
            assert!(matches!(err, PeriodError::InvalidLabel { .. }), "{label}");
        }
    }

    #[test]
    fn invalid_fiscal_start_month_is_rejected() {
        let err = Period::parse("2025-Q1", Periodicity::Quarterly, 13).unwrap_err();
        assert_eq!(err, PeriodError::InvalidFiscalStartMonth(13));
    }
}
