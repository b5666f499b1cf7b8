//! Jurisdiction business-day calendars.
//!
//! # Invariants
//! - A calendar always has at least one business weekday.
//! - Roll-forward never moves a date backwards.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

/// Upper bound on consecutive non-business days skipped by roll-forward.
const MAX_ROLL_FORWARD_DAYS: u32 = 3660;

/// Weekend days plus explicit public holidays for one jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    weekend: BTreeSet<u32>,
    holidays: BTreeSet<NaiveDate>,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::weekends_only()
    }
}

impl BusinessCalendar {
    /// Saturday/Sunday weekend, no holidays.
    pub fn weekends_only() -> Self {
        Self::new([Weekday::Sat, Weekday::Sun], [])
    }

    pub fn new(
        weekend: impl IntoIterator<Item = Weekday>,
        holidays: impl IntoIterator<Item = NaiveDate>,
    ) -> Self {
        Self {
            weekend: weekend
                .into_iter()
                .map(|day| day.num_days_from_monday())
                .collect(),
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Returns whether every weekday is configured as weekend.
    pub fn has_no_business_weekday(&self) -> bool {
        self.weekend.len() >= 7
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !self.weekend.contains(&date.weekday().num_days_from_monday())
            && !self.holidays.contains(&date)
    }

    /// Returns `date` if it is a business day, else the next business day.
    ///
    /// Returns `None` when no business day is found within the bounded search
    /// or the date range overflows.
    pub fn roll_forward(&self, date: NaiveDate) -> Option<NaiveDate> {
        let mut candidate = date;
        for _ in 0..MAX_ROLL_FORWARD_DAYS {
            if self.is_business_day(candidate) {
                return Some(candidate);
            }
            candidate = candidate.succ_opt()?;
        }
        None
    }

    pub fn holidays(&self) -> impl Iterator<Item = &NaiveDate> {
        self.holidays.iter()
    }
}

/// Parses a weekday name (`sat`, `saturday`, case-insensitive).
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}
