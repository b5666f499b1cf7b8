//! Due-date calculator.
//!
//! # Responsibility
//! - Interpret a rule's `DueRule` variant against one period.
//! - Apply business-day roll-forward for the rule's jurisdiction.
//!
//! # Invariants
//! - Pure: the same (rule, period, calendar) always yields the same date.
//! - The computed due date is never earlier than the period end.
//! - Periods entirely before `effective_from` are rejected, never silently
//!   shifted.

use crate::calendar::business_calendar::BusinessCalendar;
use crate::model::period::{Period, PeriodError, Periodicity};
use crate::model::rule::{DueRule, ObligationRule};
use chrono::{Datelike, Days, Months, NaiveDate};
use thiserror::Error;

/// Errors from due-date computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DueDateError {
    /// Rule code is not present in the catalog.
    #[error("unknown obligation rule `{0}`")]
    UnknownRule(String),
    /// Period label could not be parsed.
    #[error(transparent)]
    Period(#[from] PeriodError),
    /// Period periodicity differs from the rule's.
    #[error("rule `{rule_code}` is {expected}, got a {actual} period")]
    PeriodicityMismatch {
        rule_code: String,
        expected: Periodicity,
        actual: Periodicity,
    },
    /// Requested period ends before the rule became effective.
    #[error("period {period} predates rule `{rule_code}` effective from {effective_from}")]
    InvalidPeriod {
        rule_code: String,
        period: String,
        effective_from: NaiveDate,
    },
    /// Requested period starts after the rule was retired.
    #[error("period {period} starts after rule `{rule_code}` ended on {effective_to}")]
    RuleRetired {
        rule_code: String,
        period: String,
        effective_to: NaiveDate,
    },
    /// Rule configuration puts the due date before the period closes.
    #[error("rule `{rule_code}` yields due date {due_date} before period {period} ends")]
    DueBeforePeriodEnd {
        rule_code: String,
        period: String,
        due_date: NaiveDate,
    },
    /// No business day found after the raw due date.
    #[error("no business day found on or after {from} for rule `{rule_code}`")]
    NoBusinessDay { rule_code: String, from: NaiveDate },
    /// Date arithmetic left the supported range.
    #[error("due date for rule `{rule_code}` period {period} is out of range")]
    OutOfRange { rule_code: String, period: String },
}

/// Rejects periods outside the rule's effective range.
pub fn check_effective(rule: &ObligationRule, period: &Period) -> Result<(), DueDateError> {
    if period.periodicity() != rule.periodicity {
        return Err(DueDateError::PeriodicityMismatch {
            rule_code: rule.code.clone(),
            expected: rule.periodicity,
            actual: period.periodicity(),
        });
    }
    if period.end() < rule.effective_from {
        return Err(DueDateError::InvalidPeriod {
            rule_code: rule.code.clone(),
            period: period.label(),
            effective_from: rule.effective_from,
        });
    }
    if let Some(effective_to) = rule.effective_to {
        if period.start() > effective_to {
            return Err(DueDateError::RuleRetired {
                rule_code: rule.code.clone(),
                period: period.label(),
                effective_to,
            });
        }
    }
    Ok(())
}

/// Computes the statutory due date before business-day adjustment.
pub fn raw_due_date(rule: &ObligationRule, period: &Period) -> Result<NaiveDate, DueDateError> {
    check_effective(rule, period)?;
    let out_of_range = || DueDateError::OutOfRange {
        rule_code: rule.code.clone(),
        period: period.label(),
    };
    let period_end = period.end();

    let due_date = match rule.due_rule {
        DueRule::OffsetDays { days } => period_end
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(out_of_range)?,
        DueRule::DayOfFollowingMonth { day } => {
            let following = period_end
                .checked_add_months(Months::new(1))
                .ok_or_else(out_of_range)?;
            clamped_date(following.year(), following.month(), day).ok_or_else(out_of_range)?
        }
        DueRule::FixedDate {
            month,
            day,
            year_offset,
        } => {
            let year = period_end
                .year()
                .checked_add(year_offset)
                .ok_or_else(out_of_range)?;
            clamped_date(year, month, day).ok_or_else(out_of_range)?
        }
    };

    if due_date < period_end {
        return Err(DueDateError::DueBeforePeriodEnd {
            rule_code: rule.code.clone(),
            period: period.label(),
            due_date,
        });
    }
    Ok(due_date)
}

/// Computes the concrete due date, rolled forward to a business day.
pub fn compute_due_date(
    rule: &ObligationRule,
    period: &Period,
    calendar: &BusinessCalendar,
) -> Result<NaiveDate, DueDateError> {
    let raw = raw_due_date(rule, period)?;
    calendar
        .roll_forward(raw)
        .ok_or_else(|| DueDateError::NoBusinessDay {
            rule_code: rule.code.clone(),
            from: raw,
        })
}

/// Builds `year-month-day`, clamping `day` to the month's last day.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last_day = first.checked_add_months(Months::new(1))?.pred_opt()?.day();
    NaiveDate::from_ymd_opt(year, month, day.min(last_day))
}

#[cfg(test)]
mod tests {
    use super::{clamped_date, compute_due_date, raw_due_date, DueDateError};
    use crate::calendar::business_calendar::BusinessCalendar;
    use crate::model::period::{Period, Periodicity};
    use crate::model::rule::{Applicability, ComplianceCategory, DueRule, ObligationRule, Priority};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rule(periodicity: Periodicity, due_rule: DueRule) -> ObligationRule {
        ObligationRule {
            code: "TEST".to_string(),
            name: "Test filing".to_string(),
            jurisdiction: "IN".to_string(),
            category: ComplianceCategory::Other,
            form_name: "TEST".to_string(),
            act_name: None,
            periodicity,
            due_rule,
            applicability: Applicability::default(),
            effective_from: date(2020, 1, 1),
            effective_to: None,
            priority: Priority::Medium,
        }
    }

    #[test]
    fn day_of_following_month_clamps_to_month_end() {
        let rule = rule(Periodicity::Monthly, DueRule::DayOfFollowingMonth { day: 31 });
        let january = Period::parse("2025-01", Periodicity::Monthly, 4).unwrap();
        assert_eq!(raw_due_date(&rule, &january).unwrap(), date(2025, 2, 28));
    }

    #[test]
    fn fixed_date_uses_period_end_year() {
        let rule = rule(
            Periodicity::Annual,
            DueRule::FixedDate {
                month: 10,
                day: 31,
                year_offset: 0,
            },
        );
        let fy = Period::parse("2024", Periodicity::Annual, 4).unwrap();
        assert_eq!(raw_due_date(&rule, &fy).unwrap(), date(2025, 10, 31));
    }

    #[test]
    fn fixed_date_before_period_end_is_rejected() {
        let rule = rule(
            Periodicity::Annual,
            DueRule::FixedDate {
                month: 1,
                day: 15,
                year_offset: 0,
            },
        );
        let fy = Period::parse("2024", Periodicity::Annual, 4).unwrap();
        assert!(matches!(
            raw_due_date(&rule, &fy),
            Err(DueDateError::DueBeforePeriodEnd { .. })
        ));
    }

    #[test]
    fn weekend_due_date_rolls_to_monday() {
        // 2025-12-20 is a Saturday.
        let rule = rule(Periodicity::Monthly, DueRule::OffsetDays { days: 20 });
        let november = Period::parse("2025-11", Periodicity::Monthly, 4).unwrap();
        let due = compute_due_date(&rule, &november, &BusinessCalendar::weekends_only()).unwrap();
        assert_eq!(due, date(2025, 12, 22));
    }

    #[test]
    fn mismatched_periodicity_is_rejected() {
        let rule = rule(Periodicity::Monthly, DueRule::OffsetDays { days: 20 });
        let quarter = Period::parse("2025-Q1", Periodicity::Quarterly, 4).unwrap();
        assert!(matches!(
            raw_due_date(&rule, &quarter),
            Err(DueDateError::PeriodicityMismatch { .. })
        ));
    }

    #[test]
    fn clamped_date_handles_leap_years() {
        assert_eq!(clamped_date(2024, 2, 30), Some(date(2024, 2, 29)));
        assert_eq!(clamped_date(2025, 2, 30), Some(date(2025, 2, 28)));
        assert_eq!(clamped_date(2025, 13, 1), None);
    }
}
