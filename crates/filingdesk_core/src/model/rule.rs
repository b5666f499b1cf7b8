//! Obligation rule model.
//!
//! # Responsibility
//! - Describe recurring statutory filing requirements as reference data.
//! - Express due-date logic as one tagged variant interpreted by a single
//!   calculator instead of per-rule code.
//!
//! # Invariants
//! - Rules are immutable once loaded into a catalog.
//! - `validate()` must pass before a rule is accepted into a catalog.

use crate::model::company::{CompanyProfile, EntityType};
use crate::model::period::Periodicity;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted `offset_days` value.
pub const MAX_OFFSET_DAYS: u32 = 366;

/// Largest accepted `year_offset` of a fixed-date rule.
pub const MAX_YEAR_OFFSET: i32 = 5;

/// Regulatory family of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceCategory {
    Gst,
    IncomeTax,
    Tds,
    Mca,
    Pf,
    Esi,
    Pt,
    Labour,
    Environmental,
    Other,
}

/// Priority used for ordering dashboards and escalations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// How the raw due date is derived from a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DueRule {
    /// `days` calendar days after the period end.
    OffsetDays { days: u32 },
    /// Given day of the month after the period end, clamped to month end.
    DayOfFollowingMonth { day: u32 },
    /// Fixed calendar date in the period-end year plus `year_offset`.
    FixedDate {
        month: u32,
        day: u32,
        #[serde(default)]
        year_offset: i32,
    },
}

/// Entity predicate deciding whether a rule binds a company.
///
/// Empty lists mean "no restriction".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Applicability {
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    #[serde(default)]
    pub min_turnover: Option<u64>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl Applicability {
    pub fn matches(&self, company: &CompanyProfile) -> bool {
        if !self.entity_types.is_empty() && !self.entity_types.contains(&company.entity_type) {
            return false;
        }
        if let Some(threshold) = self.min_turnover {
            // Unknown turnover cannot prove the threshold is met.
            match company.annual_turnover {
                Some(turnover) if turnover >= threshold => {}
                _ => return false,
            }
        }
        if !self.states.is_empty() {
            let Some(state) = company.state.as_deref() else {
                return false;
            };
            if !self
                .states
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(state))
            {
                return false;
            }
        }
        true
    }
}

/// Rule validation failures surfaced at catalog load time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleValidationError {
    #[error("rule code must not be blank")]
    BlankCode,
    #[error("rule name must not be blank")]
    BlankName,
    #[error("rule jurisdiction must not be blank")]
    BlankJurisdiction,
    #[error("offset_days {0} exceeds the 366 day maximum")]
    OffsetOutOfRange(u32),
    #[error("due day {0} must be within 1..=31")]
    DayOutOfRange(u32),
    #[error("year_offset {0} must be within 0..=5")]
    YearOffsetOutOfRange(i32),
    #[error("due month {0} must be within 1..=12")]
    MonthOutOfRange(u32),
    #[error("fixed_date due rules require annual periodicity, got {0}")]
    FixedDateRequiresAnnual(Periodicity),
    #[error("effective_to {to} is earlier than effective_from {from}")]
    EffectiveRangeInverted { from: NaiveDate, to: NaiveDate },
}

/// Recurring filing requirement template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationRule {
    /// Stable unique code, e.g. `GSTR-3B`.
    pub code: String,
    pub name: String,
    /// Country code, e.g. `IN`.
    pub jurisdiction: String,
    pub category: ComplianceCategory,
    pub form_name: String,
    #[serde(default)]
    pub act_name: Option<String>,
    pub periodicity: Periodicity,
    pub due_rule: DueRule,
    #[serde(default)]
    pub applicability: Applicability,
    pub effective_from: NaiveDate,
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    #[serde(default)]
    pub priority: Priority,
}

impl ObligationRule {
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.code.trim().is_empty() {
            return Err(RuleValidationError::BlankCode);
        }
        if self.name.trim().is_empty() {
            return Err(RuleValidationError::BlankName);
        }
        if self.jurisdiction.trim().is_empty() {
            return Err(RuleValidationError::BlankJurisdiction);
        }

        match self.due_rule {
            DueRule::OffsetDays { days } if days > MAX_OFFSET_DAYS => {
                return Err(RuleValidationError::OffsetOutOfRange(days));
            }
            DueRule::DayOfFollowingMonth { day } if !(1..=31).contains(&day) => {
                return Err(RuleValidationError::DayOutOfRange(day));
            }
            DueRule::FixedDate {
                month,
                day,
                year_offset,
            } => {
                if !(0..=MAX_YEAR_OFFSET).contains(&year_offset) {
                    return Err(RuleValidationError::YearOffsetOutOfRange(year_offset));
                }
                if !(1..=12).contains(&month) {
                    return Err(RuleValidationError::MonthOutOfRange(month));
                }
                if !(1..=31).contains(&day) {
                    return Err(RuleValidationError::DayOutOfRange(day));
                }
                if self.periodicity != Periodicity::Annual {
                    return Err(RuleValidationError::FixedDateRequiresAnnual(
                        self.periodicity,
                    ));
                }
            }
            _ => {}
        }

        if let Some(to) = self.effective_to {
            if to < self.effective_from {
                return Err(RuleValidationError::EffectiveRangeInverted {
                    from: self.effective_from,
                    to,
                });
            }
        }

        Ok(())
    }

    /// Returns whether this rule binds `company` (subscription, jurisdiction
    /// and entity predicate all hold).
    pub fn applies_to(&self, company: &CompanyProfile) -> bool {
        company.is_subscribed(&self.code)
            && self.jurisdiction.eq_ignore_ascii_case(&company.jurisdiction)
            && self.applicability.matches(company)
    }
}
