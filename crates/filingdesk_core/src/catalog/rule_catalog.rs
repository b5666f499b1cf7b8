//! Rule catalog loading and lookup.
//!
//! # Responsibility
//! - Load obligation rules and business calendars from a JSON document.
//! - Validate every definition up front and fail fast on the first problem.
//! - Resolve rules, periods and due dates for the rest of the engine.
//!
//! # Invariants
//! - Rule codes are unique within a catalog.
//! - A loaded catalog never changes.
//! - Jurisdictions without a configured calendar use a weekend-only calendar.

use crate::calendar::business_calendar::{parse_weekday, BusinessCalendar};
use crate::calendar::due_date::{compute_due_date, DueDateError};
use crate::model::company::CompanyProfile;
use crate::model::period::{Period, PeriodError};
use crate::model::rule::{ObligationRule, RuleValidationError};
use chrono::NaiveDate;
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BUILTIN_CATALOG_JSON: &str = include_str!("default_catalog.json");
const DEFAULT_FISCAL_YEAR_START_MONTH: u32 = 4;

/// Catalog loading and validation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read rule catalog `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed rule catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid rule `{code}`: {source}")]
    InvalidRule {
        code: String,
        #[source]
        source: RuleValidationError,
    },
    #[error("duplicate rule code `{0}`")]
    DuplicateRule(String),
    #[error("duplicate calendar for jurisdiction `{0}`")]
    DuplicateCalendar(String),
    #[error("fiscal_year_start_month must be within 1..=12, got {0}")]
    InvalidFiscalStartMonth(u32),
    #[error("calendar `{jurisdiction}` has unknown weekday `{value}`")]
    InvalidWeekday { jurisdiction: String, value: String },
    #[error("calendar `{0}` declares every weekday as weekend")]
    NoBusinessWeekday(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    #[serde(default = "default_fiscal_year_start_month")]
    fiscal_year_start_month: u32,
    #[serde(default)]
    calendars: BTreeMap<String, CalendarDocument>,
    rules: Vec<ObligationRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CalendarDocument {
    #[serde(default = "default_weekend")]
    weekend: Vec<String>,
    #[serde(default)]
    holidays: Vec<NaiveDate>,
}

fn default_fiscal_year_start_month() -> u32 {
    DEFAULT_FISCAL_YEAR_START_MONTH
}

fn default_weekend() -> Vec<String> {
    vec!["saturday".to_string(), "sunday".to_string()]
}

/// Immutable, validated set of obligation rules and calendars.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    fiscal_year_start_month: u32,
    rules: BTreeMap<String, ObligationRule>,
    calendars: BTreeMap<String, BusinessCalendar>,
    fallback_calendar: BusinessCalendar,
}

impl RuleCatalog {
    /// Loads the catalog compiled into this crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG_JSON)
    }

    /// Loads and validates a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a catalog document.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(raw)?;
        Self::from_document(document)
    }

    fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        if !(1..=12).contains(&document.fiscal_year_start_month) {
            return Err(CatalogError::InvalidFiscalStartMonth(
                document.fiscal_year_start_month,
            ));
        }

        let mut calendars = BTreeMap::new();
        for (jurisdiction, spec) in document.calendars {
            let mut weekend = Vec::with_capacity(spec.weekend.len());
            for value in &spec.weekend {
                let day = parse_weekday(value).ok_or_else(|| CatalogError::InvalidWeekday {
                    jurisdiction: jurisdiction.clone(),
                    value: value.clone(),
                })?;
                weekend.push(day);
            }
            let calendar = BusinessCalendar::new(weekend, spec.holidays);
            if calendar.has_no_business_weekday() {
                return Err(CatalogError::NoBusinessWeekday(jurisdiction));
            }
            let key = jurisdiction.trim().to_ascii_uppercase();
            if calendars.contains_key(key.as_str()) {
                return Err(CatalogError::DuplicateCalendar(key));
            }
            calendars.insert(key, calendar);
        }

        let mut rules = BTreeMap::new();
        for rule in document.rules {
            rule.validate().map_err(|source| CatalogError::InvalidRule {
                code: rule.code.clone(),
                source,
            })?;
            if rules.contains_key(rule.code.as_str()) {
                return Err(CatalogError::DuplicateRule(rule.code));
            }
            rules.insert(rule.code.clone(), rule);
        }

        info!(
            "event=catalog_load module=catalog status=ok rules={} calendars={} fiscal_start_month={}",
            rules.len(),
            calendars.len(),
            document.fiscal_year_start_month
        );

        Ok(Self {
            fiscal_year_start_month: document.fiscal_year_start_month,
            rules,
            calendars,
            fallback_calendar: BusinessCalendar::weekends_only(),
        })
    }

    pub fn fiscal_year_start_month(&self) -> u32 {
        self.fiscal_year_start_month
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&ObligationRule> {
        self.rules.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rules.contains_key(code)
    }

    /// Rules sorted by code.
    pub fn rules(&self) -> impl Iterator<Item = &ObligationRule> {
        self.rules.values()
    }

    /// Business calendar for a jurisdiction code.
    pub fn calendar_for(&self, jurisdiction: &str) -> &BusinessCalendar {
        self.calendars
            .get(jurisdiction.trim().to_ascii_uppercase().as_str())
            .unwrap_or(&self.fallback_calendar)
    }

    /// Rules binding `company`, sorted by code.
    pub fn applicable_rules<'a>(
        &'a self,
        company: &'a CompanyProfile,
    ) -> impl Iterator<Item = &'a ObligationRule> + 'a {
        self.rules.values().filter(|rule| rule.applies_to(company))
    }

    /// Parses a period label using the rule's periodicity.
    pub fn parse_period(&self, rule: &ObligationRule, label: &str) -> Result<Period, PeriodError> {
        Period::parse(label, rule.periodicity, self.fiscal_year_start_month)
    }

    /// Period of the rule's periodicity that contains `date`.
    pub fn period_containing(
        &self,
        rule: &ObligationRule,
        date: NaiveDate,
    ) -> Result<Period, PeriodError> {
        Period::containing(date, rule.periodicity, self.fiscal_year_start_month)
    }

    /// Due date for a rule and an already-resolved period.
    pub fn due_date_for(
        &self,
        rule: &ObligationRule,
        period: &Period,
    ) -> Result<NaiveDate, DueDateError> {
        compute_due_date(rule, period, self.calendar_for(&rule.jurisdiction))
    }

    /// Due date for a rule code and period label.
    pub fn due_date(&self, code: &str, period_label: &str) -> Result<NaiveDate, DueDateError> {
        let rule = self
            .get(code)
            .ok_or_else(|| DueDateError::UnknownRule(code.to_string()))?;
        let period = self.parse_period(rule, period_label)?;
        self.due_date_for(rule, &period)
    }
}
