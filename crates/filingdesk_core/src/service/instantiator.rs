//! Obligation instantiator.
//!
//! # Responsibility
//! - Create exactly one task per (company, rule, period) once the period has
//!   opened, catching up on missed periods within a bounded backfill.
//! - Report what a scan created, found, skipped or failed.
//!
//! # Invariants
//! - Re-running a scan for the same day creates nothing new.
//! - Periods rejected as predating or postdating a rule are skipped, never
//!   fatal for the scan.
//! - One company's failure never stops the scan of the others.
//! - A company deactivated mid-scan gets no further tasks.

use crate::calendar::due_date::DueDateError;
use crate::catalog::rule_catalog::RuleCatalog;
use crate::config::EngineConfig;
use crate::model::company::{CompanyId, CompanyProfile};
use crate::model::period::Period;
use crate::model::rule::ObligationRule;
use crate::model::task::TaskInstance;
use crate::repo::task_repo::TaskRepository;
use crate::service::retry::{retry_transient, RetryPolicy};
use crate::service::{ServiceError, ServiceResult};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;

/// Period that produced no task, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPeriod {
    pub rule_code: String,
    pub period: String,
    pub reason: String,
}

/// Result of instantiating one company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanyInstantiation {
    pub created: Vec<TaskInstance>,
    pub existing: usize,
    pub skipped: Vec<SkippedPeriod>,
    /// Subscribed codes missing from the catalog.
    pub unknown_rules: Vec<String>,
}

/// Company that could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCompany {
    pub company_id: CompanyId,
    pub error: String,
}

/// Aggregate result of one instantiation scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstantiationReport {
    pub companies_scanned: usize,
    pub tasks_created: usize,
    pub tasks_existing: usize,
    pub skipped: Vec<SkippedPeriod>,
    pub unknown_rules: Vec<(CompanyId, String)>,
    pub failed_companies: Vec<FailedCompany>,
}

impl InstantiationReport {
    /// Folds one company's outcome into the report.
    pub fn record(&mut self, company_id: CompanyId, outcome: Result<CompanyInstantiation, String>) {
        self.companies_scanned += 1;
        match outcome {
            Ok(result) => {
                self.tasks_created += result.created.len();
                self.tasks_existing += result.existing;
                self.skipped.extend(result.skipped);
                self.unknown_rules.extend(
                    result
                        .unknown_rules
                        .into_iter()
                        .map(|code| (company_id, code)),
                );
            }
            Err(error) => self.failed_companies.push(FailedCompany { company_id, error }),
        }
    }
}

/// Outcome of instantiating one explicit period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodInstantiation {
    Created(TaskInstance),
    Existing(TaskInstance),
}

impl PeriodInstantiation {
    pub fn task(&self) -> &TaskInstance {
        match self {
            Self::Created(task) | Self::Existing(task) => task,
        }
    }
}

/// Instantiates tasks through a task repository.
pub struct Instantiator<'c, R: TaskRepository> {
    repo: R,
    catalog: &'c RuleCatalog,
    max_backfill_periods: usize,
    retry: RetryPolicy,
}

impl<'c, R: TaskRepository> Instantiator<'c, R> {
    pub fn new(repo: R, catalog: &'c RuleCatalog, config: &EngineConfig) -> Self {
        Self {
            repo,
            catalog,
            max_backfill_periods: config.max_backfill_periods.max(1) as usize,
            retry: config.retry,
        }
    }

    /// Brings every applicable (rule, period) of `company` up to `today`.
    pub fn instantiate_company(
        &self,
        company: &CompanyProfile,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> ServiceResult<CompanyInstantiation> {
        let mut result = CompanyInstantiation::default();
        if !company.is_active {
            return Ok(result);
        }

        for code in &company.subscribed_rules {
            if !self.catalog.contains(code) {
                warn!(
                    "event=instantiate module=service status=unknown_rule company_id={} rule_code={}",
                    company.id, code
                );
                result.unknown_rules.push(code.clone());
            }
        }

        for rule in self.catalog.applicable_rules(company) {
            for period in self.pending_periods(company, rule, today)? {
                match self.instantiate_one(company, rule, &period, now, &mut result) {
                    Err(ServiceError::CompanyInactive(_)) => {
                        info!(
                            "event=instantiate module=service status=deactivated company_id={} created={}",
                            company.id,
                            result.created.len()
                        );
                        return Ok(result);
                    }
                    other => other?,
                }
            }
        }

        info!(
            "event=instantiate module=service status=ok company_id={} created={} existing={} skipped={}",
            company.id,
            result.created.len(),
            result.existing,
            result.skipped.len()
        );
        Ok(result)
    }

    /// Scans `companies` sequentially, isolating per-company failures.
    pub fn instantiate_all(
        &self,
        companies: &[CompanyProfile],
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> InstantiationReport {
        let mut report = InstantiationReport::default();
        for company in companies {
            let outcome = self
                .instantiate_company(company, today, now)
                .map_err(|err| err.to_string());
            if let Err(error) = &outcome {
                warn!(
                    "event=instantiate module=service status=error company_id={} error={}",
                    company.id, error
                );
            }
            report.record(company.id, outcome);
        }
        report
    }

    /// Instantiates one explicit period, returning the existing task when
    /// it is already present.
    pub fn instantiate_period(
        &self,
        company: &CompanyProfile,
        rule_code: &str,
        period_label: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<PeriodInstantiation> {
        if !company.is_active {
            return Err(ServiceError::CompanyInactive(company.id));
        }
        let rule = self
            .catalog
            .get(rule_code)
            .ok_or_else(|| ServiceError::UnknownRule(rule_code.to_string()))?;
        let period = self.catalog.parse_period(rule, period_label)?;
        let due_date = self.catalog.due_date_for(rule, &period)?;

        let task = TaskInstance::new(company, rule.code.as_str(), &period, due_date, now);
        if retry_transient(&self.retry, "insert_task", || self.repo.insert_if_absent(&task))? {
            return Ok(PeriodInstantiation::Created(task));
        }
        // No row and no insert: the company was deactivated after it was read.
        let existing = self
            .repo
            .find_task(company.id, &rule.code, &period.label())?
            .ok_or(ServiceError::CompanyInactive(company.id))?;
        Ok(PeriodInstantiation::Existing(existing))
    }

    /// Periods from the first un-instantiated one up to the period containing
    /// `today`, keeping only the most recent `max_backfill_periods`.
    fn pending_periods(
        &self,
        company: &CompanyProfile,
        rule: &ObligationRule,
        today: NaiveDate,
    ) -> ServiceResult<Vec<Period>> {
        let current = self.catalog.period_containing(rule, today)?;
        let mut first = self.catalog.period_containing(rule, company.onboarded_on)?;
        let effective = self.catalog.period_containing(rule, rule.effective_from)?;
        if effective.start() > first.start() {
            first = effective;
        }
        if let Some(latest_start) = self.repo.latest_period_start(company.id, &rule.code)? {
            let after_latest = self.catalog.period_containing(rule, latest_start)?.next()?;
            if after_latest.start() > first.start() {
                first = after_latest;
            }
        }

        let mut periods = VecDeque::with_capacity(self.max_backfill_periods);
        let mut cursor = first;
        while cursor.start() <= current.start() {
            if rule.effective_to.is_some_and(|to| cursor.start() > to) {
                break;
            }
            if periods.len() == self.max_backfill_periods {
                periods.pop_front();
            }
            periods.push_back(cursor);
            cursor = cursor.next()?;
        }
        Ok(periods.into())
    }

    fn instantiate_one(
        &self,
        company: &CompanyProfile,
        rule: &ObligationRule,
        period: &Period,
        now: DateTime<Utc>,
        result: &mut CompanyInstantiation,
    ) -> ServiceResult<()> {
        let due_date = match self.catalog.due_date_for(rule, period) {
            Ok(due_date) => due_date,
            Err(err @ (DueDateError::InvalidPeriod { .. } | DueDateError::RuleRetired { .. })) => {
                info!(
                    "event=instantiate module=service status=skipped company_id={} rule_code={} period={} reason={}",
                    company.id, rule.code, period, err
                );
                result.skipped.push(SkippedPeriod {
                    rule_code: rule.code.clone(),
                    period: period.label(),
                    reason: err.to_string(),
                });
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let task = TaskInstance::new(company, rule.code.as_str(), period, due_date, now);
        if retry_transient(&self.retry, "insert_task", || self.repo.insert_if_absent(&task))? {
            result.created.push(task);
        } else if self
            .repo
            .find_task(company.id, &rule.code, &period.label())?
            .is_some()
        {
            result.existing += 1;
        } else {
            return Err(ServiceError::CompanyInactive(company.id));
        }
        Ok(())
    }
}
