//! Recurring engine jobs.
//!
//! # Responsibility
//! - Fan instantiation and overdue sweeps out over active companies.
//! - Drain the notification outbox.
//!
//! # Invariants
//! - Companies are processed independently; one failure is reported, not
//!   propagated.
//! - Safe to run from several processes at once against the same database.

use crate::catalog::rule_catalog::RuleCatalog;
use crate::config::EngineConfig;
use crate::db::open_db;
use crate::model::company::CompanyProfile;
use crate::repo::company_repo::{CompanyListQuery, CompanyRepository, SqliteCompanyRepository};
use crate::repo::outbox_repo::SqliteOutboxRepository;
use crate::repo::task_repo::SqliteTaskRepository;
use crate::repo::RepoError;
use crate::service::dispatcher::{ChannelRegistry, DispatchError, DispatchReport, Dispatcher};
use crate::service::escalation::{SweepReport, TaskLifecycle};
use crate::service::instantiator::{FailedCompany, InstantiationReport, Instantiator};
use crate::service::worker_pool::WorkerPool;
use crate::service::ServiceResult;
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;

/// Aggregate result of one sweep over all active companies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub companies_scanned: usize,
    #[serde(flatten)]
    pub report: SweepReport,
    pub failed_companies: Vec<FailedCompany>,
}

/// Runs engine jobs against one database file.
pub struct Scheduler<'a> {
    catalog: &'a RuleCatalog,
    config: &'a EngineConfig,
    pool: WorkerPool,
}

impl<'a> Scheduler<'a> {
    pub fn new(db_path: impl Into<PathBuf>, catalog: &'a RuleCatalog, config: &'a EngineConfig) -> Self {
        Self {
            pool: WorkerPool::new(db_path, config.worker_count),
            catalog,
            config,
        }
    }

    /// Instantiates due periods for every active company as of `today`.
    pub fn run_instantiation(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> ServiceResult<InstantiationReport> {
        let companies = self.active_companies()?;
        let outcomes = self.pool.run(companies, |conn, company| {
            let repo = SqliteTaskRepository::try_new(conn)?;
            Instantiator::new(repo, self.catalog, self.config).instantiate_company(company, today, now)
        });

        let mut report = InstantiationReport::default();
        for outcome in outcomes {
            let result = outcome.result.map_err(|err| err.to_string());
            if let Err(error) = &result {
                warn!(
                    "event=instantiate module=scheduler status=error company_id={} error={}",
                    outcome.job.id, error
                );
            }
            report.record(outcome.job.id, result);
        }
        info!(
            "event=instantiate module=scheduler status=ok companies={} created={} existing={} skipped={} failed={}",
            report.companies_scanned,
            report.tasks_created,
            report.tasks_existing,
            report.skipped.len(),
            report.failed_companies.len()
        );
        Ok(report)
    }

    /// Sweeps open tasks of every active company at `now`.
    pub fn run_sweep(&self, now: DateTime<Utc>) -> ServiceResult<SweepSummary> {
        let companies = self.active_companies()?;
        let outcomes = self.pool.run(companies, |conn, company| {
            let repo = SqliteTaskRepository::try_new(conn)?;
            TaskLifecycle::new(repo, self.config).sweep_company(company, now)
        });

        let mut summary = SweepSummary::default();
        for outcome in outcomes {
            summary.companies_scanned += 1;
            match outcome.result {
                Ok(report) => summary.report.merge(&report),
                Err(err) => {
                    warn!(
                        "event=sweep module=scheduler status=error company_id={} error={}",
                        outcome.job.id, err
                    );
                    summary.failed_companies.push(FailedCompany {
                        company_id: outcome.job.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            "event=sweep module=scheduler status=ok companies={} overdue={} events={} failed={}",
            summary.companies_scanned,
            summary.report.marked_overdue,
            summary.report.near_due_events + summary.report.overdue_events,
            summary.failed_companies.len()
        );
        Ok(summary)
    }

    /// Delivers pending outbox events through `registry`.
    pub fn run_dispatch(
        &self,
        registry: &ChannelRegistry,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<DispatchReport, DispatchError> {
        let conn = open_db(self.pool.db_path()).map_err(RepoError::from)?;
        let repo = SqliteOutboxRepository::try_new(&conn)?;
        Dispatcher::new(repo, registry, self.config.dispatch).drain(now, limit)
    }

    fn active_companies(&self) -> ServiceResult<Vec<CompanyProfile>> {
        let conn = open_db(self.pool.db_path()).map_err(RepoError::from)?;
        let repo = SqliteCompanyRepository::try_new(&conn)?;
        Ok(repo.list_companies(&CompanyListQuery::default())?)
    }
}
