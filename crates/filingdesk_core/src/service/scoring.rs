//! Compliance scoring.
//!
//! # Responsibility
//! - Derive a per-company score over a trailing window of due dates.
//! - Aggregate scores for every active company of a tenant.
//!
//! # Invariants
//! - An empty window yields the neutral score `None`, never NaN.
//! - Scoring is read-only.

use crate::config::EngineConfig;
use crate::model::company::{CompanyId, TenantId};
use crate::model::score::ComplianceScoreSnapshot;
use crate::model::task::{TaskInstance, TaskStatus};
use crate::repo::company_repo::{CompanyListQuery, CompanyRepository};
use crate::repo::task_repo::{TaskListQuery, TaskRepository};
use crate::service::ServiceResult;
use chrono::{Days, FixedOffset, NaiveDate};
use log::debug;

/// Computes a snapshot from already-loaded tasks.
///
/// Tasks outside `[as_of - window_days, as_of]` (by effective due date) and
/// archived tasks are ignored.
pub fn score_tasks<'a>(
    company_id: CompanyId,
    tasks: impl IntoIterator<Item = &'a TaskInstance>,
    as_of: NaiveDate,
    window_days: u32,
    offset: FixedOffset,
) -> ComplianceScoreSnapshot {
    let window_start = as_of
        .checked_sub_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MIN);
    let mut snapshot = ComplianceScoreSnapshot {
        company_id,
        as_of,
        window_days,
        total: 0,
        completed_on_time: 0,
        completed_late: 0,
        overdue: 0,
        open: 0,
        score: None,
    };

    for task in tasks {
        let due_date = task.effective_due_date();
        if task.is_archived || task.company_id != company_id {
            continue;
        }
        if due_date < window_start || due_date > as_of {
            continue;
        }

        snapshot.total += 1;
        match (task.status, task.completed_at) {
            (TaskStatus::Completed, Some(completed_at)) => {
                if completed_at.with_timezone(&offset).date_naive() <= due_date {
                    snapshot.completed_on_time += 1;
                } else {
                    snapshot.completed_late += 1;
                }
            }
            (TaskStatus::Completed, None) => snapshot.completed_late += 1,
            (TaskStatus::Overdue, _) => snapshot.overdue += 1,
            // Not swept yet but already late.
            _ if due_date < as_of => snapshot.overdue += 1,
            _ => snapshot.open += 1,
        }
    }

    if snapshot.total > 0 {
        snapshot.score =
            Some(100.0 * f64::from(snapshot.completed_on_time) / f64::from(snapshot.total));
    }
    snapshot
}

/// Score read model over task and company repositories.
pub struct ScoringService<T: TaskRepository, C: CompanyRepository> {
    tasks: T,
    companies: C,
    window_days: u32,
    offset: FixedOffset,
}

impl<T: TaskRepository, C: CompanyRepository> ScoringService<T, C> {
    pub fn new(tasks: T, companies: C, config: &EngineConfig) -> Self {
        Self {
            tasks,
            companies,
            window_days: config.score_window_days,
            offset: config.business_offset(),
        }
    }

    pub fn score_company(
        &self,
        company_id: CompanyId,
        as_of: NaiveDate,
    ) -> ServiceResult<ComplianceScoreSnapshot> {
        let tasks = self.tasks.list_tasks(&TaskListQuery {
            company_id: Some(company_id),
            due_from: as_of.checked_sub_days(Days::new(u64::from(self.window_days))),
            due_to: Some(as_of),
            ..TaskListQuery::default()
        })?;
        let snapshot = score_tasks(company_id, &tasks, as_of, self.window_days, self.offset);
        debug!(
            "event=score module=service status=ok company_id={} total={} on_time={}",
            company_id, snapshot.total, snapshot.completed_on_time
        );
        Ok(snapshot)
    }

    /// Scores every active company of `tenant_id`, ordered by company name.
    pub fn score_tenant(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> ServiceResult<Vec<ComplianceScoreSnapshot>> {
        let companies = self.companies.list_companies(&CompanyListQuery {
            tenant_id: Some(tenant_id),
            include_inactive: false,
        })?;
        companies
            .iter()
            .map(|company| self.score_company(company.id, as_of))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::score_tasks;
    use crate::model::company::{CompanyProfile, EntityType};
    use crate::model::period::{Period, Periodicity};
    use crate::model::task::{TaskInstance, TaskStatus};
    use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn task(company: &CompanyProfile, label: &str, due: NaiveDate) -> TaskInstance {
        let period = Period::parse(label, Periodicity::Monthly, 4).unwrap();
        TaskInstance::new(company, "GSTR-3B", &period, due, Utc::now())
    }

    fn company() -> CompanyProfile {
        CompanyProfile::new(
            Uuid::new_v4(),
            "Acme Traders",
            "IN",
            EntityType::PrivateLimited,
            date(2025, 4, 1),
        )
    }

    #[test]
    fn empty_window_is_not_applicable() {
        let company = company();
        let tasks: Vec<TaskInstance> = Vec::new();
        let snapshot = score_tasks(company.id, &tasks, date(2025, 12, 1), 365, utc());
        assert_eq!(snapshot.total, 0);
        assert!(snapshot.is_not_applicable());
    }

    #[test]
    fn score_counts_only_on_time_completions() {
        let company = company();
        let mut on_time = task(&company, "2025-09", date(2025, 10, 20));
        on_time.status = TaskStatus::Completed;
        on_time.completed_at = Some(Utc.with_ymd_and_hms(2025, 10, 18, 9, 0, 0).unwrap());

        let mut late = task(&company, "2025-08", date(2025, 9, 22));
        late.status = TaskStatus::Completed;
        late.completed_at = Some(Utc.with_ymd_and_hms(2025, 9, 25, 9, 0, 0).unwrap());

        let mut overdue = task(&company, "2025-07", date(2025, 8, 20));
        overdue.status = TaskStatus::Overdue;

        let open = task(&company, "2025-10", date(2025, 11, 20));
        let outside = task(&company, "2023-01", date(2023, 2, 20));

        let tasks = [on_time, late, overdue, open, outside];
        let snapshot = score_tasks(company.id, &tasks, date(2025, 11, 20), 365, utc());
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.completed_on_time, 1);
        assert_eq!(snapshot.completed_late, 1);
        assert_eq!(snapshot.overdue, 1);
        assert_eq!(snapshot.open, 1);
        assert_eq!(snapshot.score, Some(25.0));
    }

    #[test]
    fn unswept_late_task_counts_as_overdue() {
        let company = company();
        let pending = task(&company, "2025-09", date(2025, 10, 20));
        let snapshot = score_tasks(company.id, [&pending], date(2025, 11, 1), 365, utc());
        assert_eq!(snapshot.overdue, 1);
        assert_eq!(snapshot.score, Some(0.0));
    }
}
