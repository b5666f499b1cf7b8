//! Task status and escalation state machine.
//!
//! # Responsibility
//! - Apply user-driven transitions (start, complete, extend).
//! - Sweep open tasks, move late ones to `overdue` and emit one notification
//!   per threshold crossing.
//!
//! # Invariants
//! - `completed` is terminal; completing twice is a no-op.
//! - Archived tasks reject every transition.
//! - Events are only written together with the watermark change that
//!   justifies them, so repeated or racing sweeps never duplicate alerts.

use crate::config::EngineConfig;
use crate::model::company::CompanyProfile;
use crate::model::notification::{NotificationEvent, NotificationKind};
use crate::model::task::{escalation_target, EscalationLevel, TaskId, TaskInstance, TaskStatus};
use crate::repo::task_repo::{EscalationChange, TaskListQuery, TaskRepository};
use crate::repo::RepoError;
use crate::service::retry::{retry_transient, RetryPolicy};
use crate::service::{ServiceError, ServiceResult};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

/// Attempts made when a compare-and-set loses to a concurrent writer.
const MAX_CAS_ATTEMPTS: usize = 3;

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tasks_scanned: usize,
    pub marked_overdue: usize,
    pub near_due_events: usize,
    pub overdue_events: usize,
    /// Changes skipped because another worker updated the task first.
    pub lost_races: usize,
}

impl SweepReport {
    pub fn merge(&mut self, other: &SweepReport) {
        self.tasks_scanned += other.tasks_scanned;
        self.marked_overdue += other.marked_overdue;
        self.near_due_events += other.near_due_events;
        self.overdue_events += other.overdue_events;
        self.lost_races += other.lost_races;
    }
}

/// Plans the escalation change for `task` as seen on `today`.
///
/// Returns `None` when nothing changes. Only the highest newly crossed
/// threshold produces an event.
pub fn plan_escalation(
    task: &TaskInstance,
    company: &CompanyProfile,
    today: NaiveDate,
    lead_days: u32,
    now: DateTime<Utc>,
) -> Option<EscalationChange> {
    if !task.is_open() {
        return None;
    }

    let due_date = task.effective_due_date();
    let target = escalation_target(due_date, today, lead_days);
    let raises_watermark = target > task.last_notified_level;
    let becomes_overdue = target == EscalationLevel::Overdue
        && task.status != TaskStatus::Overdue;
    if !raises_watermark && !becomes_overdue {
        return None;
    }

    let new_status = if becomes_overdue {
        TaskStatus::Overdue
    } else {
        task.status
    };
    let new_level = target.max(task.last_notified_level);
    let event = if raises_watermark {
        NotificationKind::for_level(target).map(|kind| NotificationEvent {
            id: Uuid::new_v4(),
            task_id: task.id,
            company_id: task.company_id,
            tenant_id: task.tenant_id,
            rule_code: task.rule_code.clone(),
            period: task.period.clone(),
            kind,
            due_date,
            channels: company.notification_channels.clone(),
            recipient: company.contact.clone(),
            created_at: now,
        })
    } else {
        None
    };

    Some(EscalationChange {
        task_id: task.id,
        expected_status: task.status,
        expected_notified_level: task.last_notified_level,
        expected_due_date: due_date,
        new_status,
        new_level,
        event,
    })
}

/// Task lifecycle service over a task repository.
pub struct TaskLifecycle<R: TaskRepository> {
    repo: R,
    lead_days: u32,
    offset: FixedOffset,
    retry: RetryPolicy,
}

impl<R: TaskRepository> TaskLifecycle<R> {
    pub fn new(repo: R, config: &EngineConfig) -> Self {
        Self {
            repo,
            lead_days: config.near_due_lead_days,
            offset: config.business_offset(),
            retry: config.retry,
        }
    }

    pub fn get(&self, id: TaskId) -> ServiceResult<Option<TaskInstance>> {
        Ok(self.repo.get_task(id)?)
    }

    pub fn list(&self, query: &TaskListQuery) -> ServiceResult<Vec<TaskInstance>> {
        Ok(self.repo.list_tasks(query)?)
    }

    /// `pending -> in_progress`. Starting an in-progress task is a no-op.
    pub fn start(&self, id: TaskId, now: DateTime<Utc>) -> ServiceResult<TaskInstance> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let task = self.require_live(id)?;
            match task.status {
                TaskStatus::InProgress => return Ok(task),
                TaskStatus::Pending => {
                    if self.retrying("start_task", || self.repo.start_task(id, now))? {
                        info!("event=task_start module=service status=ok task_id={}", id);
                        return self.require(id);
                    }
                }
                from => {
                    return Err(ServiceError::InvalidTransition {
                        task_id: id,
                        from,
                        to: TaskStatus::InProgress,
                    })
                }
            }
        }
        Err(ServiceError::ConcurrentModification(id))
    }

    /// Completes the task from any open state. Completing twice is a no-op.
    pub fn complete(
        &self,
        id: TaskId,
        completed_at: DateTime<Utc>,
        filing_reference: Option<&str>,
    ) -> ServiceResult<TaskInstance> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let task = self.require_live(id)?;
            if task.status == TaskStatus::Completed {
                return Ok(task);
            }
            let completed = self.retrying("complete_task", || {
                self.repo
                    .complete_task(id, task.status, completed_at, filing_reference)
            })?;
            if completed {
                let on_time = completed_at.with_timezone(&self.offset).date_naive()
                    <= task.effective_due_date();
                info!(
                    "event=task_complete module=service status=ok task_id={} from={} on_time={}",
                    id, task.status, on_time
                );
                return self.require(id);
            }
        }
        Err(ServiceError::ConcurrentModification(id))
    }

    /// Moves the effective due date later and re-arms escalation.
    pub fn extend_due_date(
        &self,
        id: TaskId,
        new_due_date: NaiveDate,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<TaskInstance> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let task = self.require_live(id)?;
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
                return Err(ServiceError::ExtensionNotAllowed {
                    task_id: id,
                    status: task.status,
                });
            }
            let current = task.effective_due_date();
            if new_due_date <= current {
                return Err(ServiceError::InvalidExtension {
                    task_id: id,
                    current,
                    requested: new_due_date,
                });
            }
            let extended = self.retrying("extend_due_date", || {
                self.repo
                    .extend_due_date(id, task.status, new_due_date, reason, now)
            })?;
            if extended {
                info!(
                    "event=task_extend module=service status=ok task_id={} from={} to={}",
                    id, current, new_due_date
                );
                return self.require(id);
            }
        }
        Err(ServiceError::ConcurrentModification(id))
    }

    /// Evaluates every open task of `company` against `now`.
    pub fn sweep_company(
        &self,
        company: &CompanyProfile,
        now: DateTime<Utc>,
    ) -> ServiceResult<SweepReport> {
        let today = now.with_timezone(&self.offset).date_naive();
        let tasks = self.repo.list_tasks(&TaskListQuery {
            company_id: Some(company.id),
            open_only: true,
            ..TaskListQuery::default()
        })?;

        let mut report = SweepReport {
            tasks_scanned: tasks.len(),
            ..SweepReport::default()
        };
        for task in &tasks {
            let Some(change) = plan_escalation(task, company, today, self.lead_days, now) else {
                continue;
            };
            let applied =
                self.retrying("apply_escalation", || self.repo.apply_escalation(&change, now))?;
            if !applied {
                debug!(
                    "event=sweep module=service status=lost_race task_id={}",
                    task.id
                );
                report.lost_races += 1;
                continue;
            }

            if change.new_status == TaskStatus::Overdue && change.expected_status != TaskStatus::Overdue
            {
                report.marked_overdue += 1;
            }
            match change.event.as_ref().map(|event| event.kind) {
                Some(NotificationKind::NearDue) => report.near_due_events += 1,
                Some(NotificationKind::Overdue) => report.overdue_events += 1,
                None => {}
            }
        }

        info!(
            "event=sweep module=service status=ok company_id={} scanned={} overdue={} near_due_events={} overdue_events={}",
            company.id,
            report.tasks_scanned,
            report.marked_overdue,
            report.near_due_events,
            report.overdue_events
        );
        Ok(report)
    }

    fn require(&self, id: TaskId) -> ServiceResult<TaskInstance> {
        self.repo
            .get_task(id)?
            .ok_or(ServiceError::Repo(RepoError::TaskNotFound(id)))
    }

    fn require_live(&self, id: TaskId) -> ServiceResult<TaskInstance> {
        let task = self.require(id)?;
        if task.is_archived {
            return Err(ServiceError::TaskArchived(id));
        }
        Ok(task)
    }

    fn retrying<T>(
        &self,
        operation: &str,
        op: impl FnMut() -> Result<T, RepoError>,
    ) -> ServiceResult<T> {
        Ok(retry_transient(&self.retry, operation, op)?)
    }
}
