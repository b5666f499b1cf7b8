//! Task instance model and status state machine.
//!
//! # Responsibility
//! - Define the concrete occurrence of one obligation for one company/period.
//! - Encode which status transitions are legal and how escalation levels are
//!   derived from dates.
//!
//! # Invariants
//! - `(company_id, rule_code, period)` identifies at most one task.
//! - `completed` is terminal: no transition leaves it.
//! - `overdue` is only left through completion.
//! - `last_notified_level` only grows while the due date is unchanged.

use crate::model::company::{CompanyId, CompanyProfile, TenantId};
use crate::model::period::Period;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Instantiated, no work recorded.
    Pending,
    /// Work has started.
    InProgress,
    /// Filed. Terminal.
    Completed,
    /// Due date passed before completion.
    Overdue,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns whether `self -> next` is a legal transition.
    ///
    /// Completion is reachable from every non-terminal state; everything else
    /// only moves forward.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Completed, _) => false,
            (_, Self::Completed) => true,
            (Self::Pending, Self::InProgress) => true,
            (Self::Pending, Self::Overdue) => true,
            (Self::InProgress, Self::Overdue) => true,
            _ => false,
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalation threshold reached by a task, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    #[default]
    None,
    NearDue,
    Overdue,
}

impl EscalationLevel {
    /// Integer rank persisted in storage; comparisons happen in SQL.
    pub fn rank(self) -> i64 {
        match self {
            Self::None => 0,
            Self::NearDue => 1,
            Self::Overdue => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::None),
            1 => Some(Self::NearDue),
            2 => Some(Self::Overdue),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NearDue => "near_due",
            Self::Overdue => "overdue",
        }
    }
}

/// Computes the escalation level for a due date as seen on `today`.
///
/// - after the due date: `Overdue`
/// - within `lead_days` before it (inclusive of the due date): `NearDue`
/// - otherwise: `None`
pub fn escalation_target(due_date: NaiveDate, today: NaiveDate, lead_days: u32) -> EscalationLevel {
    if today > due_date {
        return EscalationLevel::Overdue;
    }
    let days_left = (due_date - today).num_days();
    if days_left <= i64::from(lead_days) {
        EscalationLevel::NearDue
    } else {
        EscalationLevel::None
    }
}

/// One concrete obligation occurrence for one company and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: TaskId,
    pub company_id: CompanyId,
    pub tenant_id: TenantId,
    pub rule_code: String,
    /// Canonical period label, see `Period::label`.
    pub period: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Statutory due date after business-day roll-forward.
    pub due_date: NaiveDate,
    /// Later due date granted by an extension.
    pub extended_due_date: Option<NaiveDate>,
    pub extension_reason: Option<String>,
    pub status: TaskStatus,
    /// Escalation currently in force for an open task; `None` once completed.
    pub escalation_level: EscalationLevel,
    /// Highest level a notification was emitted for against the effective
    /// due date. Survives completion as the record of what was sent.
    pub last_notified_level: EscalationLevel,
    pub completed_at: Option<DateTime<Utc>>,
    /// Acknowledgement number returned by the filing portal.
    pub filing_reference: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInstance {
    /// Creates a pending task for one company/rule/period.
    pub fn new(
        company: &CompanyProfile,
        rule_code: impl Into<String>,
        period: &Period,
        due_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id: company.id,
            tenant_id: company.tenant_id,
            rule_code: rule_code.into(),
            period: period.label(),
            period_start: period.start(),
            period_end: period.end(),
            due_date,
            extended_due_date: None,
            extension_reason: None,
            status: TaskStatus::Pending,
            escalation_level: EscalationLevel::None,
            last_notified_level: EscalationLevel::None,
            completed_at: None,
            filing_reference: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Due date in force, honoring extensions.
    pub fn effective_due_date(&self) -> NaiveDate {
        self.extended_due_date.unwrap_or(self.due_date)
    }

    /// Returns whether the task still awaits completion.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal() && !self.is_archived
    }
}

#[cfg(test)]
mod tests {
    use super::{escalation_target, EscalationLevel, TaskStatus};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn completed_is_terminal() {
        for next in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Overdue,
            TaskStatus::Completed,
        ] {
            assert!(!TaskStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn completion_is_reachable_from_every_open_state() {
        for from in [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Overdue] {
            assert!(from.can_transition_to(TaskStatus::Completed));
        }
    }

    #[test]
    fn transitions_are_one_directional() {
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Overdue.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Overdue.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn escalation_target_tracks_thresholds() {
        let due = date(2025, 11, 20);
        assert_eq!(escalation_target(due, date(2025, 11, 10), 3), EscalationLevel::None);
        assert_eq!(escalation_target(due, date(2025, 11, 17), 3), EscalationLevel::NearDue);
        assert_eq!(escalation_target(due, date(2025, 11, 20), 3), EscalationLevel::NearDue);
        assert_eq!(escalation_target(due, date(2025, 11, 21), 3), EscalationLevel::Overdue);
    }

    #[test]
    fn escalation_levels_order_by_severity() {
        assert!(EscalationLevel::None < EscalationLevel::NearDue);
        assert!(EscalationLevel::NearDue < EscalationLevel::Overdue);
        assert_eq!(EscalationLevel::from_rank(2), Some(EscalationLevel::Overdue));
        assert_eq!(EscalationLevel::from_rank(7), None);
    }
}
