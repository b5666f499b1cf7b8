//! Compliance score read model.

use crate::model::company::CompanyId;
use chrono::NaiveDate;
use serde::Serialize;

/// Derived per-company score over a trailing window. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceScoreSnapshot {
    pub company_id: CompanyId,
    pub as_of: NaiveDate,
    pub window_days: u32,
    /// Tasks whose effective due date falls inside the window.
    pub total: u32,
    pub completed_on_time: u32,
    pub completed_late: u32,
    pub overdue: u32,
    /// Pending or in-progress tasks.
    pub open: u32,
    /// `100 * completed_on_time / total`; `None` when the window is empty.
    pub score: Option<f64>,
}

impl ComplianceScoreSnapshot {
    /// Returns whether the score is the neutral "not applicable" value.
    pub fn is_not_applicable(&self) -> bool {
        self.score.is_none()
    }
}
