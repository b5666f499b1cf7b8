//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep CLI callers decoupled from storage details.

use crate::calendar::due_date::DueDateError;
use crate::model::company::CompanyId;
use crate::model::period::PeriodError;
use crate::model::task::{TaskId, TaskStatus};
use crate::repo::RepoError;
use crate::service::retry::Transient;
use chrono::NaiveDate;
use thiserror::Error;

pub mod company_service;
pub mod dispatcher;
pub mod escalation;
pub mod instantiator;
pub mod retry;
pub mod scheduler;
pub mod scoring;
pub mod worker_pool;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by use-case services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    DueDate(#[from] DueDateError),
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error("unknown obligation rule `{0}`")]
    UnknownRule(String),
    #[error("rule `{rule_code}` belongs to {rule_jurisdiction}, company is in {company_jurisdiction}")]
    JurisdictionMismatch {
        rule_code: String,
        rule_jurisdiction: String,
        company_jurisdiction: String,
    },
    #[error("company {0} is inactive")]
    CompanyInactive(CompanyId),
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task {0} is archived")]
    TaskArchived(TaskId),
    #[error("task {task_id} cannot be extended while {status}")]
    ExtensionNotAllowed { task_id: TaskId, status: TaskStatus },
    #[error("extension for task {task_id} must be later than {current}, got {requested}")]
    InvalidExtension {
        task_id: TaskId,
        current: NaiveDate,
        requested: NaiveDate,
    },
    #[error("task {0} kept changing concurrently")]
    ConcurrentModification(TaskId),
}

impl Transient for ServiceError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Repo(err) => err.is_transient(),
            _ => false,
        }
    }
}
