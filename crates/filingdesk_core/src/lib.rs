//! Core compliance-deadline engine for FilingDesk.
//! This crate is the single source of truth for obligation, due-date and
//! escalation invariants.

pub mod calendar;
pub mod catalog;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use calendar::business_calendar::BusinessCalendar;
pub use calendar::due_date::{compute_due_date, DueDateError};
pub use catalog::rule_catalog::{CatalogError, RuleCatalog};
pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{
    default_log_level, init_logging, init_stderr_logging, logging_status, LogTarget, LoggingError,
};
pub use model::company::{CompanyId, CompanyProfile, EntityType, TenantId};
pub use model::notification::{NotificationChannel, NotificationEvent, NotificationKind};
pub use model::period::{Period, PeriodError, Periodicity};
pub use model::rule::{DueRule, ObligationRule};
pub use model::score::ComplianceScoreSnapshot;
pub use model::task::{EscalationLevel, TaskId, TaskInstance, TaskStatus};
pub use repo::{RepoError, RepoResult};
pub use service::scheduler::Scheduler;
pub use service::{ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
