use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use filingdesk_core::db::open_db_in_memory;
use filingdesk_core::model::notification::OutboxEntry;
use filingdesk_core::repo::company_repo::{CompanyRepository, SqliteCompanyRepository};
use filingdesk_core::repo::outbox_repo::{OutboxListQuery, OutboxRepository, SqliteOutboxRepository};
use filingdesk_core::repo::task_repo::{
    EscalationChange, SqliteTaskRepository, TaskListQuery, TaskRepository,
};
use filingdesk_core::service::escalation::{plan_escalation, TaskLifecycle};
use filingdesk_core::{
    CompanyProfile, EngineConfig, EntityType, EscalationLevel, NotificationKind, Period,
    Periodicity, RepoResult, ServiceError, TaskId, TaskInstance, TaskStatus,
};
use rusqlite::Connection;
use std::cell::Cell;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 6, 0, 0).unwrap()
}

fn setup(conn: &Connection) -> (CompanyProfile, TaskInstance) {
    let company = CompanyProfile::new(
        Uuid::new_v4(),
        "Acme Traders",
        "IN",
        EntityType::PrivateLimited,
        date(2025, 4, 1),
    );
    SqliteCompanyRepository::try_new(conn)
        .unwrap()
        .create_company(&company)
        .unwrap();

    let period = Period::parse("2025-10", Periodicity::Monthly, 4).unwrap();
    let task = TaskInstance::new(&company, "GSTR-3B", &period, date(2025, 11, 20), at(2025, 11, 1));
    assert!(SqliteTaskRepository::try_new(conn)
        .unwrap()
        .insert_if_absent(&task)
        .unwrap());
    (company, task)
}

fn lifecycle(conn: &Connection) -> TaskLifecycle<SqliteTaskRepository<'_>> {
    TaskLifecycle::new(
        SqliteTaskRepository::try_new(conn).unwrap(),
        &EngineConfig::default(),
    )
}

fn events(conn: &Connection, task: &TaskInstance) -> Vec<OutboxEntry> {
    SqliteOutboxRepository::try_new(conn)
        .unwrap()
        .list_events(&OutboxListQuery {
            task_id: Some(task.id),
            ..OutboxListQuery::default()
        })
        .unwrap()
}

#[test]
fn sweep_after_due_date_marks_overdue_and_notifies_once() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let lifecycle = lifecycle(&conn);

    let report = lifecycle.sweep_company(&company, at(2025, 11, 21)).unwrap();
    assert_eq!(report.tasks_scanned, 1);
    assert_eq!(report.marked_overdue, 1);
    assert_eq!(report.overdue_events, 1);

    let loaded = lifecycle.get(task.id).unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Overdue);
    assert_eq!(loaded.last_notified_level, EscalationLevel::Overdue);

    let outbox = events(&conn, &task);
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].event.kind, NotificationKind::Overdue);
    assert_eq!(outbox[0].event.due_date, date(2025, 11, 20));
    assert_eq!(outbox[0].attempts, 0);
}

#[test]
fn repeated_sweeps_never_duplicate_notifications() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let lifecycle = lifecycle(&conn);

    lifecycle.sweep_company(&company, at(2025, 11, 21)).unwrap();
    let second = lifecycle.sweep_company(&company, at(2025, 11, 22)).unwrap();
    let third = lifecycle.sweep_company(&company, at(2025, 12, 5)).unwrap();

    assert_eq!(second.marked_overdue + second.overdue_events, 0);
    assert_eq!(third.marked_overdue + third.overdue_events, 0);
    assert_eq!(events(&conn, &task).len(), 1);
}

#[test]
fn near_due_then_overdue_emit_one_event_each() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let lifecycle = lifecycle(&conn);

    let early = lifecycle.sweep_company(&company, at(2025, 11, 10)).unwrap();
    assert_eq!(early.near_due_events, 0);

    let near = lifecycle.sweep_company(&company, at(2025, 11, 18)).unwrap();
    assert_eq!(near.near_due_events, 1);
    assert_eq!(near.marked_overdue, 0);
    let loaded = lifecycle.get(task.id).unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.last_notified_level, EscalationLevel::NearDue);

    let again = lifecycle.sweep_company(&company, at(2025, 11, 19)).unwrap();
    assert_eq!(again.near_due_events, 0);

    let overdue = lifecycle.sweep_company(&company, at(2025, 11, 21)).unwrap();
    assert_eq!(overdue.overdue_events, 1);

    let kinds: Vec<_> = events(&conn, &task)
        .into_iter()
        .map(|entry| entry.event.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationKind::NearDue, NotificationKind::Overdue]);
}

#[test]
fn crossing_both_thresholds_at_once_emits_only_overdue() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);

    let report = lifecycle(&conn)
        .sweep_company(&company, at(2025, 11, 25))
        .unwrap();
    assert_eq!(report.near_due_events, 0);
    assert_eq!(report.overdue_events, 1);
    assert_eq!(events(&conn, &task).len(), 1);
}

#[test]
fn completed_tasks_never_change_again() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let lifecycle = lifecycle(&conn);

    lifecycle.start(task.id, at(2025, 11, 5)).unwrap();
    let completed = lifecycle
        .complete(task.id, at(2025, 11, 19), Some("ARN-123"))
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.filing_reference.as_deref(), Some("ARN-123"));

    let again = lifecycle.complete(task.id, at(2025, 11, 25), None).unwrap();
    assert_eq!(again.completed_at, completed.completed_at);
    assert_eq!(again.filing_reference.as_deref(), Some("ARN-123"));

    let err = lifecycle.start(task.id, at(2025, 11, 25)).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::InvalidTransition {
            from: TaskStatus::Completed,
            to: TaskStatus::InProgress,
            ..
        }
    ));
    assert!(matches!(
        lifecycle
            .extend_due_date(task.id, date(2025, 12, 31), None, at(2025, 11, 25))
            .unwrap_err(),
        ServiceError::ExtensionNotAllowed { .. }
    ));

    let report = lifecycle.sweep_company(&company, at(2025, 12, 1)).unwrap();
    assert_eq!(report.tasks_scanned, 0);
    assert_eq!(
        lifecycle.get(task.id).unwrap().unwrap().status,
        TaskStatus::Completed
    );
    assert!(events(&conn, &task).is_empty());
}

#[test]
fn overdue_tasks_can_still_be_completed() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let lifecycle = lifecycle(&conn);

    lifecycle.sweep_company(&company, at(2025, 11, 21)).unwrap();
    assert!(matches!(
        lifecycle.start(task.id, at(2025, 11, 21)).unwrap_err(),
        ServiceError::InvalidTransition {
            from: TaskStatus::Overdue,
            ..
        }
    ));

    let completed = lifecycle.complete(task.id, at(2025, 11, 22), None).unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.completed_at, Some(at(2025, 11, 22)));
}

#[test]
fn extension_rearms_near_due_for_the_new_date() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let lifecycle = lifecycle(&conn);

    lifecycle.sweep_company(&company, at(2025, 11, 18)).unwrap();
    assert!(matches!(
        lifecycle
            .extend_due_date(task.id, date(2025, 11, 20), None, at(2025, 11, 18))
            .unwrap_err(),
        ServiceError::InvalidExtension { .. }
    ));

    let extended = lifecycle
        .extend_due_date(
            task.id,
            date(2025, 11, 30),
            Some("portal outage"),
            at(2025, 11, 18),
        )
        .unwrap();
    assert_eq!(extended.effective_due_date(), date(2025, 11, 30));
    assert_eq!(extended.due_date, date(2025, 11, 20));
    assert_eq!(extended.last_notified_level, EscalationLevel::None);
    assert_eq!(extended.extension_reason.as_deref(), Some("portal outage"));

    let after = lifecycle.sweep_company(&company, at(2025, 11, 21)).unwrap();
    assert_eq!(after.marked_overdue, 0);

    let near = lifecycle.sweep_company(&company, at(2025, 11, 27)).unwrap();
    assert_eq!(near.near_due_events, 1);

    let due_dates: Vec<_> = events(&conn, &task)
        .into_iter()
        .map(|entry| (entry.event.kind, entry.event.due_date))
        .collect();
    assert_eq!(
        due_dates,
        vec![
            (NotificationKind::NearDue, date(2025, 11, 20)),
            (NotificationKind::NearDue, date(2025, 11, 30)),
        ]
    );
}

#[test]
fn archived_tasks_reject_transitions() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    SqliteCompanyRepository::try_new(&conn)
        .unwrap()
        .deactivate_company(company.id)
        .unwrap();
    let lifecycle = lifecycle(&conn);

    assert!(matches!(
        lifecycle.start(task.id, at(2025, 11, 5)).unwrap_err(),
        ServiceError::TaskArchived(_)
    ));
    assert!(matches!(
        lifecycle.complete(task.id, at(2025, 11, 5), None).unwrap_err(),
        ServiceError::TaskArchived(_)
    ));
    assert_eq!(
        lifecycle
            .sweep_company(&company, at(2025, 11, 25))
            .unwrap()
            .tasks_scanned,
        0
    );
}

#[test]
fn losing_compare_and_set_emits_nothing() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let now = at(2025, 11, 21);

    // Two workers plan from the same snapshot.
    let first = plan_escalation(&task, &company, date(2025, 11, 21), 3, now).unwrap();
    let second = plan_escalation(&task, &company, date(2025, 11, 21), 3, now).unwrap();
    assert_ne!(
        first.event.as_ref().unwrap().id,
        second.event.as_ref().unwrap().id
    );

    assert!(repo.apply_escalation(&first, now).unwrap());
    assert!(!repo.apply_escalation(&second, now).unwrap());
    assert_eq!(events(&conn, &task).len(), 1);
}

#[test]
fn unknown_task_is_reported() {
    let conn = open_db_in_memory().unwrap();
    let err = lifecycle(&conn)
        .start(Uuid::new_v4(), at(2025, 11, 5))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Repo(filingdesk_core::RepoError::TaskNotFound(_))
    ));
}

/// Task repository that lets a sweep run between the caller's read and its
/// first completion attempt.
struct SweepBeforeComplete<'c> {
    conn: &'c Connection,
    inner: SqliteTaskRepository<'c>,
    company: CompanyProfile,
    sweep_at: DateTime<Utc>,
    swept: Cell<bool>,
}

impl TaskRepository for SweepBeforeComplete<'_> {
    fn insert_if_absent(&self, task: &TaskInstance) -> RepoResult<bool> {
        self.inner.insert_if_absent(task)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<TaskInstance>> {
        self.inner.get_task(id)
    }

    fn find_task(
        &self,
        company_id: Uuid,
        rule_code: &str,
        period: &str,
    ) -> RepoResult<Option<TaskInstance>> {
        self.inner.find_task(company_id, rule_code, period)
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<TaskInstance>> {
        self.inner.list_tasks(query)
    }

    fn latest_period_start(
        &self,
        company_id: Uuid,
        rule_code: &str,
    ) -> RepoResult<Option<NaiveDate>> {
        self.inner.latest_period_start(company_id, rule_code)
    }

    fn start_task(&self, id: TaskId, now: DateTime<Utc>) -> RepoResult<bool> {
        self.inner.start_task(id, now)
    }

    fn complete_task(
        &self,
        id: TaskId,
        expected: TaskStatus,
        completed_at: DateTime<Utc>,
        filing_reference: Option<&str>,
    ) -> RepoResult<bool> {
        if !self.swept.replace(true) {
            let report = lifecycle(self.conn)
                .sweep_company(&self.company, self.sweep_at)
                .unwrap();
            assert_eq!(report.marked_overdue, 1);
        }
        self.inner
            .complete_task(id, expected, completed_at, filing_reference)
    }

    fn apply_escalation(&self, change: &EscalationChange, now: DateTime<Utc>) -> RepoResult<bool> {
        self.inner.apply_escalation(change, now)
    }

    fn extend_due_date(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new_due_date: NaiveDate,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> RepoResult<bool> {
        self.inner
            .extend_due_date(id, expected, new_due_date, reason, now)
    }
}

#[test]
fn completion_racing_a_sweep_completes_from_overdue() {
    let conn = open_db_in_memory().unwrap();
    let (company, task) = setup(&conn);
    let started = lifecycle(&conn).start(task.id, at(2025, 11, 10)).unwrap();
    assert_eq!(started.status, TaskStatus::InProgress);

    let racing = TaskLifecycle::new(
        SweepBeforeComplete {
            conn: &conn,
            inner: SqliteTaskRepository::try_new(&conn).unwrap(),
            company: company.clone(),
            sweep_at: at(2025, 11, 21),
            swept: Cell::new(false),
        },
        &EngineConfig::default(),
    );
    let completed = racing
        .complete(task.id, at(2025, 11, 21), Some("ARN-7"))
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.filing_reference.as_deref(), Some("ARN-7"));
    assert_eq!(completed.escalation_level, EscalationLevel::None);
    assert_eq!(completed.last_notified_level, EscalationLevel::Overdue);

    let outbox = events(&conn, &task);
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].event.kind, NotificationKind::Overdue);

    let later = lifecycle(&conn)
        .sweep_company(&company, at(2025, 11, 25))
        .unwrap();
    assert_eq!(later.tasks_scanned, 0);
    assert_eq!(events(&conn, &task).len(), 1);
}
