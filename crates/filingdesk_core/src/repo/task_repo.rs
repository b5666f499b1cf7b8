//! Task instance repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Insert task instances idempotently against the
//!   `(company_id, rule_code, period)` uniqueness constraint.
//! - Apply status and escalation changes as compare-and-set updates.
//! - Write escalation events to the outbox in the same transaction as the
//!   watermark change.
//!
//! # Invariants
//! - `insert_if_absent` never overwrites an existing row and never creates
//!   one for an inactive company.
//! - Compare-and-set updates report `false` when another writer won.
//! - Completed rows are never modified by any update in this module.

use crate::model::company::{CompanyId, TenantId};
use crate::model::notification::NotificationEvent;
use crate::model::task::{EscalationLevel, TaskId, TaskInstance, TaskStatus};
use crate::repo::outbox_repo::insert_event;
use crate::repo::{
    bool_to_int, date_to_db, ensure_connection_ready, parse_bool, parse_date, parse_millis,
    parse_optional_date, parse_uuid, RepoError, RepoResult,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

const TASK_SELECT_SQL: &str = "SELECT
    task_uuid,
    company_uuid,
    tenant_uuid,
    rule_code,
    period,
    period_start,
    period_end,
    due_date,
    extended_due_date,
    extension_reason,
    status,
    escalation_level,
    last_notified_level,
    completed_at,
    filing_reference,
    is_archived,
    created_at,
    updated_at
FROM task_instances";

const EFFECTIVE_DUE_SQL: &str = "COALESCE(extended_due_date, due_date)";

/// Query options for listing task instances.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub company_id: Option<CompanyId>,
    pub tenant_id: Option<TenantId>,
    pub rule_code: Option<String>,
    pub status: Option<TaskStatus>,
    /// Excludes completed tasks.
    pub open_only: bool,
    pub include_archived: bool,
    /// Inclusive lower bound on the effective due date.
    pub due_from: Option<NaiveDate>,
    /// Inclusive upper bound on the effective due date.
    pub due_to: Option<NaiveDate>,
    pub limit: Option<u32>,
}

/// Escalation change guarded by the task's last observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationChange {
    pub task_id: TaskId,
    pub expected_status: TaskStatus,
    pub expected_notified_level: EscalationLevel,
    pub expected_due_date: NaiveDate,
    pub new_status: TaskStatus,
    pub new_level: EscalationLevel,
    /// Event written to the outbox when the change commits.
    pub event: Option<NotificationEvent>,
}

/// Repository interface for task instances.
pub trait TaskRepository {
    /// Inserts `task` unless its `(company, rule, period)` already exists
    /// or the owning company is no longer active.
    ///
    /// Returns `true` when a row was created.
    fn insert_if_absent(&self, task: &TaskInstance) -> RepoResult<bool>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<TaskInstance>>;
    fn find_task(
        &self,
        company_id: CompanyId,
        rule_code: &str,
        period: &str,
    ) -> RepoResult<Option<TaskInstance>>;
    /// Lists tasks ordered by effective due date, then rule code and id.
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<TaskInstance>>;
    /// Start date of the most recent period instantiated for the pair.
    fn latest_period_start(
        &self,
        company_id: CompanyId,
        rule_code: &str,
    ) -> RepoResult<Option<NaiveDate>>;
    /// `pending -> in_progress`.
    fn start_task(&self, id: TaskId, now: DateTime<Utc>) -> RepoResult<bool>;
    /// `expected -> completed`. Clears the escalation level and keeps the
    /// notification watermark.
    fn complete_task(
        &self,
        id: TaskId,
        expected: TaskStatus,
        completed_at: DateTime<Utc>,
        filing_reference: Option<&str>,
    ) -> RepoResult<bool>;
    /// Applies a watermark/status change and enqueues its event atomically.
    fn apply_escalation(&self, change: &EscalationChange, now: DateTime<Utc>) -> RepoResult<bool>;
    /// Sets an extended due date and resets escalation state.
    fn extend_due_date(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new_due_date: NaiveDate,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> RepoResult<bool>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["companies", "task_instances", "notification_outbox"])?;
        Ok(Self { conn })
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn insert_if_absent(&self, task: &TaskInstance) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO task_instances (
                task_uuid,
                company_uuid,
                tenant_uuid,
                rule_code,
                period,
                period_start,
                period_end,
                due_date,
                extended_due_date,
                extension_reason,
                status,
                escalation_level,
                last_notified_level,
                completed_at,
                filing_reference,
                is_archived,
                created_at,
                updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
            WHERE EXISTS (
                SELECT 1 FROM companies WHERE company_uuid = ?2 AND is_active = 1
            )
            ON CONFLICT (company_uuid, rule_code, period) DO NOTHING;",
            params![
                task.id.to_string(),
                task.company_id.to_string(),
                task.tenant_id.to_string(),
                task.rule_code.as_str(),
                task.period.as_str(),
                date_to_db(task.period_start),
                date_to_db(task.period_end),
                date_to_db(task.due_date),
                task.extended_due_date.map(date_to_db),
                task.extension_reason.as_deref(),
                task.status.as_str(),
                task.escalation_level.rank(),
                task.last_notified_level.rank(),
                task.completed_at.map(|at| at.timestamp_millis()),
                task.filing_reference.as_deref(),
                bool_to_int(task.is_archived),
                task.created_at.timestamp_millis(),
                task.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<TaskInstance>> {
        self.conn
            .query_row(
                &format!("{TASK_SELECT_SQL} WHERE task_uuid = ?1;"),
                [id.to_string()],
                |row| Ok(parse_task_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn find_task(
        &self,
        company_id: CompanyId,
        rule_code: &str,
        period: &str,
    ) -> RepoResult<Option<TaskInstance>> {
        self.conn
            .query_row(
                &format!(
                    "{TASK_SELECT_SQL}
                     WHERE company_uuid = ?1
                       AND rule_code = ?2
                       AND period = ?3;"
                ),
                params![company_id.to_string(), rule_code, period],
                |row| Ok(parse_task_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<TaskInstance>> {
        let mut sql = format!("{TASK_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_archived {
            sql.push_str(" AND is_archived = 0");
        }
        if query.open_only {
            sql.push_str(" AND status <> 'completed'");
        }
        if let Some(company_id) = query.company_id {
            sql.push_str(" AND company_uuid = ?");
            bind_values.push(Value::Text(company_id.to_string()));
        }
        if let Some(tenant_id) = query.tenant_id {
            sql.push_str(" AND tenant_uuid = ?");
            bind_values.push(Value::Text(tenant_id.to_string()));
        }
        if let Some(rule_code) = &query.rule_code {
            sql.push_str(" AND rule_code = ?");
            bind_values.push(Value::Text(rule_code.clone()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(due_from) = query.due_from {
            sql.push_str(&format!(" AND {EFFECTIVE_DUE_SQL} >= ?"));
            bind_values.push(Value::Text(date_to_db(due_from)));
        }
        if let Some(due_to) = query.due_to {
            sql.push_str(&format!(" AND {EFFECTIVE_DUE_SQL} <= ?"));
            bind_values.push(Value::Text(date_to_db(due_to)));
        }

        sql.push_str(&format!(
            " ORDER BY {EFFECTIVE_DUE_SQL} ASC, rule_code ASC, task_uuid ASC"
        ));
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn latest_period_start(
        &self,
        company_id: CompanyId,
        rule_code: &str,
    ) -> RepoResult<Option<NaiveDate>> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(period_start)
             FROM task_instances
             WHERE company_uuid = ?1
               AND rule_code = ?2;",
            params![company_id.to_string(), rule_code],
            |row| row.get(0),
        )?;
        parse_optional_date(latest, "task_instances.period_start")
    }

    fn start_task(&self, id: TaskId, now: DateTime<Utc>) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET
                status = 'in_progress',
                updated_at = ?2
             WHERE task_uuid = ?1
               AND status = 'pending'
               AND is_archived = 0;",
            params![id.to_string(), now.timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    fn complete_task(
        &self,
        id: TaskId,
        expected: TaskStatus,
        completed_at: DateTime<Utc>,
        filing_reference: Option<&str>,
    ) -> RepoResult<bool> {
        if expected.is_terminal() {
            return Ok(false);
        }
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET
                status = 'completed',
                escalation_level = 0,
                completed_at = ?3,
                filing_reference = ?4,
                updated_at = ?3
             WHERE task_uuid = ?1
               AND status = ?2
               AND is_archived = 0;",
            params![
                id.to_string(),
                expected.as_str(),
                completed_at.timestamp_millis(),
                filing_reference,
            ],
        )?;
        Ok(changed == 1)
    }

    fn apply_escalation(&self, change: &EscalationChange, now: DateTime<Utc>) -> RepoResult<bool> {
        if change.expected_status.is_terminal() || change.new_status == TaskStatus::Completed {
            return Ok(false);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            &format!(
                "UPDATE task_instances
                 SET
                    status = ?5,
                    escalation_level = ?6,
                    last_notified_level = ?6,
                    updated_at = ?7
                 WHERE task_uuid = ?1
                   AND status = ?2
                   AND last_notified_level = ?3
                   AND {EFFECTIVE_DUE_SQL} = ?4
                   AND is_archived = 0;"
            ),
            params![
                change.task_id.to_string(),
                change.expected_status.as_str(),
                change.expected_notified_level.rank(),
                date_to_db(change.expected_due_date),
                change.new_status.as_str(),
                change.new_level.rank(),
                now.timestamp_millis(),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        if let Some(event) = &change.event {
            insert_event(&tx, event, now)?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn extend_due_date(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new_due_date: NaiveDate,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET
                extended_due_date = ?3,
                extension_reason = ?4,
                escalation_level = 0,
                last_notified_level = 0,
                updated_at = ?5
             WHERE task_uuid = ?1
               AND status = ?2
               AND status IN ('pending', 'in_progress')
               AND is_archived = 0;",
            params![
                id.to_string(),
                expected.as_str(),
                date_to_db(new_due_date),
                reason,
                now.timestamp_millis(),
            ],
        )?;
        Ok(changed == 1)
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<TaskInstance> {
    let id_text: String = row.get("task_uuid")?;
    let company_text: String = row.get("company_uuid")?;
    let tenant_text: String = row.get("tenant_uuid")?;
    let period_start: String = row.get("period_start")?;
    let period_end: String = row.get("period_end")?;
    let due_date: String = row.get("due_date")?;

    let status_text: String = row.get("status")?;
    let status = TaskStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid task status `{status_text}` in task_instances.status"
        ))
    })?;

    let completed_at = row
        .get::<_, Option<i64>>("completed_at")?
        .map(|value| parse_millis(value, "task_instances.completed_at"))
        .transpose()?;
    if status == TaskStatus::Completed && completed_at.is_none() {
        return Err(RepoError::InvalidData(format!(
            "completed task {id_text} has no completed_at"
        )));
    }

    Ok(TaskInstance {
        id: parse_uuid(&id_text, "task_instances.task_uuid")?,
        company_id: parse_uuid(&company_text, "task_instances.company_uuid")?,
        tenant_id: parse_uuid(&tenant_text, "task_instances.tenant_uuid")?,
        rule_code: row.get("rule_code")?,
        period: row.get("period")?,
        period_start: parse_date(&period_start, "task_instances.period_start")?,
        period_end: parse_date(&period_end, "task_instances.period_end")?,
        due_date: parse_date(&due_date, "task_instances.due_date")?,
        extended_due_date: parse_optional_date(
            row.get("extended_due_date")?,
            "task_instances.extended_due_date",
        )?,
        extension_reason: row.get("extension_reason")?,
        status,
        escalation_level: parse_level(row.get("escalation_level")?, "escalation_level")?,
        last_notified_level: parse_level(row.get("last_notified_level")?, "last_notified_level")?,
        completed_at,
        filing_reference: row.get("filing_reference")?,
        is_archived: parse_bool(row.get("is_archived")?, "task_instances.is_archived")?,
        created_at: parse_millis(row.get("created_at")?, "task_instances.created_at")?,
        updated_at: parse_millis(row.get("updated_at")?, "task_instances.updated_at")?,
    })
}

fn parse_level(value: i64, column: &'static str) -> RepoResult<EscalationLevel> {
    EscalationLevel::from_rank(value).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid escalation level `{value}` in task_instances.{column}"
        ))
    })
}
