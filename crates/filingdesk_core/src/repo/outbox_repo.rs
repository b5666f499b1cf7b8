//! Notification outbox persistence.
//!
//! # Responsibility
//! - Store escalation events until a dispatcher delivers them.
//! - Track delivery attempts, backoff schedule and terminal state.
//!
//! # Invariants
//! - `(task_id, kind, due_date)` is unique; duplicate inserts are ignored.
//! - Delivery bookkeeping only touches `pending` rows; updates return
//!   `false` when another dispatcher settled the row first.

use crate::model::notification::{
    DeliveryStatus, EventId, NotificationEvent, NotificationKind, OutboxEntry,
};
use crate::model::task::TaskId;
use crate::repo::company_repo::{channels_to_db, parse_channels};
use crate::repo::{
    date_to_db, ensure_connection_ready, parse_date, parse_millis, parse_uuid, RepoError,
    RepoResult,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const OUTBOX_SELECT_SQL: &str = "SELECT
    event_uuid,
    task_uuid,
    company_uuid,
    tenant_uuid,
    rule_code,
    period,
    kind,
    due_date,
    channels,
    recipient,
    status,
    attempts,
    next_attempt_at,
    last_error,
    sent_at,
    created_at
FROM notification_outbox";

/// Query options for listing outbox entries.
#[derive(Debug, Clone, Default)]
pub struct OutboxListQuery {
    pub task_id: Option<TaskId>,
    pub status: Option<DeliveryStatus>,
    pub limit: Option<u32>,
}

/// Repository interface for the notification outbox.
pub trait OutboxRepository {
    /// Pending entries due for delivery at `now`, oldest first.
    fn pending_events(&self, now: DateTime<Utc>, limit: u32) -> RepoResult<Vec<OutboxEntry>>;
    fn mark_sent(&self, id: EventId, attempts: u32, sent_at: DateTime<Utc>) -> RepoResult<bool>;
    fn schedule_retry(
        &self,
        id: EventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> RepoResult<bool>;
    fn mark_failed(&self, id: EventId, attempts: u32, error: &str) -> RepoResult<bool>;
    /// Lists entries ordered by creation time.
    fn list_events(&self, query: &OutboxListQuery) -> RepoResult<Vec<OutboxEntry>>;
}

/// SQLite-backed outbox repository.
pub struct SqliteOutboxRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOutboxRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["notification_outbox"])?;
        Ok(Self { conn })
    }

    fn update_pending(
        &self,
        id: EventId,
        status: DeliveryStatus,
        attempts: u32,
        next_attempt_at: Option<DateTime<Utc>>,
        last_error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE notification_outbox
             SET
                status = ?2,
                attempts = ?3,
                next_attempt_at = COALESCE(?4, next_attempt_at),
                last_error = ?5,
                sent_at = ?6
             WHERE event_uuid = ?1
               AND status = 'pending'
               AND attempts = ?3 - 1;",
            params![
                id.to_string(),
                status.as_str(),
                i64::from(attempts),
                next_attempt_at.map(|at| at.timestamp_millis()),
                last_error,
                sent_at.map(|at| at.timestamp_millis()),
            ],
        )?;
        Ok(changed == 1)
    }
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn pending_events(&self, now: DateTime<Utc>, limit: u32) -> RepoResult<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OUTBOX_SELECT_SQL}
             WHERE status = 'pending'
               AND next_attempt_at <= ?1
             ORDER BY next_attempt_at ASC, created_at ASC, event_uuid ASC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![now.timestamp_millis(), i64::from(limit)])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_outbox_row(row)?);
        }
        Ok(entries)
    }

    fn mark_sent(&self, id: EventId, attempts: u32, sent_at: DateTime<Utc>) -> RepoResult<bool> {
        self.update_pending(
            id,
            DeliveryStatus::Sent,
            attempts,
            None,
            None,
            Some(sent_at),
        )
    }

    fn schedule_retry(
        &self,
        id: EventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> RepoResult<bool> {
        self.update_pending(
            id,
            DeliveryStatus::Pending,
            attempts,
            Some(next_attempt_at),
            Some(error),
            None,
        )
    }

    fn mark_failed(&self, id: EventId, attempts: u32, error: &str) -> RepoResult<bool> {
        self.update_pending(
            id,
            DeliveryStatus::Failed,
            attempts,
            None,
            Some(error),
            None,
        )
    }

    fn list_events(&self, query: &OutboxListQuery) -> RepoResult<Vec<OutboxEntry>> {
        let mut sql = format!("{OUTBOX_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(task_id) = query.task_id {
            sql.push_str(" AND task_uuid = ?");
            bind_values.push(Value::Text(task_id.to_string()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at ASC, event_uuid ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_outbox_row(row)?);
        }
        Ok(entries)
    }
}

/// Enqueues `event` for immediate delivery.
///
/// Returns `false` when an event for the same `(task, kind, due_date)`
/// already exists.
pub(crate) fn insert_event(
    conn: &Connection,
    event: &NotificationEvent,
    now: DateTime<Utc>,
) -> RepoResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO notification_outbox (
            event_uuid,
            task_uuid,
            company_uuid,
            tenant_uuid,
            rule_code,
            period,
            kind,
            due_date,
            channels,
            recipient,
            status,
            attempts,
            next_attempt_at,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', 0, ?11, ?12)
        ON CONFLICT (task_uuid, kind, due_date) DO NOTHING;",
        params![
            event.id.to_string(),
            event.task_id.to_string(),
            event.company_id.to_string(),
            event.tenant_id.to_string(),
            event.rule_code.as_str(),
            event.period.as_str(),
            event.kind.as_str(),
            date_to_db(event.due_date),
            channels_to_db(&event.channels),
            event.recipient.as_deref(),
            now.timestamp_millis(),
            event.created_at.timestamp_millis(),
        ],
    )?;
    Ok(inserted == 1)
}

fn parse_outbox_row(row: &Row<'_>) -> RepoResult<OutboxEntry> {
    let event_text: String = row.get("event_uuid")?;
    let task_text: String = row.get("task_uuid")?;
    let company_text: String = row.get("company_uuid")?;
    let tenant_text: String = row.get("tenant_uuid")?;
    let due_text: String = row.get("due_date")?;
    let channels_text: String = row.get("channels")?;

    let kind_text: String = row.get("kind")?;
    let kind = NotificationKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid kind `{kind_text}` in notification_outbox.kind"
        ))
    })?;

    let status_text: String = row.get("status")?;
    let status = DeliveryStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in notification_outbox.status"
        ))
    })?;

    let attempts_raw: i64 = row.get("attempts")?;
    let attempts = u32::try_from(attempts_raw).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid attempts `{attempts_raw}` in notification_outbox.attempts"
        ))
    })?;

    let event = NotificationEvent {
        id: parse_uuid(&event_text, "notification_outbox.event_uuid")?,
        task_id: parse_uuid(&task_text, "notification_outbox.task_uuid")?,
        company_id: parse_uuid(&company_text, "notification_outbox.company_uuid")?,
        tenant_id: parse_uuid(&tenant_text, "notification_outbox.tenant_uuid")?,
        rule_code: row.get("rule_code")?,
        period: row.get("period")?,
        kind,
        due_date: parse_date(&due_text, "notification_outbox.due_date")?,
        channels: parse_channels(&channels_text)?,
        recipient: row.get("recipient")?,
        created_at: parse_millis(row.get("created_at")?, "notification_outbox.created_at")?,
    };

    Ok(OutboxEntry {
        event,
        status,
        attempts,
        next_attempt_at: parse_millis(
            row.get("next_attempt_at")?,
            "notification_outbox.next_attempt_at",
        )?,
        last_error: row.get("last_error")?,
        sent_at: row
            .get::<_, Option<i64>>("sent_at")?
            .map(|value| parse_millis(value, "notification_outbox.sent_at"))
            .transpose()?,
    })
}
