//! Escalation notification model.
//!
//! # Responsibility
//! - Define delivery channels and escalation event payloads.
//! - Carry outbox delivery bookkeeping for the dispatcher.
//!
//! # Invariants
//! - One event exists per `(task_id, kind, due_date)`.
//! - Events never carry task state; the task row stays the source of truth.

use crate::model::company::{CompanyId, TenantId};
use crate::model::task::{EscalationLevel, TaskId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of one outbox event.
pub type EventId = Uuid;

/// Delivery channel requested by a company profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Whatsapp,
    InApp,
}

/// Manifest string value for email delivery.
pub const CHANNEL_EMAIL: &str = "email";
/// Manifest string value for SMS delivery.
pub const CHANNEL_SMS: &str = "sms";
/// Manifest string value for WhatsApp delivery.
pub const CHANNEL_WHATSAPP: &str = "whatsapp";
/// Manifest string value for in-app delivery.
pub const CHANNEL_IN_APP: &str = "in_app";

impl NotificationChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => CHANNEL_EMAIL,
            Self::Sms => CHANNEL_SMS,
            Self::Whatsapp => CHANNEL_WHATSAPP,
            Self::InApp => CHANNEL_IN_APP,
        }
    }
}

impl Display for NotificationChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelParseError {
    #[error("notification channel must not be empty")]
    Empty,
    #[error("unsupported notification channel `{0}`")]
    Unsupported(String),
}

/// Parses one channel from its stable string value.
pub fn parse_channel(value: &str) -> Result<NotificationChannel, ChannelParseError> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" => Err(ChannelParseError::Empty),
        CHANNEL_EMAIL => Ok(NotificationChannel::Email),
        CHANNEL_SMS => Ok(NotificationChannel::Sms),
        CHANNEL_WHATSAPP => Ok(NotificationChannel::Whatsapp),
        CHANNEL_IN_APP => Ok(NotificationChannel::InApp),
        other => Err(ChannelParseError::Unsupported(other.to_string())),
    }
}

/// Escalation threshold that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Due date is within the configured lead time.
    NearDue,
    /// Due date has passed without completion.
    Overdue,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NearDue => "near_due",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "near_due" => Some(Self::NearDue),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }

    /// Maps an escalation level to the event it emits, if any.
    pub fn for_level(level: EscalationLevel) -> Option<Self> {
        match level {
            EscalationLevel::None => None,
            EscalationLevel::NearDue => Some(Self::NearDue),
            EscalationLevel::Overdue => Some(Self::Overdue),
        }
    }
}

/// Escalation event handed to notification sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: EventId,
    pub task_id: TaskId,
    pub company_id: CompanyId,
    pub tenant_id: TenantId,
    pub rule_code: String,
    pub period: String,
    pub kind: NotificationKind,
    /// Effective due date at the time the threshold was crossed.
    pub due_date: NaiveDate,
    pub channels: Vec<NotificationChannel>,
    /// Opaque recipient address resolved from the company profile.
    pub recipient: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outbox delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    /// Gave up after exhausting retries or lacking a sink.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Persisted outbox row: event plus delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    pub event: NotificationEvent,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}
