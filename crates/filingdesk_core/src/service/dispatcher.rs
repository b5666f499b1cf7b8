//! Outbox notification dispatcher.
//!
//! # Responsibility
//! - Deliver pending escalation events to channel sinks.
//! - Reschedule failed deliveries with exponential backoff and give up after
//!   a bounded number of attempts.
//!
//! # Invariants
//! - Dispatch never touches task state.
//! - Delivery is at-least-once: an event is marked `sent` only after every
//!   registered channel accepted it.
//! - Several dispatchers may drain one outbox; an event settled elsewhere
//!   first is counted as a lost race and skipped.

use crate::model::notification::{NotificationChannel, NotificationEvent, OutboxEntry};
use crate::repo::outbox_repo::OutboxRepository;
use crate::repo::RepoError;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a sink for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DeliveryError {
    message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Delivery adapter for one channel.
pub trait NotificationSink: Send + Sync {
    fn channel(&self) -> NotificationChannel;
    fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

/// Sink that writes events to the log.
#[derive(Debug, Clone, Copy)]
pub struct LogSink {
    channel: NotificationChannel,
}

impl LogSink {
    pub fn new(channel: NotificationChannel) -> Self {
        Self { channel }
    }
}

impl NotificationSink for LogSink {
    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        info!(
            "event=notification_deliver module=dispatch status=ok channel={} event_id={} task_id={} kind={} rule_code={} period={} due_date={}",
            self.channel,
            event.id,
            event.task_id,
            event.kind.as_str(),
            event.rule_code,
            event.period,
            event.due_date
        );
        Ok(())
    }
}

/// Sink registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelRegistryError {
    #[error("sink already registered for channel `{0}`")]
    DuplicateChannel(NotificationChannel),
}

/// Registered sinks, one per channel.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    sinks: BTreeMap<NotificationChannel, Arc<dyn NotificationSink>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a `LogSink` for every channel.
    pub fn with_log_sinks() -> Self {
        let mut registry = Self::new();
        for channel in [
            NotificationChannel::Email,
            NotificationChannel::Sms,
            NotificationChannel::Whatsapp,
            NotificationChannel::InApp,
        ] {
            registry.sinks.insert(channel, Arc::new(LogSink::new(channel)));
        }
        registry
    }

    pub fn register(&mut self, sink: Arc<dyn NotificationSink>) -> Result<(), ChannelRegistryError> {
        let channel = sink.channel();
        if self.sinks.contains_key(&channel) {
            return Err(ChannelRegistryError::DuplicateChannel(channel));
        }
        self.sinks.insert(channel, sink);
        Ok(())
    }

    pub fn get(&self, channel: NotificationChannel) -> Option<Arc<dyn NotificationSink>> {
        self.sinks.get(&channel).cloned()
    }
}

/// Retry schedule for outbox delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchPolicy {
    /// Total delivery attempts before an event is marked failed.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Default number of events handled per drain.
    pub batch_limit: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_secs: 60,
            max_backoff_secs: 3_600,
            batch_limit: 100,
        }
    }
}

impl DispatchPolicy {
    /// Delay after the `attempts`-th failed delivery (1-based).
    pub fn backoff_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_secs);
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

/// Dispatcher errors. Delivery failures are recorded, not returned.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Counters from one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub lost_races: usize,
}

/// Drains the outbox through registered sinks.
pub struct Dispatcher<'r, R: OutboxRepository> {
    repo: R,
    registry: &'r ChannelRegistry,
    policy: DispatchPolicy,
}

impl<'r, R: OutboxRepository> Dispatcher<'r, R> {
    pub fn new(repo: R, registry: &'r ChannelRegistry, policy: DispatchPolicy) -> Self {
        Self {
            repo,
            registry,
            policy,
        }
    }

    /// Delivers up to `limit` events due at `now`.
    pub fn drain(
        &self,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<DispatchReport, DispatchError> {
        let limit = limit.unwrap_or(self.policy.batch_limit);
        let entries = self.repo.pending_events(now, limit)?;
        let mut report = DispatchReport::default();

        for entry in &entries {
            report.attempted += 1;
            let attempts = entry.attempts.saturating_add(1);
            let (settled, outcome) = match self.deliver(entry) {
                Ok(()) => (
                    self.repo.mark_sent(entry.event.id, attempts, now)?,
                    Outcome::Sent,
                ),
                Err(DeliveryFailure::NoSink(message)) => {
                    warn!(
                        "event=dispatch module=dispatch status=failed event_id={} error_code=no_sink error={}",
                        entry.event.id, message
                    );
                    (
                        self.repo.mark_failed(entry.event.id, attempts, &message)?,
                        Outcome::Failed,
                    )
                }
                Err(DeliveryFailure::Sink(message)) if attempts >= self.policy.max_attempts => {
                    warn!(
                        "event=dispatch module=dispatch status=failed event_id={} attempts={} error={}",
                        entry.event.id, attempts, message
                    );
                    (
                        self.repo.mark_failed(entry.event.id, attempts, &message)?,
                        Outcome::Failed,
                    )
                }
                Err(DeliveryFailure::Sink(message)) => {
                    let next_attempt_at = now
                        .checked_add_signed(self.policy.backoff_after(attempts))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    warn!(
                        "event=dispatch module=dispatch status=retry event_id={} attempts={} next_attempt_at={} error={}",
                        entry.event.id, attempts, next_attempt_at, message
                    );
                    (
                        self.repo.schedule_retry(
                            entry.event.id,
                            attempts,
                            next_attempt_at,
                            &message,
                        )?,
                        Outcome::Retried,
                    )
                }
            };

            if !settled {
                info!(
                    "event=dispatch module=dispatch status=lost_race event_id={} attempts={}",
                    entry.event.id, attempts
                );
                report.lost_races += 1;
                continue;
            }
            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Retried => report.retried += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        info!(
            "event=dispatch module=dispatch status=ok attempted={} sent={} retried={} failed={} lost_races={}",
            report.attempted, report.sent, report.retried, report.failed, report.lost_races
        );
        Ok(report)
    }

    fn deliver(&self, entry: &OutboxEntry) -> Result<(), DeliveryFailure> {
        let mut delivered_any = false;
        let mut errors = Vec::new();
        for channel in &entry.event.channels {
            let Some(sink) = self.registry.get(*channel) else {
                warn!(
                    "event=dispatch module=dispatch status=skipped event_id={} channel={} error_code=no_sink",
                    entry.event.id, channel
                );
                continue;
            };
            delivered_any = true;
            if let Err(err) = sink.deliver(&entry.event) {
                errors.push(format!("{channel}: {err}"));
            }
        }

        if !delivered_any {
            let channels = entry
                .event
                .channels
                .iter()
                .map(|channel| channel.as_str())
                .collect::<Vec<_>>()
                .join(",");
            return Err(DeliveryFailure::NoSink(format!(
                "no sink registered for channels [{channels}]"
            )));
        }
        if !errors.is_empty() {
            return Err(DeliveryFailure::Sink(errors.join("; ")));
        }
        Ok(())
    }
}

enum Outcome {
    Sent,
    Retried,
    Failed,
}

enum DeliveryFailure {
    NoSink(String),
    Sink(String),
}
