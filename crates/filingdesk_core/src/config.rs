//! Engine configuration.
//!
//! # Responsibility
//! - Load tunables (lead time, scoring window, workers, retry and dispatch
//!   policies) from a JSON file with defaults for every field.
//! - Reject invalid values at load time.
//!
//! # Invariants
//! - A validated config never yields a zero worker count, an empty scoring
//!   window, or a business offset beyond +/-14h.

use crate::catalog::rule_catalog::{CatalogError, RuleCatalog};
use crate::service::dispatcher::DispatchPolicy;
use crate::service::retry::RetryPolicy;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;
const MAX_DISPATCH_BACKOFF_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Days before the due date at which a task becomes near-due.
    pub near_due_lead_days: u32,
    /// Trailing window of the compliance score, in days.
    pub score_window_days: u32,
    /// Upper bound of periods created per (company, rule) in one scan.
    pub max_backfill_periods: u32,
    pub worker_count: usize,
    /// Offset used to turn instants into business dates.
    pub business_utc_offset_minutes: i32,
    pub retry: RetryPolicy,
    pub dispatch: DispatchPolicy,
    /// Rule catalog file; the built-in catalog is used when absent.
    pub catalog_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            near_due_lead_days: 3,
            score_window_days: 365,
            max_backfill_periods: 12,
            worker_count: 4,
            business_utc_offset_minutes: 0,
            retry: RetryPolicy::default(),
            dispatch: DispatchPolicy::default(),
            catalog_path: None,
        }
    }
}

impl EngineConfig {
    /// Reads, parses and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        info!(
            "event=config_load module=config status=ok workers={} lead_days={} window_days={}",
            config.worker_count, config.near_due_lead_days, config.score_window_days
        );
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.score_window_days == 0 {
            return Err(invalid("score_window_days", "must be greater than zero"));
        }
        if self.max_backfill_periods == 0 {
            return Err(invalid("max_backfill_periods", "must be greater than zero"));
        }
        if self.worker_count == 0 {
            return Err(invalid("worker_count", "must be at least 1"));
        }
        if self.business_utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(invalid(
                "business_utc_offset_minutes",
                format!(
                    "{} is outside +/-{MAX_UTC_OFFSET_MINUTES}",
                    self.business_utc_offset_minutes
                ),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(invalid(
                "retry.max_backoff_ms",
                "must not be smaller than retry.initial_backoff_ms",
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(invalid("dispatch.max_attempts", "must be at least 1"));
        }
        if self.dispatch.batch_limit == 0 {
            return Err(invalid("dispatch.batch_limit", "must be at least 1"));
        }
        if self.dispatch.max_backoff_secs > MAX_DISPATCH_BACKOFF_SECS {
            return Err(invalid(
                "dispatch.max_backoff_secs",
                format!("must not exceed {MAX_DISPATCH_BACKOFF_SECS}"),
            ));
        }
        if self.dispatch.max_backoff_secs < self.dispatch.initial_backoff_secs {
            return Err(invalid(
                "dispatch.max_backoff_secs",
                "must not be smaller than dispatch.initial_backoff_secs",
            ));
        }
        Ok(())
    }

    /// Offset applied when converting instants into business dates.
    pub fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.business_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Business date of `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.business_offset()).date_naive()
    }

    /// Loads the configured catalog, or the built-in one.
    pub fn load_catalog(&self) -> Result<RuleCatalog, CatalogError> {
        match &self.catalog_path {
            Some(path) => RuleCatalog::load(path),
            None => RuleCatalog::builtin(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
