//! Command handler layer.
//!
//! ## Files
//! - `catalog.rs`: rules list/validate and due-date lookups.
//! - `company.rs`: company onboarding, profile updates and subscriptions.
//! - `task.rs`: task transitions and compliance scores.
//! - `jobs.rs`: instantiate/sweep/dispatch runs.
//!
//! ## Principles
//! - Parse CLI inputs here.
//! - Delegate business logic to `filingdesk_core`.
//! - Keep output schema stable.

pub mod catalog;
pub mod company;
pub mod jobs;
pub mod task;

use crate::cli::{Cli, Commands};
use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use filingdesk_core::{EngineConfig, RuleCatalog};
use std::path::PathBuf;
use uuid::Uuid;

/// Resolved settings shared by all handlers.
pub struct Context {
    pub json: bool,
    pub db: PathBuf,
    pub config: EngineConfig,
    pub catalog: RuleCatalog,
}

impl Context {
    /// Business date of the current instant.
    pub fn today(&self) -> NaiveDate {
        self.config.local_date(Utc::now())
    }
}

pub fn handle_command(cli: &Cli, ctx: &Context) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Rules { command } => catalog::handle_rule_commands(command, ctx),
        Commands::DueDate { rule, period } => catalog::handle_due_date(rule, period, ctx),
        Commands::Company { command } => company::handle_company_commands(command, ctx),
        Commands::Task { command } => task::handle_task_commands(command, ctx),
        Commands::Score(args) => task::handle_score(args, ctx),
        Commands::Instantiate { today } => jobs::handle_instantiate(today.as_deref(), ctx),
        Commands::Sweep { now } => jobs::handle_sweep(now.as_deref(), ctx),
        Commands::Dispatch { limit } => jobs::handle_dispatch(*limit, ctx),
    }
}

pub fn parse_id(value: &str, what: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(value.trim()).with_context(|| format!("invalid {what} id `{value}`"))
}

pub fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date `{value}`, expected YYYY-MM-DD"))
}

pub fn parse_instant(value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .with_context(|| format!("invalid instant `{value}`, expected RFC 3339"))
}

#[cfg(test)]
mod tests {
    use super::{parse_date, parse_id, parse_instant};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn parses_dates_and_instants() {
        assert_eq!(
            parse_date("2025-11-20").unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 20).unwrap()
        );
        assert_eq!(
            parse_instant("2025-11-21T11:30:00+05:30").unwrap(),
            Utc.with_ymd_and_hms(2025, 11, 21, 6, 0, 0).unwrap()
        );
        assert!(parse_date("20-11-2025").is_err());
        assert!(parse_instant("2025-11-21").is_err());
    }

    #[test]
    fn rejects_malformed_ids() {
        let err = parse_id("not-a-uuid", "company").unwrap_err();
        assert!(err.to_string().contains("invalid company id"));
    }
}
