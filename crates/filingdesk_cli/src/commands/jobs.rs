use crate::commands::{parse_date, parse_instant, Context};
use crate::output::print_one;
use chrono::Utc;
use filingdesk_core::service::dispatcher::ChannelRegistry;
use filingdesk_core::Scheduler;

pub fn handle_instantiate(today: Option<&str>, ctx: &Context) -> anyhow::Result<()> {
    let today = match today {
        Some(value) => parse_date(value)?,
        None => ctx.today(),
    };
    let report = Scheduler::new(&ctx.db, &ctx.catalog, &ctx.config).run_instantiation(today, Utc::now())?;
    print_one(ctx.json, report, |r| {
        format!(
            "companies={} created={} existing={} skipped={} failed={}",
            r.companies_scanned,
            r.tasks_created,
            r.tasks_existing,
            r.skipped.len(),
            r.failed_companies.len()
        )
    })
}

pub fn handle_sweep(now: Option<&str>, ctx: &Context) -> anyhow::Result<()> {
    let now = match now {
        Some(value) => parse_instant(value)?,
        None => Utc::now(),
    };
    let summary = Scheduler::new(&ctx.db, &ctx.catalog, &ctx.config).run_sweep(now)?;
    print_one(ctx.json, summary, |s| {
        format!(
            "companies={} scanned={} overdue={} near_due_events={} overdue_events={} failed={}",
            s.companies_scanned,
            s.report.tasks_scanned,
            s.report.marked_overdue,
            s.report.near_due_events,
            s.report.overdue_events,
            s.failed_companies.len()
        )
    })
}

pub fn handle_dispatch(limit: Option<u32>, ctx: &Context) -> anyhow::Result<()> {
    // Real channel transports are wired by the embedding service.
    let registry = ChannelRegistry::with_log_sinks();
    let report = Scheduler::new(&ctx.db, &ctx.catalog, &ctx.config).run_dispatch(&registry, Utc::now(), limit)?;
    print_one(ctx.json, report, |r| {
        format!(
            "attempted={} sent={} retried={} failed={} lost_races={}",
            r.attempted, r.sent, r.retried, r.failed, r.lost_races
        )
    })
}
