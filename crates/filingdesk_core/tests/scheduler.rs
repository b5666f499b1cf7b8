use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use filingdesk_core::db::open_db;
use filingdesk_core::repo::company_repo::{CompanyRepository, SqliteCompanyRepository};
use filingdesk_core::repo::outbox_repo::{OutboxListQuery, OutboxRepository, SqliteOutboxRepository};
use filingdesk_core::repo::task_repo::{SqliteTaskRepository, TaskListQuery, TaskRepository};
use filingdesk_core::service::dispatcher::ChannelRegistry;
use filingdesk_core::service::instantiator::InstantiationReport;
use filingdesk_core::service::scheduler::SweepSummary;
use filingdesk_core::{CompanyProfile, EngineConfig, EntityType, RuleCatalog, Scheduler, TaskStatus};
use std::path::Path;
use uuid::Uuid;

const COMPANIES: usize = 6;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 6, 0, 0).unwrap()
}

fn seed(path: &Path) -> Vec<CompanyProfile> {
    let conn = open_db(path).unwrap();
    let repo = SqliteCompanyRepository::try_new(&conn).unwrap();
    (0..COMPANIES)
        .map(|index| {
            let mut company = CompanyProfile::new(
                Uuid::new_v4(),
                format!("Company {index}"),
                "IN",
                EntityType::PrivateLimited,
                date(2025, 9, 1),
            );
            company.subscribe(["GSTR-3B", "GSTR-1"]);
            repo.create_company(&company).unwrap();
            company
        })
        .collect()
}

fn config(workers: usize) -> EngineConfig {
    EngineConfig {
        worker_count: workers,
        ..EngineConfig::default()
    }
}

#[test]
fn instantiation_fans_out_over_companies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    seed(&path);
    let catalog = RuleCatalog::builtin().unwrap();
    let config = config(3);

    let report = Scheduler::new(&path, &catalog, &config)
        .run_instantiation(date(2025, 11, 21), at(2025, 11, 21))
        .unwrap();
    assert_eq!(report.companies_scanned, COMPANIES);
    // Sep, Oct, Nov for two rules.
    assert_eq!(report.tasks_created, COMPANIES * 6);
    assert!(report.failed_companies.is_empty());
}

#[test]
fn concurrent_instantiation_creates_each_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let companies = seed(&path);
    let catalog = RuleCatalog::builtin().unwrap();
    let config = config(4);

    let reports: Vec<InstantiationReport> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| {
                    Scheduler::new(&path, &catalog, &config)
                        .run_instantiation(date(2025, 11, 21), at(2025, 11, 21))
                        .unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let created: usize = reports.iter().map(|report| report.tasks_created).sum();
    assert_eq!(created, COMPANIES * 6);
    assert!(reports
        .iter()
        .all(|report| report.failed_companies.is_empty()));

    let conn = open_db(&path).unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    for company in &companies {
        let tasks = repo
            .list_tasks(&TaskListQuery {
                company_id: Some(company.id),
                ..TaskListQuery::default()
            })
            .unwrap();
        assert_eq!(tasks.len(), 6);
    }
}

#[test]
fn concurrent_sweeps_notify_each_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    seed(&path);
    let catalog = RuleCatalog::builtin().unwrap();
    let config = config(4);
    Scheduler::new(&path, &catalog, &config)
        .run_instantiation(date(2025, 11, 21), at(2025, 11, 21))
        .unwrap();

    let now = at(2025, 12, 15);
    let summaries: Vec<SweepSummary> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| Scheduler::new(&path, &catalog, &config).run_sweep(now).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });
    assert!(summaries
        .iter()
        .all(|summary| summary.failed_companies.is_empty()));

    let conn = open_db(&path).unwrap();
    let tasks = SqliteTaskRepository::try_new(&conn)
        .unwrap()
        .list_tasks(&TaskListQuery::default())
        .unwrap();
    let overdue: Vec<_> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Overdue)
        .collect();
    // GSTR-3B Sep and Oct, GSTR-1 Sep through Nov.
    assert_eq!(overdue.len(), COMPANIES * 5);

    let marked: usize = summaries
        .iter()
        .map(|summary| summary.report.marked_overdue)
        .sum();
    assert_eq!(marked, overdue.len());

    let outbox = SqliteOutboxRepository::try_new(&conn).unwrap();
    for task in &overdue {
        let events = outbox
            .list_events(&OutboxListQuery {
                task_id: Some(task.id),
                ..OutboxListQuery::default()
            })
            .unwrap();
        assert_eq!(events.len(), 1, "task {} got {} events", task.id, events.len());
    }
}

#[test]
fn dispatch_drains_the_outbox() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    seed(&path);
    let catalog = RuleCatalog::builtin().unwrap();
    let config = config(2);
    let scheduler = Scheduler::new(&path, &catalog, &config);
    scheduler
        .run_instantiation(date(2025, 11, 21), at(2025, 11, 21))
        .unwrap();
    let sweep = scheduler.run_sweep(at(2025, 12, 15)).unwrap();
    let events = sweep.report.near_due_events + sweep.report.overdue_events;
    assert!(events > 0);

    let report = scheduler
        .run_dispatch(&ChannelRegistry::with_log_sinks(), at(2025, 12, 15), Some(1_000))
        .unwrap();
    assert_eq!(report.sent, events);
}
