use chrono::{NaiveDate, TimeZone, Utc};
use filingdesk_core::db::open_db_in_memory;
use filingdesk_core::repo::company_repo::{CompanyRepository, SqliteCompanyRepository};
use filingdesk_core::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use filingdesk_core::service::escalation::TaskLifecycle;
use filingdesk_core::service::scoring::ScoringService;
use filingdesk_core::{
    CompanyProfile, EngineConfig, EntityType, Period, Periodicity, TaskInstance,
};
use rusqlite::Connection;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn onboard(conn: &Connection, tenant_id: Uuid, name: &str) -> CompanyProfile {
    let company = CompanyProfile::new(
        tenant_id,
        name,
        "IN",
        EntityType::PrivateLimited,
        date(2025, 4, 1),
    );
    SqliteCompanyRepository::try_new(conn)
        .unwrap()
        .create_company(&company)
        .unwrap();
    company
}

fn add_task(conn: &Connection, company: &CompanyProfile, label: &str, due: NaiveDate) -> TaskInstance {
    let period = Period::parse(label, Periodicity::Monthly, 4).unwrap();
    let task = TaskInstance::new(company, "GSTR-3B", &period, due, Utc::now());
    SqliteTaskRepository::try_new(conn)
        .unwrap()
        .insert_if_absent(&task)
        .unwrap();
    task
}

fn scoring(conn: &Connection) -> ScoringService<SqliteTaskRepository<'_>, SqliteCompanyRepository<'_>> {
    ScoringService::new(
        SqliteTaskRepository::try_new(conn).unwrap(),
        SqliteCompanyRepository::try_new(conn).unwrap(),
        &EngineConfig::default(),
    )
}

#[test]
fn company_without_tasks_has_neutral_score() {
    let conn = open_db_in_memory().unwrap();
    let company = onboard(&conn, Uuid::new_v4(), "Acme Traders");

    let snapshot = scoring(&conn)
        .score_company(company.id, date(2025, 11, 21))
        .unwrap();
    assert_eq!(snapshot.total, 0);
    assert_eq!(snapshot.score, None);
    assert!(snapshot.is_not_applicable());

    let json = serde_json::to_value(&snapshot).unwrap();
    assert!(json["score"].is_null());
}

#[test]
fn score_is_share_of_on_time_completions() {
    let conn = open_db_in_memory().unwrap();
    let company = onboard(&conn, Uuid::new_v4(), "Acme Traders");
    let lifecycle = TaskLifecycle::new(
        SqliteTaskRepository::try_new(&conn).unwrap(),
        &EngineConfig::default(),
    );

    let on_time = add_task(&conn, &company, "2025-08", date(2025, 9, 22));
    let late = add_task(&conn, &company, "2025-09", date(2025, 10, 21));
    add_task(&conn, &company, "2025-10", date(2025, 11, 20));
    // Due after as_of, outside the window.
    add_task(&conn, &company, "2025-11", date(2025, 12, 22));

    lifecycle
        .complete(on_time.id, Utc.with_ymd_and_hms(2025, 9, 22, 10, 0, 0).unwrap(), None)
        .unwrap();
    lifecycle
        .complete(late.id, Utc.with_ymd_and_hms(2025, 10, 23, 10, 0, 0).unwrap(), None)
        .unwrap();

    let snapshot = scoring(&conn)
        .score_company(company.id, date(2025, 11, 21))
        .unwrap();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.completed_on_time, 1);
    assert_eq!(snapshot.completed_late, 1);
    assert_eq!(snapshot.overdue, 1);
    let score = snapshot.score.unwrap();
    assert!((score - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn on_time_uses_business_offset() {
    let conn = open_db_in_memory().unwrap();
    let company = onboard(&conn, Uuid::new_v4(), "Acme Traders");
    let task = add_task(&conn, &company, "2025-10", date(2025, 11, 20));

    // 20:00 UTC on the due date is already the next day at +05:30.
    let completed_at = Utc.with_ymd_and_hms(2025, 11, 20, 20, 0, 0).unwrap();
    TaskLifecycle::new(
        SqliteTaskRepository::try_new(&conn).unwrap(),
        &EngineConfig::default(),
    )
    .complete(task.id, completed_at, None)
    .unwrap();

    let utc = scoring(&conn)
        .score_company(company.id, date(2025, 11, 21))
        .unwrap();
    assert_eq!(utc.completed_on_time, 1);

    let india = ScoringService::new(
        SqliteTaskRepository::try_new(&conn).unwrap(),
        SqliteCompanyRepository::try_new(&conn).unwrap(),
        &EngineConfig {
            business_utc_offset_minutes: 330,
            ..EngineConfig::default()
        },
    )
    .score_company(company.id, date(2025, 11, 21))
    .unwrap();
    assert_eq!(india.completed_on_time, 0);
    assert_eq!(india.completed_late, 1);
}

#[test]
fn tenant_scores_cover_active_companies() {
    let conn = open_db_in_memory().unwrap();
    let tenant = Uuid::new_v4();
    let alpha = onboard(&conn, tenant, "Alpha Foods");
    let beta = onboard(&conn, tenant, "Beta Exports");
    let retired = onboard(&conn, tenant, "Zeta Mills");
    onboard(&conn, Uuid::new_v4(), "Other Tenant Co");
    add_task(&conn, &beta, "2025-10", date(2025, 11, 20));
    SqliteCompanyRepository::try_new(&conn)
        .unwrap()
        .deactivate_company(retired.id)
        .unwrap();

    let snapshots = scoring(&conn)
        .score_tenant(tenant, date(2025, 11, 21))
        .unwrap();
    assert_eq!(
        snapshots.iter().map(|s| s.company_id).collect::<Vec<_>>(),
        vec![alpha.id, beta.id]
    );
    assert_eq!(snapshots[0].score, None);
    assert_eq!(snapshots[1].score, Some(0.0));
}
