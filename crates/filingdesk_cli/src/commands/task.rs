use crate::cli::{ScoreArgs, TaskCommands};
use crate::commands::{parse_date, parse_id, Context};
use crate::output::{print_one, print_out, score_text};
use chrono::Utc;
use filingdesk_core::repo::company_repo::SqliteCompanyRepository;
use filingdesk_core::repo::task_repo::{SqliteTaskRepository, TaskListQuery};
use filingdesk_core::service::escalation::TaskLifecycle;
use filingdesk_core::service::scoring::ScoringService;
use filingdesk_core::{open_db, ComplianceScoreSnapshot, TaskInstance};

pub fn handle_task_commands(command: &TaskCommands, ctx: &Context) -> anyhow::Result<()> {
    let conn = open_db(&ctx.db)?;
    let lifecycle = TaskLifecycle::new(SqliteTaskRepository::try_new(&conn)?, &ctx.config);
    let now = Utc::now();

    match command {
        TaskCommands::List {
            company,
            status,
            open,
            limit,
        } => {
            let company_id = company
                .as_deref()
                .map(|value| parse_id(value, "company"))
                .transpose()?;
            let tasks = lifecycle.list(&TaskListQuery {
                company_id,
                status: status.map(Into::into),
                open_only: *open,
                limit: *limit,
                ..TaskListQuery::default()
            })?;
            print_out(ctx.json, &tasks, task_row)
        }
        TaskCommands::Start { id } => {
            let task = lifecycle.start(parse_id(id, "task")?, now)?;
            print_one(ctx.json, task, task_row)
        }
        TaskCommands::Complete { id, reference } => {
            let task = lifecycle.complete(parse_id(id, "task")?, now, reference.as_deref())?;
            print_one(ctx.json, task, task_row)
        }
        TaskCommands::Extend { id, to, reason } => {
            let task = lifecycle.extend_due_date(
                parse_id(id, "task")?,
                parse_date(to)?,
                reason.as_deref(),
                now,
            )?;
            print_one(ctx.json, task, task_row)
        }
    }
}

pub fn handle_score(args: &ScoreArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = open_db(&ctx.db)?;
    let scoring = ScoringService::new(
        SqliteTaskRepository::try_new(&conn)?,
        SqliteCompanyRepository::try_new(&conn)?,
        &ctx.config,
    );
    let as_of = match &args.as_of {
        Some(value) => parse_date(value)?,
        None => ctx.today(),
    };

    match (&args.company, &args.tenant) {
        (Some(company), _) => {
            let snapshot = scoring.score_company(parse_id(company, "company")?, as_of)?;
            print_one(ctx.json, snapshot, score_row)
        }
        (None, Some(tenant)) => {
            let snapshots = scoring.score_tenant(parse_id(tenant, "tenant")?, as_of)?;
            print_out(ctx.json, &snapshots, score_row)
        }
        (None, None) => anyhow::bail!("either --company or --tenant is required"),
    }
}

fn task_row(task: &TaskInstance) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        task.id,
        task.rule_code,
        task.period,
        task.effective_due_date().format("%Y-%m-%d"),
        task.status
    )
}

fn score_row(snapshot: &ComplianceScoreSnapshot) -> String {
    format!(
        "{}\t{}\ttotal={} on_time={} late={} overdue={} open={}",
        snapshot.company_id,
        score_text(snapshot.score),
        snapshot.total,
        snapshot.completed_on_time,
        snapshot.completed_late,
        snapshot.overdue,
        snapshot.open
    )
}
