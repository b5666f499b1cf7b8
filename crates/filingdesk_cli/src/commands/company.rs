use crate::cli::{CompanyAddArgs, CompanyCommands, CompanyUpdateArgs};
use crate::commands::{parse_date, parse_id, Context};
use crate::output::{print_one, print_out};
use filingdesk_core::repo::company_repo::{CompanyListQuery, SqliteCompanyRepository};
use filingdesk_core::service::company_service::{CompanyService, ProfileUpdate};
use filingdesk_core::{open_db, CompanyId, CompanyProfile};
use serde::Serialize;

#[derive(Serialize)]
struct Deactivated {
    company_id: CompanyId,
    archived_tasks: usize,
}

pub fn handle_company_commands(command: &CompanyCommands, ctx: &Context) -> anyhow::Result<()> {
    let conn = open_db(&ctx.db)?;
    let service = CompanyService::new(SqliteCompanyRepository::try_new(&conn)?, &ctx.catalog);

    match command {
        CompanyCommands::Add(args) => {
            let company = build_company(args)?;
            let id = service.onboard(&company)?;
            let stored = service.get(id)?.unwrap_or(company);
            print_one(ctx.json, stored, |c| c.id.to_string())
        }
        CompanyCommands::List {
            tenant,
            include_inactive,
        } => {
            let tenant_id = tenant
                .as_deref()
                .map(|value| parse_id(value, "tenant"))
                .transpose()?;
            let companies = service.list(&CompanyListQuery {
                tenant_id,
                include_inactive: *include_inactive,
            })?;
            print_out(ctx.json, &companies, company_row)
        }
        CompanyCommands::Update(args) => {
            let company_id = parse_id(&args.id, "company")?;
            let company = service.update_profile(company_id, &profile_update(args))?;
            print_one(ctx.json, company, company_row)
        }
        CompanyCommands::Deactivate { id } => {
            let company_id = parse_id(id, "company")?;
            let archived_tasks = service.deactivate(company_id)?;
            print_one(
                ctx.json,
                Deactivated {
                    company_id,
                    archived_tasks,
                },
                |d| format!("deactivated {}, archived {} tasks", d.company_id, d.archived_tasks),
            )
        }
        CompanyCommands::Subscribe { id, rules, remove } => {
            let company_id = parse_id(id, "company")?;
            let company = if *remove {
                service.unsubscribe(company_id, rules)?
            } else {
                service.subscribe(company_id, rules)?
            };
            print_one(ctx.json, company, company_row)
        }
    }
}

fn build_company(args: &CompanyAddArgs) -> anyhow::Result<CompanyProfile> {
    let mut company = CompanyProfile::new(
        parse_id(&args.tenant, "tenant")?,
        args.name.trim(),
        args.jurisdiction.trim(),
        args.entity.into(),
        parse_date(&args.onboarded_on)?,
    );
    company.state = args.state.clone();
    company.annual_turnover = args.turnover;
    company.contact = args.contact.clone();
    if !args.channels.is_empty() {
        company.notification_channels = args.channels.iter().map(|&c| c.into()).collect();
        company.notification_channels.sort_unstable();
        company.notification_channels.dedup();
    }
    company.subscribe(args.rules.iter().map(String::as_str));
    Ok(company)
}

fn profile_update(args: &CompanyUpdateArgs) -> ProfileUpdate {
    ProfileUpdate {
        name: args.name.clone(),
        jurisdiction: args.jurisdiction.clone(),
        state: args.state.clone(),
        entity_type: args.entity.map(Into::into),
        annual_turnover: args.turnover,
        notification_channels: (!args.channels.is_empty())
            .then(|| args.channels.iter().map(|&c| c.into()).collect()),
        contact: args.contact.clone(),
    }
}

fn company_row(company: &CompanyProfile) -> String {
    let rules: Vec<&str> = company.subscribed_rules.iter().map(String::as_str).collect();
    format!(
        "{}\t{}\t{}\t{}\t{}",
        company.id,
        company.name,
        company.jurisdiction,
        rules.join(","),
        if company.is_active { "active" } else { "inactive" }
    )
}
