use crate::cli::RuleCommands;
use crate::commands::Context;
use crate::output::{print_one, print_out};
use filingdesk_core::{ObligationRule, RuleCatalog};
use serde::Serialize;

#[derive(Serialize)]
struct CatalogCheck {
    source: String,
    rules: usize,
    fiscal_year_start_month: u32,
}

#[derive(Serialize)]
struct DueDateOut<'a> {
    rule_code: &'a str,
    period: &'a str,
    due_date: String,
}

pub fn handle_rule_commands(command: &RuleCommands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        RuleCommands::List => {
            let rules: Vec<&ObligationRule> = ctx.catalog.rules().collect();
            print_out(ctx.json, &rules, |rule| {
                format!(
                    "{}\t{}\t{}\t{}",
                    rule.code, rule.jurisdiction, rule.periodicity, rule.name
                )
            })
        }
        RuleCommands::Validate { catalog } => {
            let (source, loaded) = match catalog {
                Some(path) => (path.display().to_string(), RuleCatalog::load(path)?),
                None => ("builtin".to_string(), RuleCatalog::builtin()?),
            };
            let check = CatalogCheck {
                source,
                rules: loaded.len(),
                fiscal_year_start_month: loaded.fiscal_year_start_month(),
            };
            print_one(ctx.json, check, |c| {
                format!("catalog valid: {} rules from {}", c.rules, c.source)
            })
        }
    }
}

pub fn handle_due_date(rule: &str, period: &str, ctx: &Context) -> anyhow::Result<()> {
    let due_date = ctx.catalog.due_date(rule.trim(), period.trim())?;
    let out = DueDateOut {
        rule_code: rule.trim(),
        period: period.trim(),
        due_date: due_date.format("%Y-%m-%d").to_string(),
    };
    print_one(ctx.json, out, |o| o.due_date.clone())
}
