//! `filingdesk` command-line entry point.
//!
//! # Responsibility
//! - Resolve global flags (database, config, logging) once.
//! - Hand off to the command handlers.

mod cli;
mod commands;
mod output;

use anyhow::Context as _;
use clap::Parser;
use cli::Cli;
use commands::{handle_command, Context};
use filingdesk_core::{init_logging, init_stderr_logging, EngineConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_logging(&cli)?;

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let catalog = config.load_catalog()?;
    log::debug!(
        "event=cli_start module=cli status=ok rules={} db={}",
        catalog.len(),
        cli.db.display()
    );

    let ctx = Context {
        json: cli.json,
        db: cli.db.clone(),
        config,
        catalog,
    };
    handle_command(&cli, &ctx)
}

fn init_cli_logging(cli: &Cli) -> anyhow::Result<()> {
    match &cli.log_dir {
        Some(dir) if dir.is_relative() => {
            let cwd = std::env::current_dir().context("failed to resolve current directory")?;
            init_logging(&cli.log_level, cwd.join(dir))?;
        }
        Some(dir) => init_logging(&cli.log_level, dir)?,
        None => init_stderr_logging(&cli.log_level)?,
    }
    Ok(())
}
