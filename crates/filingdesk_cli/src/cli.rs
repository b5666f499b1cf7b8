use clap::{Args, Parser, Subcommand, ValueEnum};
use filingdesk_core::{EntityType, NotificationChannel, TaskStatus};
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "filingdesk.db";

#[derive(Parser, Debug)]
#[command(name = "filingdesk", version, about = "Statutory filing deadline engine")]
pub struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH, help = "SQLite database file")]
    pub db: PathBuf,
    #[arg(long, global = true, help = "Engine config file (JSON)")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    pub json: bool,
    #[arg(long, global = true, default_value = "warn", help = "Log level (trace..error)")]
    pub log_level: String,
    #[arg(long, global = true, help = "Write rotated log files here instead of stderr")]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Computes the due date of one rule and period.
    DueDate {
        #[arg(long)]
        rule: String,
        #[arg(long)]
        period: String,
    },
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },
    /// Creates tasks for every open period of every active company.
    Instantiate {
        /// Business date to instantiate up to; defaults to today.
        #[arg(long)]
        today: Option<String>,
    },
    /// Marks overdue tasks and enqueues reminders.
    Sweep {
        /// RFC 3339 instant; defaults to now.
        #[arg(long)]
        now: Option<String>,
    },
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    Score(ScoreArgs),
    /// Delivers pending notifications.
    Dispatch {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommands {
    List,
    Validate {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CompanyCommands {
    Add(CompanyAddArgs),
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value_t = false)]
        include_inactive: bool,
    },
    /// Changes plan or jurisdiction attributes of a company.
    Update(CompanyUpdateArgs),
    Deactivate {
        id: String,
    },
    Subscribe {
        id: String,
        #[arg(required = true)]
        rules: Vec<String>,
        #[arg(long, default_value_t = false)]
        remove: bool,
    },
}

#[derive(Args, Debug)]
pub struct CompanyAddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub tenant: String,
    #[arg(long, default_value = "IN")]
    pub jurisdiction: String,
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long, value_enum, default_value_t = EntityArg::PrivateLimited)]
    pub entity: EntityArg,
    #[arg(long)]
    pub turnover: Option<u64>,
    #[arg(long)]
    pub onboarded_on: String,
    #[arg(long = "rule")]
    pub rules: Vec<String>,
    #[arg(long = "channel", value_enum)]
    pub channels: Vec<ChannelArg>,
    #[arg(long)]
    pub contact: Option<String>,
}

#[derive(Args, Debug)]
pub struct CompanyUpdateArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub jurisdiction: Option<String>,
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long, value_enum)]
    pub entity: Option<EntityArg>,
    #[arg(long)]
    pub turnover: Option<u64>,
    /// Replaces the notification channels when given.
    #[arg(long = "channel", value_enum)]
    pub channels: Vec<ChannelArg>,
    #[arg(long)]
    pub contact: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    List {
        #[arg(long)]
        company: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long, default_value_t = false)]
        open: bool,
        #[arg(long)]
        limit: Option<u32>,
    },
    Start {
        id: String,
    },
    Complete {
        id: String,
        #[arg(long)]
        reference: Option<String>,
    },
    Extend {
        id: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct ScoreArgs {
    #[arg(long, conflicts_with = "tenant", required_unless_present = "tenant")]
    pub company: Option<String>,
    #[arg(long)]
    pub tenant: Option<String>,
    #[arg(long)]
    pub as_of: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum EntityArg {
    PrivateLimited,
    PublicLimited,
    Llp,
    Partnership,
    SoleProprietorship,
    Trust,
    Other,
}

impl From<EntityArg> for EntityType {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::PrivateLimited => Self::PrivateLimited,
            EntityArg::PublicLimited => Self::PublicLimited,
            EntityArg::Llp => Self::Llp,
            EntityArg::Partnership => Self::Partnership,
            EntityArg::SoleProprietorship => Self::SoleProprietorship,
            EntityArg::Trust => Self::Trust,
            EntityArg::Other => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ChannelArg {
    Email,
    Sms,
    Whatsapp,
    InApp,
}

impl From<ChannelArg> for NotificationChannel {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::Email => Self::Email,
            ChannelArg::Sms => Self::Sms,
            ChannelArg::Whatsapp => Self::Whatsapp,
            ChannelArg::InApp => Self::InApp,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StatusArg {
    Pending,
    InProgress,
    Completed,
    Overdue,
}

impl From<StatusArg> for TaskStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::InProgress => Self::InProgress,
            StatusArg::Completed => Self::Completed,
            StatusArg::Overdue => Self::Overdue,
        }
    }
}
