use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use waypoint::config::Config;
use waypoint::logging::init_tracing;
use waypoint::{Decision, PhaseKind, Priority};

mod cmd;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about = "Multi-phase project orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true, env = "WAYPOINT_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .waypoint/waypoint.toml from the starter template
    Init {
        /// Overwrite an existing waypoint.toml
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Start the project in its first phase
    Start,
    /// Show phase, backlog, sprint, milestones, KPIs and pending approvals
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Manage backlog items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Plan, run and close sprints
    Sprint {
        #[command(subcommand)]
        command: SprintCommands,
    },
    /// Evaluate gates and record reviews
    Gate {
        #[command(subcommand)]
        command: GateCommands,
    },
    /// Request and decide approvals
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Recompute KPIs, or acknowledge an alert
    Kpi {
        /// Alert id to acknowledge
        #[arg(long)]
        ack: Option<String>,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Track the current phase's milestones
    Milestones {
        /// Show the recorded history of one milestone instead
        #[arg(long)]
        history: Option<String>,
    },
    /// Record a fact for `fact` criteria
    Fact {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Record a measurement for `measurement` KPIs and criteria
    Measure {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Change a worker's availability
    Worker { id: String, availability: Availability },
    /// Evaluate the current phase's gates and advance if they all pass
    Transition,
    /// Return to the previous phase
    Rollback,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Print the starter waypoint.toml
    Template,
}

#[derive(Subcommand, Clone)]
pub enum ItemCommands {
    /// Add a backlog item
    Add {
        title: String,
        /// Story points
        #[arg(short, long)]
        estimate: u32,
        /// Defaults to the current phase
        #[arg(long)]
        phase: Option<PhaseKind>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        /// Acceptance criterion; repeat for more than one
        #[arg(long = "criterion", required = true)]
        criteria: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long)]
        depends_on: Vec<String>,
    },
    /// Mark an item done
    Done { id: String },
    /// Mark an acceptance criterion satisfied
    Criterion { id: String, index: usize },
    /// Raise a blocker
    Block { id: String, reason: String },
    /// Resolve a blocker
    Unblock { id: String, blocker: u32 },
    /// Add a dependency
    Depend { id: String, on: String },
    /// Remove an item from planning and metrics
    Archive { id: String },
}

#[derive(Subcommand, Clone)]
pub enum SprintCommands {
    /// Plan the next sprint of the current phase
    Plan,
    Start { id: Option<String> },
    Close { id: Option<String> },
    Cancel { id: Option<String> },
    /// Ideal versus actual remaining points
    Burndown { id: Option<String> },
}

#[derive(Subcommand, Clone)]
pub enum GateCommands {
    /// Evaluate one gate now
    Eval { gate: String },
    /// Record a completed manual review
    Review {
        gate: String,
        review: String,
        #[arg(long)]
        by: String,
    },
    /// Request the gate's missing approvals
    Approvals { gate: String },
    /// Show recorded evaluations
    History { gate: String },
}

#[derive(Subcommand, Clone)]
pub enum ApprovalCommands {
    /// Request an approval for a gate or a free-standing decision
    Request {
        approval_type: String,
        /// Stakeholder asked to decide
        #[arg(long)]
        from: String,
        #[arg(long, conflicts_with = "decision")]
        gate: Option<String>,
        #[arg(long)]
        decision: Option<String>,
    },
    /// Record a decision: approved, rejected or needs_revision
    Decide {
        id: String,
        decision: Decision,
        #[arg(long)]
        by: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Add a comment
    Comment {
        id: String,
        #[arg(long)]
        by: String,
        text: String,
    },
    /// List pending approvals
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose)?;
    let log_dir = config.is_initialized().then_some(config.log_dir.as_path());
    let _guard = init_tracing(cli.verbose, cli.log_json, log_dir)?;

    match cli.command {
        Commands::Init { force } => cmd::cmd_init(&config, force)?,
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
        Commands::Start => cmd::cmd_start(&config).await?,
        Commands::Status { json } => cmd::cmd_status(&config, json).await?,
        Commands::Item { command } => cmd::cmd_item(&config, command).await?,
        Commands::Sprint { command } => cmd::cmd_sprint(&config, command).await?,
        Commands::Gate { command } => cmd::cmd_gate(&config, command).await?,
        Commands::Approval { command } => cmd::cmd_approval(&config, command).await?,
        Commands::Kpi { ack, by } => cmd::cmd_kpi(&config, ack, &by).await?,
        Commands::Milestones { history } => cmd::cmd_milestones(&config, history).await?,
        Commands::Fact { name, value } => cmd::cmd_fact(&config, &name, value).await?,
        Commands::Measure { name, value } => cmd::cmd_measure(&config, &name, value).await?,
        Commands::Worker { id, availability } => {
            cmd::cmd_worker(&config, &id, availability).await?
        }
        Commands::Transition => cmd::cmd_transition(&config).await?,
        Commands::Rollback => cmd::cmd_rollback(&config).await?,
    }

    Ok(())
}
