//! Project lifecycle commands: init, config, start, status, transition, rollback.

use anyhow::Result;
use console::style;

use super::super::ConfigCommands;
use super::{builder, flush_events, open, ready};
use waypoint::config::Config;
use waypoint::ui;
use waypoint::ui::icons::{CHECK, PIVOT};
use waypoint::waypoint_config::WaypointToml;

pub fn cmd_init(config: &Config, force: bool) -> Result<()> {
    let was_initialized = config.is_initialized();
    let path = config.write_template(force)?;

    if was_initialized {
        println!("Overwrote {}", path.display());
    } else {
        println!("Initialized waypoint project at {}", config.waypoint_dir.display());
    }
    println!();
    println!("Created:");
    println!("  .waypoint/");
    println!("  ├── waypoint.toml  # Phases, gates, milestones, KPIs, workers, stakeholders");
    println!("  └── logs/          # Daily rotated logs");
    println!();
    println!("Next steps:");
    println!("  1. Edit .waypoint/waypoint.toml for your project");
    println!("  2. Run `waypoint config validate`");
    println!("  3. Run `waypoint start`");
    Ok(())
}

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Waypoint Configuration");
            println!("======================");
            println!();
            if config.is_initialized() {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!("No waypoint.toml found at {}", config.config_file.display());
                println!("Using default configuration.");
            }
            println!();
            let toml = config.toml();
            println!("Project:           {}", config.project_name());
            println!("Commitment ratio:  {}", toml.commitment_ratio());
            println!("Sprint length:     {} days", toml.sprint_days());
            println!("Milestone SLA:     {} hours", toml.milestones.sla_hours);
            println!("Gate history:      {} results", toml.gates.history_limit);
            println!("Workers:           {}", toml.workers.len());
            println!("Stakeholders:      {}", toml.stakeholders.len());
            println!("KPIs:              {}", toml.kpis.len());
            println!();
            for phase in &toml.phases {
                println!(
                    "[{}] {} workflows, {} milestones, {} gates",
                    phase.kind,
                    phase.workflows.len(),
                    phase.milestones.len(),
                    phase.gates.len()
                );
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            config.toml().validate()?;
            println!("{}Configuration is valid", CHECK);
            for warning in config.toml().warnings() {
                println!("  {} {}", style("warning:").yellow(), warning);
            }
        }
        Some(ConfigCommands::Template) => {
            print!("{}", WaypointToml::template());
        }
    }
    Ok(())
}

pub async fn cmd_start(config: &Config) -> Result<()> {
    if !config.is_initialized() {
        anyhow::bail!("No waypoint.toml found. Run 'waypoint init' first.");
    }
    config.ensure_directories()?;
    let orchestrator = builder(config).start().await?;
    flush_events(&orchestrator);
    println!(
        "{}Started {} in phase {}",
        CHECK,
        style(orchestrator.project()).bold(),
        orchestrator.stage()
    );
    for warning in config.toml().warnings() {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    Ok(())
}

pub async fn cmd_status(config: &Config, json: bool) -> Result<()> {
    let orchestrator = open(config).await?;
    let status = orchestrator.status_snapshot().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", ui::render_status(&status));
    }
    Ok(())
}

pub async fn cmd_transition(config: &Config) -> Result<()> {
    let orchestrator = open(config).await?;
    let outcome = orchestrator.request_phase_transition().await?;
    flush_events(&orchestrator);
    print!("{}", ui::render_transition(&outcome));
    if !outcome.is_advanced() {
        anyhow::bail!("Phase transition blocked");
    }
    Ok(())
}

pub async fn cmd_rollback(config: &Config) -> Result<()> {
    let orchestrator = open(config).await?;
    let phase = ready(orchestrator.rollback_phase().await?)?;
    flush_events(&orchestrator);
    println!("{}Rolled back to {}", PIVOT, style(phase).bold());
    Ok(())
}
