//! Backlog, sprint, worker and fact commands.

use anyhow::Result;
use console::style;

use super::super::{Availability, ItemCommands, SprintCommands};
use super::{flush_events, open, ready};
use waypoint::backlog::NewItem;
use waypoint::config::Config;
use waypoint::ui;
use waypoint::ui::icons::{BLOCKER, CHECK, CROSS};
use waypoint::{ItemId, PhaseKind, SprintId, WorkerId};

pub async fn cmd_item(config: &Config, command: ItemCommands) -> Result<()> {
    let orchestrator = open(config).await?;
    match command {
        ItemCommands::Add {
            title,
            estimate,
            phase,
            priority,
            criteria,
            description,
            workflow,
            depends_on,
        } => {
            let mut new = NewItem::new(title, estimate, phase.unwrap_or(PhaseKind::BusinessModel))
                .with_priority(priority);
            new.phase = phase;
            for criterion in criteria {
                new = new.with_criterion(criterion);
            }
            if let Some(description) = description {
                new = new.with_description(description);
            }
            if let Some(workflow) = workflow {
                new = new.with_workflow(workflow);
            }
            for dependency in depends_on {
                new = new.with_dependency(dependency);
            }
            let id = orchestrator.add_backlog_item(new).await?;
            println!("{}Added {}", CHECK, style(&id).bold());
        }
        ItemCommands::Done { id } => {
            let completion = ready(orchestrator.record_item_completion(&ItemId::from(id)).await?)?;
            println!("{}Completed {}: {}", CHECK, completion.item.id, completion.item.title);
            for milestone in &completion.milestones {
                println!(
                    "  milestone {:<24} {:>3}% {}",
                    milestone.milestone, milestone.completion, milestone.status
                );
            }
            for alert in &completion.triggered_alerts {
                println!("  {} {} is {}", style("alert:").red(), alert.kpi, alert.to);
            }
        }
        ItemCommands::Criterion { id, index } => {
            orchestrator
                .satisfy_acceptance_criterion(&ItemId::from(id.as_str()), index)
                .await?;
            println!("{}Criterion #{} of {} satisfied", CHECK, index, id);
        }
        ItemCommands::Block { id, reason } => {
            let blocker = orchestrator.add_blocker(&ItemId::from(id.as_str()), &reason).await?;
            println!("{}Blocker #{} raised on {}", BLOCKER, blocker, id);
        }
        ItemCommands::Unblock { id, blocker } => {
            let status = orchestrator
                .resolve_blocker(&ItemId::from(id.as_str()), blocker)
                .await?;
            println!("{}Blocker #{} resolved; {} is {}", CHECK, blocker, id, status);
        }
        ItemCommands::Depend { id, on } => {
            orchestrator
                .add_dependency(&ItemId::from(id.as_str()), &ItemId::from(on.as_str()))
                .await?;
            println!("{}{} now depends on {}", CHECK, id, on);
        }
        ItemCommands::Archive { id } => {
            orchestrator.archive_item(&ItemId::from(id.as_str())).await?;
            println!("{}Archived {}", CROSS, id);
        }
    }
    flush_events(&orchestrator);
    Ok(())
}

pub async fn cmd_sprint(config: &Config, command: SprintCommands) -> Result<()> {
    let orchestrator = open(config).await?;
    match command {
        SprintCommands::Plan => {
            let planned = ready(orchestrator.plan_next_sprint().await?)?;
            print!("{}", ui::render_planned_sprint(&planned));
        }
        SprintCommands::Start { id } => {
            let sprint = ready(orchestrator.start_sprint(id.map(SprintId::from)).await?)?;
            println!("{}Started {}", CHECK, style(&sprint.id).bold());
        }
        SprintCommands::Close { id } => {
            let sprint = ready(orchestrator.close_sprint(id.map(SprintId::from)).await?)?;
            println!("{}Closed {}", CHECK, style(&sprint.id).bold());
        }
        SprintCommands::Cancel { id } => {
            let sprint = ready(orchestrator.cancel_sprint(id.map(SprintId::from)).await?)?;
            println!("{}Cancelled {}", CROSS, style(&sprint.id).bold());
        }
        SprintCommands::Burndown { id } => {
            let report = ready(orchestrator.burndown(id.map(SprintId::from)).await?)?;
            print!("{}", ui::render_burndown(&report));
        }
    }
    flush_events(&orchestrator);
    Ok(())
}

pub async fn cmd_worker(config: &Config, id: &str, availability: Availability) -> Result<()> {
    let orchestrator = open(config).await?;
    let status = orchestrator
        .set_worker_availability(&WorkerId::from(id), availability == Availability::Available)
        .await?;
    println!("{}Worker {} is {}", CHECK, id, status);
    Ok(())
}

pub async fn cmd_fact(config: &Config, name: &str, value: bool) -> Result<()> {
    let orchestrator = open(config).await?;
    orchestrator.record_fact(name, value).await?;
    println!("{}{} = {}", CHECK, name, value);
    Ok(())
}

pub async fn cmd_measure(config: &Config, name: &str, value: f64) -> Result<()> {
    let orchestrator = open(config).await?;
    orchestrator.record_measurement(name, value).await?;
    println!("{}{} = {}", CHECK, name, value);
    Ok(())
}
