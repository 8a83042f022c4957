//! Gate, approval, KPI and milestone commands.

use anyhow::Result;
use console::style;

use super::super::{ApprovalCommands, GateCommands};
use super::{flush_events, open};
use waypoint::approvals::ApprovalSubject;
use waypoint::config::Config;
use waypoint::ui;
use waypoint::ui::icons::{ALERT, APPROVAL, CHECK, CLOCK, CROSS};
use waypoint::{AlertId, ApprovalId, GateId, MilestoneId, StakeholderId};

pub async fn cmd_gate(config: &Config, command: GateCommands) -> Result<()> {
    let orchestrator = open(config).await?;
    match command {
        GateCommands::Eval { gate } => {
            let run = orchestrator.evaluate_gate(&GateId::from(gate)).await?;
            print!("{}", ui::render_gate_run(&run));
        }
        GateCommands::Review { gate, review, by } => {
            orchestrator
                .complete_review(&GateId::from(gate.as_str()), &review, &StakeholderId::from(by))
                .await?;
            println!("{}Review '{}' on {} completed", CHECK, review, gate);
        }
        GateCommands::Approvals { gate } => {
            let requested = orchestrator
                .request_gate_approvals(&GateId::from(gate.as_str()))
                .await?;
            if requested.is_empty() {
                println!("Every approval for {} is already pending or granted", gate);
            }
            for id in requested {
                println!("{}Requested {}", APPROVAL, style(&id).bold());
            }
        }
        GateCommands::History { gate } => {
            let history = orchestrator.gate_history(&GateId::from(gate.as_str())).await?;
            if history.is_empty() {
                println!("No evaluations recorded for {}", gate);
            }
            for result in &history {
                print!(
                    "{}{}",
                    style(result.evaluated_at.format("%Y-%m-%d %H:%M ")).dim(),
                    ui::status::render_gate_result(result)
                );
            }
        }
    }
    flush_events(&orchestrator);
    Ok(())
}

pub async fn cmd_approval(config: &Config, command: ApprovalCommands) -> Result<()> {
    let orchestrator = open(config).await?;
    match command {
        ApprovalCommands::Request {
            approval_type,
            from,
            gate,
            decision,
        } => {
            let subject = match (gate, decision) {
                (Some(gate), None) => ApprovalSubject::Gate(GateId::from(gate)),
                (None, Some(decision)) => ApprovalSubject::Decision(decision),
                _ => anyhow::bail!("Pass exactly one of --gate or --decision"),
            };
            let id = orchestrator
                .request_approval(subject, &approval_type, &StakeholderId::from(from))
                .await?;
            println!("{}Requested {}", APPROVAL, style(&id).bold());
        }
        ApprovalCommands::Decide {
            id,
            decision,
            by,
            comment,
        } => {
            let outcome = orchestrator
                .record_decision(&ApprovalId::from(id), decision, comment, &StakeholderId::from(by))
                .await?;
            let icon = if outcome.corrective_item.is_some() { CROSS } else { CHECK };
            println!("{}{} is {}", icon, outcome.approval.id, outcome.approval.decision);
            if let Some(item) = outcome.corrective_item {
                println!("  corrective item {} added to the backlog", style(item).bold());
            }
        }
        ApprovalCommands::Comment { id, by, text } => {
            let count = orchestrator
                .add_approval_comment(
                    &ApprovalId::from(id.as_str()),
                    &StakeholderId::from(by),
                    &text,
                )
                .await?;
            println!("{}{} now has {} comments", CHECK, id, count);
        }
        ApprovalCommands::List => {
            let status = orchestrator.status_snapshot().await;
            if status.pending_approvals.is_empty() {
                println!("No pending approvals");
            }
            for approval in &status.pending_approvals {
                println!(
                    "{}{} '{}' on {} awaiting {}",
                    CLOCK,
                    approval.id,
                    approval.approval_type,
                    approval.subject,
                    approval.requested_from
                );
            }
        }
    }
    flush_events(&orchestrator);
    Ok(())
}

pub async fn cmd_kpi(config: &Config, ack: Option<String>, by: &str) -> Result<()> {
    let orchestrator = open(config).await?;
    if let Some(alert) = ack {
        let alert = orchestrator.acknowledge_alert(&AlertId::from(alert), by).await?;
        println!("{}{} acknowledged by {}", CHECK, alert.id, by);
        return Ok(());
    }

    let report = orchestrator.recompute_kpis().await?;
    flush_events(&orchestrator);
    for reading in &report.readings {
        let value = reading
            .value
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "-".to_string());
        let band = reading
            .band
            .map(|b| b.to_string())
            .unwrap_or_else(|| "no data".to_string());
        println!("{:<28} {:>8} {:<10} {}", reading.name, value, reading.trend, band);
    }
    for alert in &report.triggered {
        println!("{}{} {} -> {} ({})", ALERT, alert.kpi, alert.from, alert.to, alert.id);
    }
    for id in &report.resolved {
        println!("{}{} resolved", CHECK, id);
    }
    Ok(())
}

pub async fn cmd_milestones(config: &Config, history: Option<String>) -> Result<()> {
    let orchestrator = open(config).await?;
    let snapshots = match history {
        Some(id) => orchestrator.milestone_history(&MilestoneId::from(id)).await?,
        None => orchestrator.track_milestones().await?,
    };
    flush_events(&orchestrator);
    if snapshots.is_empty() {
        println!("No milestones tracked in the current phase");
    }
    for snapshot in &snapshots {
        println!(
            "{:<24} {:>3}% {:<12} {}",
            snapshot.milestone,
            snapshot.completion,
            snapshot.status,
            style(snapshot.taken_at.format("%Y-%m-%d %H:%M")).dim()
        );
        for unmet in &snapshot.unmet {
            println!("    unmet: {}", unmet);
        }
        for blocker in &snapshot.blockers {
            println!("    {}", style(blocker).yellow());
        }
    }
    Ok(())
}
