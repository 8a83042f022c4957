//! Plain-terminal rendering of orchestrator results.
//!
//! Every report is a `Display` type; the `render_*` functions return `String`s
//! so commands decide where output goes and tests can inspect it with colours
//! disabled.

use console::style;
use std::fmt;

use crate::gates::{GateResult, GateRun};
use crate::orchestrator::{StatusSnapshot, TransitionOutcome};
use crate::planner::{BurndownReport, PlannedSprint};
use crate::ui::icons::{ALERT, APPROVAL, BLOCKER, CHECK, CROSS, GATE, PROGRESS, SPARKLE};
use waypoint_common::Band;

fn band_label(band: Option<Band>) -> String {
    match band {
        Some(Band::Excellent) => style("excellent").green().bold().to_string(),
        Some(Band::Good) => style("good").green().to_string(),
        Some(Band::Warning) => style("warning").yellow().to_string(),
        Some(Band::Critical) => style("critical").red().bold().to_string(),
        None => style("no data").dim().to_string(),
    }
}

fn bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

struct StatusReport<'a>(&'a StatusSnapshot);

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.0;
        writeln!(f)?;
        writeln!(f, "{}", style(format!("{} status", status.project)).bold())?;
        writeln!(f, "{}", "=".repeat(status.project.len() + 7))?;
        writeln!(f)?;
        writeln!(
            f,
            "Stage:   {} (since {})",
            style(status.stage).cyan(),
            status.phase_entered_at.format("%Y-%m-%d %H:%M")
        )?;
        match status.next_phase {
            Some(next) => writeln!(f, "Next:    {}", next)?,
            None if status.stage.is_completed() => {}
            None => writeln!(f, "Next:    project completion")?,
        }
        for record in &status.phase_history {
            writeln!(
                f,
                "         {} {} ({} to {})",
                style("done").dim(),
                record.phase,
                record.entered_at.format("%Y-%m-%d"),
                record.exited_at.format("%Y-%m-%d")
            )?;
        }

        let summary = &status.backlog;
        writeln!(f)?;
        writeln!(
            f,
            "{}Backlog: {}/{} points done {}",
            PROGRESS,
            summary.points.done,
            summary.points.total,
            bar(summary.points.percent(), 20)
        )?;
        writeln!(
            f,
            "         {} backlog, {} assigned, {} in progress, {} blocked, {} done",
            summary.backlog, summary.assigned, summary.in_progress, summary.blocked, summary.done
        )?;
        for workflow in &status.workflows {
            writeln!(
                f,
                "  {:<24} {:>5.1}% {}",
                workflow.name,
                workflow.percent,
                bar(workflow.percent, 20)
            )?;
        }

        writeln!(f)?;
        match &status.sprint {
            Some(sprint) => writeln!(
                f,
                "Sprint:  {} ({}) {} items, {}/{} points, ends {}",
                sprint.id,
                sprint.status,
                sprint.assignments.len(),
                sprint.committed(),
                sprint.capacity,
                sprint.ends_at.format("%Y-%m-%d")
            )?,
            None => writeln!(f, "Sprint:  {}", style("none planned").dim())?,
        }

        if !status.workers.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<16} {:<12} {:>9}", "Worker", "Status", "Workload")?;
            for worker in &status.workers {
                writeln!(
                    f,
                    "{:<16} {:<12} {:>4}/{:<4}",
                    worker.id, worker.status, worker.workload, worker.capacity
                )?;
            }
        }

        if !status.milestones.is_empty() {
            writeln!(f)?;
            writeln!(f, "Milestones:")?;
            for milestone in &status.milestones {
                let icon = if milestone.completion == 100 {
                    CHECK.to_string()
                } else {
                    "  ".to_string()
                };
                writeln!(
                    f,
                    "  {}{:<28} {:>3}% {}",
                    icon, milestone.name, milestone.completion, milestone.status
                )?;
            }
        }

        if !status.kpis.is_empty() {
            writeln!(f)?;
            writeln!(f, "KPIs:")?;
            for kpi in &status.kpis {
                let value = kpi
                    .value
                    .map(|v| format!("{:.1}", v))
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    f,
                    "  {:<28} {:>8} {:<10} {}",
                    kpi.name,
                    value,
                    kpi.trend,
                    band_label(kpi.band)
                )?;
            }
        }

        if !status.recent_alerts.is_empty() {
            writeln!(f)?;
            for alert in &status.recent_alerts {
                writeln!(
                    f,
                    "{}{} {} {} -> {} at {:.1} ({})",
                    ALERT, alert.id, alert.kpi, alert.from, alert.to, alert.value, alert.status
                )?;
            }
        }

        if !status.pending_approvals.is_empty() {
            writeln!(f)?;
            for approval in &status.pending_approvals {
                writeln!(
                    f,
                    "{}{} '{}' on {} awaiting {}",
                    APPROVAL,
                    approval.id,
                    approval.approval_type,
                    approval.subject,
                    approval.requested_from
                )?;
            }
        }
        Ok(())
    }
}

struct GateReport<'a>(&'a GateResult);

impl fmt::Display for GateReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        let icon = if result.passed { CHECK } else { CROSS };
        writeln!(
            f,
            "{}{}{} ({}, revision {})",
            GATE,
            icon,
            style(&result.gate).bold(),
            result.phase,
            result.revision
        )?;
        for blocking in result.blocking() {
            writeln!(f, "    {}{}", BLOCKER, blocking)?;
        }
        Ok(())
    }
}

struct TransitionReport<'a>(&'a TransitionOutcome);

impl fmt::Display for TransitionReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        match outcome {
            TransitionOutcome::Advanced { from, to, gates } => {
                for gate in gates {
                    write!(f, "{}", GateReport(gate))?;
                }
                writeln!(
                    f,
                    "{}Advanced from {} to {}",
                    SPARKLE,
                    from,
                    style(to).green().bold()
                )
            }
            TransitionOutcome::Blocked { phase, .. } => {
                let phase = phase
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "completed".to_string());
                writeln!(f, "{}Transition out of {} blocked:", CROSS, phase)?;
                for blocking in outcome.blocking() {
                    writeln!(f, "    {}{}", BLOCKER, blocking)?;
                }
                Ok(())
            }
        }
    }
}

struct PlanReport<'a>(&'a PlannedSprint);

impl fmt::Display for PlanReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let planned = self.0;
        let sprint = &planned.sprint;
        writeln!(
            f,
            "{}Planned {}: {} items, {}/{} points",
            CHECK,
            style(&sprint.id).bold(),
            sprint.assignments.len(),
            sprint.committed(),
            sprint.capacity
        )?;
        for assignment in &sprint.assignments {
            writeln!(
                f,
                "  {:<10} {:>3} pts -> {}",
                assignment.item, assignment.estimate, assignment.worker
            )?;
        }
        if !planned.skipped.is_empty() {
            let skipped: Vec<String> = planned.skipped.iter().map(|i| i.to_string()).collect();
            writeln!(f, "  skipped: {}", skipped.join(", "))?;
        }
        for warning in &planned.warnings {
            writeln!(f, "  {}", style(warning).yellow())?;
        }
        Ok(())
    }
}

struct BurndownTable<'a>(&'a BurndownReport);

impl fmt::Display for BurndownTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "Burndown for {} ({} points)", report.sprint, report.committed)?;
        writeln!(f, "{:<12} {:>7} {:>7}", "Day", "Ideal", "Actual")?;
        for (i, ideal) in report.ideal.iter().enumerate() {
            let day = ideal.at.date_naive();
            let actual = report
                .actual
                .iter()
                .rev()
                .find(|p| p.at.date_naive() <= day)
                .map(|p| p.remaining.to_string())
                .unwrap_or_else(|| {
                    if i == 0 {
                        report.committed.to_string()
                    } else {
                        "-".into()
                    }
                });
            writeln!(f, "{:<12} {:>7} {:>7}", day, ideal.remaining, actual)?;
        }
        Ok(())
    }
}

/// The full status report printed by `waypoint status`.
pub fn render_status(status: &StatusSnapshot) -> String {
    StatusReport(status).to_string()
}

pub fn render_gate_result(result: &GateResult) -> String {
    GateReport(result).to_string()
}

pub fn render_gate_run(run: &GateRun) -> String {
    match run {
        GateRun::Evaluated(result) => render_gate_result(result),
        GateRun::Abandoned {
            gate,
            started_revision,
            current_revision,
        } => format!(
            "{}{} evaluation abandoned: revision {} replaced by {}\n",
            GATE, gate, started_revision, current_revision
        ),
    }
}

pub fn render_transition(outcome: &TransitionOutcome) -> String {
    TransitionReport(outcome).to_string()
}

pub fn render_planned_sprint(planned: &PlannedSprint) -> String {
    PlanReport(planned).to_string()
}

pub fn render_burndown(report: &BurndownReport) -> String {
    BurndownTable(report).to_string()
}
