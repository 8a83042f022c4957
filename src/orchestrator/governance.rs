//! Gates, approvals, milestones and KPIs.

use chrono::Utc;
use tracing::{info, warn};
use waypoint_common::{AlertId, ApprovalId, Decision, GateId, MilestoneId, Priority, StakeholderId};

use super::engine::Orchestrator;
use super::events::OrchestratorEvent;
use super::DecisionOutcome;
use crate::approvals::{ApprovalSubject, Notification, NotificationKind};
use crate::backlog::NewItem;
use crate::errors::{OrchestratorError, ValidationError};
use crate::gates::{GateDefinition, GateResult, GateRun};
use crate::metrics::{Alert, RecomputeReport};
use crate::milestones::{MilestoneStatus, ProgressSnapshot};
use crate::phase::ProjectStage;
use waypoint_common::PhaseKind;

impl Orchestrator {
    /// Record that a gate's manual review has been done.
    pub async fn complete_review(
        &self,
        gate: &GateId,
        review: &str,
        by: &StakeholderId,
    ) -> Result<(), OrchestratorError> {
        self.stakeholder(by)?;
        self.gates
            .lock()
            .await
            .complete_review(gate, review, by.clone(), Utc::now())?;
        info!(gate = %gate, review, by = %by, "Review completed");
        self.persist().await
    }

    /// Evaluate one gate against the current state and record the run.
    pub async fn evaluate_gate(&self, gate: &GateId) -> Result<GateRun, OrchestratorError> {
        let snapshot = self.capture_snapshot().await;
        let run = self.evaluator.evaluate(gate, &snapshot).await?;
        self.emit_gate_run(&run);
        self.persist().await?;
        Ok(run)
    }

    /// Replace a gate's definition. Runs in flight for the gate are abandoned.
    pub async fn reconfigure_gate(
        &self,
        definition: GateDefinition,
    ) -> Result<u64, OrchestratorError> {
        let invalid = |reason: String| ValidationError::InvalidGateDefinition {
            gate: definition.id.clone(),
            reason,
        };
        if let Some(check) = definition
            .checks
            .iter()
            .find(|c| !self.predicates.contains(&c.predicate))
        {
            return Err(invalid(format!(
                "check '{}' uses unknown predicate '{}'",
                check.id, check.predicate
            ))
            .into());
        }
        if let Some(required) = definition
            .approvals
            .iter()
            .find(|a| self.stakeholder(&a.stakeholder).is_err())
        {
            return Err(invalid(format!("unknown stakeholder '{}'", required.stakeholder)).into());
        }
        let gate = definition.id.clone();
        let revision = self.gates.lock().await.reconfigure(definition)?;
        info!(gate = %gate, revision, "Gate reconfigured");
        self.persist().await?;
        Ok(revision)
    }

    /// Request every required approval of a gate that is neither pending nor granted.
    pub async fn request_gate_approvals(
        &self,
        gate: &GateId,
    ) -> Result<Vec<ApprovalId>, OrchestratorError> {
        let definition = {
            let gates = self.gates.lock().await;
            let (_, definition) = gates
                .definition(gate)
                .ok_or_else(|| ValidationError::UnknownGate(gate.clone()))?;
            definition.clone()
        };
        let missing: Vec<_> = {
            let approvals = self.approvals.lock().await;
            definition
                .approvals
                .iter()
                .filter(|required| {
                    let latest = approvals
                        .all()
                        .iter()
                        .filter(|a| {
                            matches!(&a.subject, ApprovalSubject::Gate(g) if g == gate)
                                && a.approval_type == required.approval_type
                        })
                        .max_by_key(|a| a.sequence);
                    !latest.is_some_and(|a| a.is_pending() || a.decision == Decision::Approved)
                })
                .cloned()
                .collect()
        };

        let mut requested = Vec::new();
        for required in missing {
            requested.push(
                self.request_approval(
                    ApprovalSubject::Gate(gate.clone()),
                    &required.approval_type,
                    &required.stakeholder,
                )
                .await?,
            );
        }
        Ok(requested)
    }

    pub async fn gate_history(&self, gate: &GateId) -> Result<Vec<GateResult>, OrchestratorError> {
        Ok(self.gates.lock().await.history(gate)?)
    }

    /// Open a pending approval and notify the stakeholder over their preferred channel.
    pub async fn request_approval(
        &self,
        subject: ApprovalSubject,
        approval_type: &str,
        stakeholder: &StakeholderId,
    ) -> Result<ApprovalId, OrchestratorError> {
        let stakeholder = self.stakeholder(stakeholder)?;
        if let ApprovalSubject::Gate(gate) = &subject
            && self.gates.lock().await.definition(gate).is_none()
        {
            return Err(ValidationError::UnknownGate(gate.clone()).into());
        }
        let id = self
            .approvals
            .lock()
            .await
            .request(subject.clone(), approval_type, stakeholder, Utc::now())
            .id
            .clone();
        info!(
            approval = %id,
            subject = %subject,
            stakeholder = %stakeholder.id,
            "Approval requested"
        );
        self.events
            .emit(OrchestratorEvent::ApprovalRequested { approval: id.clone() });
        self.persist().await?;

        let payload = Notification::new(
            NotificationKind::ApprovalRequested,
            format!("{}: approval {} requested", self.project, id),
            format!(
                "Your '{}' approval is requested for {}. Record a decision on {}.",
                approval_type, subject, id
            ),
        );
        self.notifier.notify_logged(stakeholder, &payload).await;
        Ok(id)
    }

    /// Record a stakeholder's decision.
    ///
    /// Approvals release gates or resume paused workflows. Rejections and
    /// revision requests create a high-priority corrective item in the current
    /// phase and notify everyone with authority over the approval type.
    pub async fn record_decision(
        &self,
        approval: &ApprovalId,
        decision: Decision,
        comment: Option<String>,
        by: &StakeholderId,
    ) -> Result<DecisionOutcome, OrchestratorError> {
        let by = self.stakeholder(by)?;
        let decided = self
            .approvals
            .lock()
            .await
            .decide(approval, decision, by, comment.clone(), Utc::now())?
            .clone();
        info!(approval = %approval, decision = %decision, by = %by.id, "Decision recorded");
        self.events.emit(OrchestratorEvent::DecisionRecorded {
            approval: approval.clone(),
            decision,
        });

        let corrective_item = match (decision, &decided.subject) {
            (Decision::Approved, ApprovalSubject::Gate(gate)) => {
                self.events.emit(OrchestratorEvent::ApprovalGranted {
                    approval: approval.clone(),
                    gate: gate.clone(),
                });
                None
            }
            (Decision::Approved, ApprovalSubject::Decision(id)) => {
                self.events.emit(OrchestratorEvent::WorkflowResumed {
                    approval: approval.clone(),
                    decision: id.clone(),
                });
                None
            }
            _ => {
                let phase = self.phase.current().phase().unwrap_or(PhaseKind::Development);
                let mut item = NewItem::new(
                    format!("Revise {} after {} decision", decided.subject, decision),
                    self.corrective_estimate,
                    phase,
                )
                .with_priority(Priority::High)
                .with_criterion(format!(
                    "'{}' approval for {} granted",
                    decided.approval_type, decided.subject
                ));
                if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
                    item = item.with_description(comment);
                }
                let item = self.backlog.lock().await.add(item, Utc::now())?;
                info!(item = %item, approval = %approval, "Corrective item created");
                self.events.emit(OrchestratorEvent::CorrectiveItemCreated {
                    item: item.clone(),
                    approval: approval.clone(),
                });
                Some(item)
            }
        };
        self.persist().await?;

        if let Some(item) = &corrective_item {
            let payload = Notification::new(
                NotificationKind::RevisionRequested,
                format!("{}: {} on {}", self.project, decision, decided.subject),
                format!(
                    "{} recorded '{}' on {}. Corrective item {} was added to the backlog.",
                    by.name, decision, approval, item
                ),
            );
            let holders = self
                .stakeholders
                .iter()
                .filter(|s| s.has_authority(&decided.approval_type));
            self.notifier.broadcast(holders, &payload).await;
        }
        Ok(DecisionOutcome {
            approval: decided,
            corrective_item,
        })
    }

    /// Append to an approval's comment log; returns the number of comments.
    pub async fn add_approval_comment(
        &self,
        approval: &ApprovalId,
        by: &StakeholderId,
        text: &str,
    ) -> Result<usize, OrchestratorError> {
        self.stakeholder(by)?;
        let count = self
            .approvals
            .lock()
            .await
            .comment(approval, by.clone(), text, Utc::now())?;
        self.persist().await?;
        Ok(count)
    }

    /// Track every milestone of the current phase.
    pub async fn track_milestones(&self) -> Result<Vec<ProgressSnapshot>, OrchestratorError> {
        let progress = self.track_current_milestones().await?;
        self.persist().await?;
        Ok(progress)
    }

    pub(super) async fn track_current_milestones(
        &self,
    ) -> Result<Vec<ProgressSnapshot>, OrchestratorError> {
        let context = self.phase.current();
        let ProjectStage::Active(phase) = context.stage else {
            return Ok(Vec::new());
        };
        let snapshot = self.capture_snapshot().await;
        let mut tracker = self.milestones.lock().await;
        let mut progress = Vec::new();
        for id in tracker.ids_for(phase) {
            let before = tracker.book().state(&id).map(|s| s.status);
            let snapshot = tracker
                .track(&id, &snapshot, &self.predicates, context.entered_at, Utc::now())
                .await?;
            if snapshot.status == MilestoneStatus::Completed
                && before != Some(MilestoneStatus::Completed)
            {
                info!(milestone = %id, "Milestone completed");
                self.events
                    .emit(OrchestratorEvent::MilestoneCompleted { milestone: id.clone() });
            }
            for blocker in &snapshot.blockers {
                warn!(milestone = %id, "Milestone blocked: {}", blocker);
            }
            progress.push(snapshot);
        }
        Ok(progress)
    }

    pub async fn milestone_history(
        &self,
        milestone: &MilestoneId,
    ) -> Result<Vec<ProgressSnapshot>, OrchestratorError> {
        let tracker = self.milestones.lock().await;
        if tracker.book().state(milestone).is_none() {
            return Err(ValidationError::UnknownMilestone(milestone.clone()).into());
        }
        Ok(tracker.history(milestone).into_iter().cloned().collect())
    }

    /// Recompute every KPI and raise or resolve alerts.
    pub async fn recompute_kpis(&self) -> Result<RecomputeReport, OrchestratorError> {
        let report = self.recompute().await;
        self.persist().await?;
        Ok(report)
    }

    pub(super) async fn recompute(&self) -> RecomputeReport {
        let snapshot = self.capture_snapshot().await;
        let report = self.metrics.lock().await.recompute(&snapshot, Utc::now()).await;
        for id in &report.resolved {
            self.events
                .emit(OrchestratorEvent::AlertResolved { alert: id.clone() });
        }
        for alert in &report.triggered {
            self.events.emit(OrchestratorEvent::AlertTriggered {
                alert: alert.id.clone(),
                kpi: alert.kpi.clone(),
                band: alert.to,
            });
            self.notify_alert(alert).await;
        }
        report
    }

    async fn notify_alert(&self, alert: &Alert) {
        let payload = Notification::new(
            NotificationKind::AlertTriggered,
            format!("{}: KPI {} is {}", self.project, alert.kpi, alert.to),
            format!(
                "KPI {} moved from {} to {} at {:.1} ({} alert {}).",
                alert.kpi, alert.from, alert.to, alert.value, alert.severity, alert.id
            ),
        );
        let recipients = self
            .stakeholders
            .iter()
            .filter(|s| alert.recipients.contains(&s.id));
        self.notifier.broadcast(recipients, &payload).await;
    }

    pub async fn acknowledge_alert(
        &self,
        alert: &AlertId,
        by: &str,
    ) -> Result<Alert, OrchestratorError> {
        let alert = self
            .metrics
            .lock()
            .await
            .acknowledge(alert, by, Utc::now())?;
        info!(alert = %alert.id, by, "Alert acknowledged");
        self.persist().await?;
        Ok(alert)
    }
}
