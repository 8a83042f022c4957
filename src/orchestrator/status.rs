//! Read-only status projection for hosts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_common::{ApprovalId, PhaseKind, WorkflowId};

use crate::approvals::ApprovalSubject;
use crate::backlog::{ItemStatus, PointTally};
use crate::metrics::{Alert, KpiReading};
use crate::phase::{PhaseRecord, ProjectStage};
use crate::planner::Sprint;
use crate::snapshot::MilestoneView;
use crate::workers::Worker;

/// Completion of one workflow of the current phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub id: WorkflowId,
    pub name: String,
    pub points: PointTally,
    pub percent: f64,
}

/// Item counts of the current phase by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogSummary {
    pub backlog: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub done: usize,
    pub points: PointTally,
}

impl BacklogSummary {
    pub fn count(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Backlog => self.backlog += 1,
            ItemStatus::Assigned => self.assigned += 1,
            ItemStatus::InProgress => self.in_progress += 1,
            ItemStatus::Blocked => self.blocked += 1,
            ItemStatus::Done => self.done += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: ApprovalId,
    pub subject: ApprovalSubject,
    pub approval_type: String,
    pub requested_from: String,
}

/// Safe to poll; taking one changes nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub project: String,
    pub stage: ProjectStage,
    pub phase_entered_at: DateTime<Utc>,
    pub phase_history: Vec<PhaseRecord>,
    pub next_phase: Option<PhaseKind>,
    pub workflows: Vec<WorkflowProgress>,
    pub backlog: BacklogSummary,
    /// Planned or active sprint of the current phase
    pub sprint: Option<Sprint>,
    pub workers: Vec<Worker>,
    pub milestones: Vec<MilestoneView>,
    pub kpis: Vec<KpiReading>,
    /// Newest first
    pub recent_alerts: Vec<Alert>,
    pub pending_approvals: Vec<PendingApproval>,
}
