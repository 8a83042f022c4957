//! Typed error hierarchy for the waypoint orchestrator.
//!
//! - `ConfigurationError`: fatal at startup, aborts initialization
//! - `ValidationError`: a rejected request; nothing was changed
//! - `AssignmentRejected`: a worker reservation that would exceed capacity
//! - `UnauthorizedError`: a stakeholder recording a decision it may not make
//! - `DeliveryError`: a notification that could not be sent; logged, never fatal
//! - `OrchestratorError`: the union returned by the orchestrator API
//!
//! "Not ready" outcomes (gate failures, pending approvals, no capacity) are not
//! errors; they are returned as [`NotReady`] values inside operation outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use waypoint_common::{
    AlertId, ApprovalId, GateId, ItemId, KpiId, MilestoneId, PhaseKind, SprintId, StakeholderId,
    WorkerId, WorkflowId,
};

/// Invalid project configuration. Always fatal at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("KPI dependency cycle detected involving: {}", kpis.join(", "))]
    KpiCycle { kpis: Vec<String> },

    #[error("KPI '{kpi}' references unknown input KPI '{input}'")]
    UnknownKpiInput { kpi: KpiId, input: KpiId },

    #[error("KPI '{kpi}' has inconsistent thresholds: {message}")]
    InvalidThresholds { kpi: KpiId, message: String },

    #[error("KPI '{kpi}' input '{input}' has weight {weight}, expected a positive number")]
    InvalidInputWeight { kpi: KpiId, input: KpiId, weight: f64 },

    #[error("Milestone '{milestone}' criteria weights sum to {total}, expected 100")]
    MilestoneWeights { milestone: MilestoneId, total: u32 },

    #[error("Milestone '{milestone}' depends on unknown milestone '{dependency}'")]
    UnknownMilestoneDependency {
        milestone: MilestoneId,
        dependency: MilestoneId,
    },

    #[error("Milestone '{milestone}' defines criterion '{criterion}' more than once")]
    DuplicateMilestoneCriterion {
        milestone: MilestoneId,
        criterion: String,
    },

    #[error("Malformed gate '{gate}': {reason}")]
    MalformedGate { gate: GateId, reason: String },

    #[error("Duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Phase '{0}' is defined more than once")]
    DuplicatePhase(PhaseKind),

    #[error("Criterion '{criterion}' uses unknown predicate '{predicate}'")]
    UnknownPredicate { criterion: String, predicate: String },

    #[error("{owner} references unknown stakeholder '{stakeholder}'")]
    UnknownStakeholder {
        owner: String,
        stakeholder: StakeholderId,
    },

    #[error("Invalid setting '{field}': {message}")]
    InvalidSetting { field: String, message: String },
}

/// A rejected request. The orchestrator state is unchanged when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Backlog item must have at least one acceptance criterion")]
    MissingAcceptanceCriteria,

    #[error("Backlog item title must not be empty")]
    EmptyTitle,

    #[error("Unknown backlog item '{0}'")]
    UnknownItem(ItemId),

    #[error("Item '{item}' depends on unknown item '{dependency}'")]
    UnknownDependency { item: ItemId, dependency: ItemId },

    #[error("Adding dependency '{dependency}' to '{item}' would create a cycle")]
    DependencyCycle { item: ItemId, dependency: ItemId },

    #[error("Workflow '{workflow}' does not belong to phase '{phase}'")]
    UnknownWorkflow { workflow: WorkflowId, phase: PhaseKind },

    #[error("Item '{item}' has no acceptance criterion #{index}")]
    UnknownCriterion { item: ItemId, index: usize },

    #[error("Item '{item}' has no open blocker #{blocker}")]
    UnknownBlocker { item: ItemId, blocker: u32 },

    #[error("Item '{item}' cannot move from {from} to {to}")]
    InvalidStatusChange {
        item: ItemId,
        from: String,
        to: String,
    },

    #[error("Item '{0}' is archived")]
    ItemArchived(ItemId),

    #[error("Unknown worker '{0}'")]
    UnknownWorker(WorkerId),

    #[error("Unknown stakeholder '{0}'")]
    UnknownStakeholder(StakeholderId),

    #[error("Unknown approval '{0}'")]
    UnknownApproval(ApprovalId),

    #[error("Approval '{0}' has already been decided")]
    AlreadyDecided(ApprovalId),

    #[error("'pending' is not a decision")]
    PendingIsNotADecision,

    #[error("Unknown gate '{0}'")]
    UnknownGate(GateId),

    #[error("Gate '{gate}' has no manual review '{review}'")]
    UnknownReview { gate: GateId, review: String },

    #[error("Unknown milestone '{0}'")]
    UnknownMilestone(MilestoneId),

    #[error("Unknown KPI '{0}'")]
    UnknownKpi(KpiId),

    #[error("Unknown alert '{0}'")]
    UnknownAlert(AlertId),

    #[error("Unknown sprint '{0}'")]
    UnknownSprint(SprintId),

    #[error("Sprint '{sprint}' is {status}, expected {expected}")]
    SprintState {
        sprint: SprintId,
        status: String,
        expected: &'static str,
    },

    #[error("Gate '{gate}' configuration is invalid: {reason}")]
    InvalidGateDefinition { gate: GateId, reason: String },
}

/// A worker reservation that would break `workload <= capacity`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignmentRejected {
    #[error(
        "Worker '{worker}' cannot absorb {requested} points (workload {workload}/{capacity})"
    )]
    OverCapacity {
        worker: WorkerId,
        requested: u32,
        workload: u32,
        capacity: u32,
    },

    #[error("Worker '{0}' is unavailable")]
    Unavailable(WorkerId),

    #[error("Unknown worker '{0}'")]
    UnknownWorker(WorkerId),
}

/// A decision recorded by a stakeholder without authority over the approval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Stakeholder '{stakeholder}' is not authorized to decide approval '{approval}'")]
pub struct UnauthorizedError {
    pub approval: ApprovalId,
    pub stakeholder: StakeholderId,
}

/// A notification that could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery to '{stakeholder}' via {channel} timed out after {timeout_secs}s")]
    TimedOut {
        stakeholder: StakeholderId,
        channel: String,
        timeout_secs: u64,
    },

    #[error("Delivery to '{stakeholder}' via {channel} failed: {source}")]
    Failed {
        stakeholder: StakeholderId,
        channel: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors returned by the orchestrator API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Assignment(#[from] AssignmentRejected),

    #[error(transparent)]
    Unauthorized(#[from] UnauthorizedError),

    #[error("Project has already been started; resume it instead")]
    AlreadyStarted,

    #[error("No persisted project state found; start a project first")]
    NotStarted,

    #[error("State store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why an operation could not proceed yet. Returned as data, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotReady {
    /// One or more gate criteria are not satisfied
    GateBlocked { blocking: Vec<String> },
    /// Another transition attempt is in flight
    TransitionInProgress,
    /// Another planning call for the phase is in flight
    PlanningInProgress { phase: PhaseKind },
    /// A planned or active sprint already exists for the phase
    SprintInFlight { sprint: SprintId },
    /// No ready worker has capacity
    InsufficientCapacity,
    /// No sprint in the expected state
    NoSprint { expected: String },
    /// The item does not meet its completion conditions
    ItemIncomplete { item: ItemId, unmet: Vec<String> },
    /// The project has passed its final phase
    ProjectCompleted,
    /// Already at the first phase
    AtFirstPhase,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::GateBlocked { blocking } => {
                write!(f, "blocked by {} criteria: {}", blocking.len(), blocking.join("; "))
            }
            NotReady::TransitionInProgress => {
                write!(f, "a phase transition is already in progress")
            }
            NotReady::PlanningInProgress { phase } => {
                write!(f, "sprint planning for {} is already in progress", phase)
            }
            NotReady::SprintInFlight { sprint } => {
                write!(f, "sprint {} is still planned or active", sprint)
            }
            NotReady::InsufficientCapacity => write!(f, "no ready worker has capacity"),
            NotReady::NoSprint { expected } => write!(f, "no {} sprint", expected),
            NotReady::ItemIncomplete { item, unmet } => {
                write!(f, "item {} is not complete: {}", item, unmet.join("; "))
            }
            NotReady::ProjectCompleted => write!(f, "the project is already completed"),
            NotReady::AtFirstPhase => write!(f, "already at the first phase"),
        }
    }
}
