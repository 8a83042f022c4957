pub mod approvals;
pub mod backlog;
pub mod config;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod metrics;
pub mod milestones;
pub mod orchestrator;
pub mod phase;
pub mod planner;
pub mod predicates;
pub mod snapshot;
pub mod ui;
pub mod waypoint_config;
pub mod workers;

// Identifier and value types shared with hosts
pub use waypoint_common::{
    AlertId, ApprovalId, Band, Decision, GateId, ItemId, KpiId, MilestoneId, PhaseKind, Priority,
    SprintId, StakeholderId, WorkerId, WorkflowId,
};
