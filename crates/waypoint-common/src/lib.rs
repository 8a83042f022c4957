//! Shared domain types for the waypoint orchestrator.
//!
//! These are the small value types that every subsystem passes around:
//! identifiers, the phase ordering, priorities and the KPI band vocabulary.
//! They carry no behaviour beyond ordering, parsing and display.

pub mod ids;
pub mod phase;
pub mod values;

pub use ids::{
    AlertId, ApprovalId, GateId, ItemId, KpiId, MilestoneId, SprintId, StakeholderId, WorkerId,
    WorkflowId,
};
pub use phase::{PhaseKind, PhaseParseError};
pub use values::{Band, Decision, Direction, Priority, Severity, Trend, ValueParseError};
