//! The orchestrator: composes the backlog, workers, planner, gates,
//! milestones, metrics and approvals behind one host-facing API.
//!
//! ```no_run
//! # async fn demo() -> Result<(), waypoint::errors::OrchestratorError> {
//! use waypoint::orchestrator::{Orchestrator, TransitionOutcome};
//! use waypoint::waypoint_config::WaypointToml;
//!
//! let config = WaypointToml::parse(WaypointToml::template())?;
//! let orchestrator = Orchestrator::start_project(config).await?;
//! orchestrator.plan_next_sprint().await?;
//! let outcome = orchestrator.request_phase_transition().await?;
//! if let TransitionOutcome::Blocked { reason, .. } = outcome {
//!     println!("not yet: {}", reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Every mutating operation persists the full state through the configured
//! [`StateStore`] once it succeeds. Rejected requests change nothing.

mod engine;
pub mod events;
mod governance;
pub mod state;
pub mod status;
mod work;

pub use engine::{Orchestrator, OrchestratorBuilder};
pub use events::{EventBus, EventRecord, OrchestratorEvent};
pub use state::{JsonFileStore, MemoryStore, PersistedState, STATE_VERSION, StateStore};
pub use status::{BacklogSummary, PendingApproval, StatusSnapshot, WorkflowProgress};

use serde::Serialize;
use waypoint_common::{ItemId, PhaseKind};

use crate::approvals::Approval;
use crate::backlog::BacklogItem;
use crate::errors::NotReady;
use crate::gates::GateResult;
use crate::metrics::Alert;
use crate::milestones::ProgressSnapshot;
use crate::phase::ProjectStage;

/// Result of an operation that may legitimately be refused for now.
pub type Outcome<T> = Result<T, NotReady>;

/// Result of [`Orchestrator::request_phase_transition`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Advanced {
        from: PhaseKind,
        to: ProjectStage,
        gates: Vec<GateResult>,
    },
    Blocked {
        /// `None` once the project is completed
        phase: Option<PhaseKind>,
        reason: NotReady,
    },
}

impl TransitionOutcome {
    pub fn is_advanced(&self) -> bool {
        matches!(self, TransitionOutcome::Advanced { .. })
    }

    /// Blocking criteria in reporting order; empty when the phase advanced.
    pub fn blocking(&self) -> Vec<String> {
        match self {
            TransitionOutcome::Advanced { .. } => Vec::new(),
            TransitionOutcome::Blocked {
                reason: NotReady::GateBlocked { blocking },
                ..
            } => blocking.clone(),
            TransitionOutcome::Blocked { reason, .. } => vec![reason.to_string()],
        }
    }
}

/// What completing an item set in motion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemCompletion {
    pub item: BacklogItem,
    pub milestones: Vec<ProgressSnapshot>,
    pub triggered_alerts: Vec<Alert>,
}

/// A recorded decision and the corrective item it produced, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionOutcome {
    pub approval: Approval,
    pub corrective_item: Option<ItemId>,
}
