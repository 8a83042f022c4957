//! Phase definitions and the swappable phase context.
//!
//! This module provides:
//! - `PhaseDefinition`, the per-phase section of `waypoint.toml`
//! - `PhaseContext`, the immutable view of where the project currently is
//! - `PhasePointer`, the shared `Arc<PhaseContext>` that transitions swap in one write
//!
//! A transition builds the complete next context off to the side and then
//! replaces the pointer, so readers only ever observe the old or the new phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use waypoint_common::{GateId, MilestoneId, PhaseKind, WorkflowId};

use crate::gates::GateDefinition;
use crate::milestones::MilestoneDefinition;

/// A named stream of work within a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Configuration of a single phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub kind: PhaseKind,
    /// Display name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sprint length override for this phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_days: Option<u32>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
    #[serde(default)]
    pub milestones: Vec<MilestoneDefinition>,
    #[serde(default)]
    pub gates: Vec<GateDefinition>,
}

impl PhaseDefinition {
    /// A phase with no workflows, milestones or gates.
    pub fn empty(kind: PhaseKind) -> Self {
        Self {
            kind,
            name: None,
            sprint_days: None,
            workflows: Vec::new(),
            milestones: Vec::new(),
            gates: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.label())
    }

    pub fn has_workflow(&self, id: &WorkflowId) -> bool {
        self.workflows.iter().any(|w| &w.id == id)
    }
}

/// Where the project is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "phase", rename_all = "snake_case")]
pub enum ProjectStage {
    Active(PhaseKind),
    /// Past the final phase
    Completed,
}

impl ProjectStage {
    pub fn phase(self) -> Option<PhaseKind> {
        match self {
            ProjectStage::Active(kind) => Some(kind),
            ProjectStage::Completed => None,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, ProjectStage::Completed)
    }
}

impl fmt::Display for ProjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectStage::Active(kind) => write!(f, "{}", kind),
            ProjectStage::Completed => write!(f, "completed"),
        }
    }
}

/// A phase the project has already left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: PhaseKind,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
}

/// Immutable snapshot of the current phase and everything scoped to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    pub stage: ProjectStage,
    pub entered_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<PhaseRecord>,
    #[serde(default)]
    pub workflows: Vec<WorkflowId>,
    #[serde(default)]
    pub milestones: Vec<MilestoneId>,
    #[serde(default)]
    pub gates: Vec<GateId>,
    pub sprint_days: u32,
}

impl PhaseContext {
    /// Context for entering `definition`'s phase at `now`.
    pub fn enter(
        definition: &PhaseDefinition,
        default_sprint_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            stage: ProjectStage::Active(definition.kind),
            entered_at: now,
            history: Vec::new(),
            workflows: definition.workflows.iter().map(|w| w.id.clone()).collect(),
            milestones: definition.milestones.iter().map(|m| m.id.clone()).collect(),
            gates: definition.gates.iter().map(|g| g.id.clone()).collect(),
            sprint_days: definition.sprint_days.unwrap_or(default_sprint_days),
        }
    }

    pub fn phase(&self) -> Option<PhaseKind> {
        self.stage.phase()
    }

    /// Build the context that follows this one. `next` is `None` when leaving
    /// the final phase.
    pub fn advance(
        &self,
        next: Option<&PhaseDefinition>,
        default_sprint_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut history = self.history.clone();
        if let Some(phase) = self.phase() {
            history.push(PhaseRecord {
                phase,
                entered_at: self.entered_at,
                exited_at: now,
            });
        }
        match next {
            Some(definition) => Self {
                history,
                ..Self::enter(definition, default_sprint_days, now)
            },
            None => Self {
                stage: ProjectStage::Completed,
                entered_at: now,
                history,
                workflows: Vec::new(),
                milestones: Vec::new(),
                gates: Vec::new(),
                sprint_days: self.sprint_days,
            },
        }
    }

    /// Build the context for re-entering `previous`, dropping it from history.
    pub fn rollback(
        &self,
        previous: &PhaseDefinition,
        default_sprint_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut history = self.history.clone();
        if let Some(pos) = history.iter().rposition(|r| r.phase == previous.kind) {
            history.truncate(pos);
        }
        Self {
            history,
            ..Self::enter(previous, default_sprint_days, now)
        }
    }
}

/// Shared, atomically swappable pointer to the current phase context.
#[derive(Debug)]
pub struct PhasePointer {
    inner: RwLock<Arc<PhaseContext>>,
}

impl PhasePointer {
    pub fn new(context: PhaseContext) -> Self {
        Self {
            inner: RwLock::new(Arc::new(context)),
        }
    }

    /// Clone of the current context pointer.
    pub fn current(&self) -> Arc<PhaseContext> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the context in a single write, returning the previous one.
    pub fn swap(&self, context: PhaseContext) -> Arc<PhaseContext> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(context))
    }
}
