//! Quality gates.
//!
//! A gate guards the exit of its phase. It passes when every automated check
//! holds, every manual review has been completed and every required approval
//! has been granted. Each evaluation appends a [`GateResult`] to a bounded run
//! history.
//!
//! - `GateBook`: gate definitions, statuses, completed reviews and run history
//! - `GateEvaluator`: runs the checks concurrently against a state snapshot
//!
//! ## Example
//!
//! ```toml
//! [[phases.gates]]
//! id = "architecture-exit"
//! name = "Architecture sign-off"
//! reviews = ["security-review"]
//!
//! [[phases.gates.checks]]
//! id = "adr-written"
//! predicate = "fact"
//!
//! [[phases.gates.approvals]]
//! type = "architecture"
//! stakeholder = "cto"
//! ```

mod evaluator;

pub use evaluator::GateEvaluator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use waypoint_common::{GateId, PhaseKind, StakeholderId};

use crate::errors::ValidationError;
use crate::predicates::Criterion;

/// An approval a gate needs before it can pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredApproval {
    #[serde(rename = "type")]
    pub approval_type: String,
    pub stakeholder: StakeholderId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub id: GateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub checks: Vec<Criterion>,
    /// Manual reviews, by name
    #[serde(default)]
    pub reviews: Vec<String>,
    #[serde(default)]
    pub approvals: Vec<RequiredApproval>,
}

impl GateDefinition {
    pub fn new(id: impl Into<GateId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            checks: Vec::new(),
            reviews: Vec::new(),
            approvals: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: Criterion) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_review(mut self, review: impl Into<String>) -> Self {
        self.reviews.push(review.into());
        self
    }

    pub fn with_approval(
        mut self,
        approval_type: impl Into<String>,
        stakeholder: impl Into<StakeholderId>,
    ) -> Self {
        self.approvals.push(RequiredApproval {
            approval_type: approval_type.into(),
            stakeholder: stakeholder.into(),
        });
        self
    }

    /// Structural problems: an empty gate or duplicate check/review names.
    pub fn problems(&self) -> Option<String> {
        if self.checks.is_empty() && self.reviews.is_empty() && self.approvals.is_empty() {
            return Some("gate has no checks, reviews or approvals".into());
        }
        let mut seen = HashSet::new();
        for check in &self.checks {
            if !seen.insert(check.id.as_str()) {
                return Some(format!("duplicate check '{}'", check.id));
            }
        }
        let mut seen = HashSet::new();
        for review in &self.reviews {
            if !seen.insert(review.as_str()) {
                return Some(format!("duplicate review '{}'", review));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    #[default]
    NotRun,
    Running,
    Passed,
    Failed,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStatus::NotRun => write!(f, "not_run"),
            GateStatus::Running => write!(f, "running"),
            GateStatus::Passed => write!(f, "passed"),
            GateStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedReview {
    pub review: String,
    pub by: StakeholderId,
    pub at: DateTime<Utc>,
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateId,
    pub phase: PhaseKind,
    pub passed: bool,
    pub failed_automated: Vec<String>,
    pub pending_manual: Vec<String>,
    pub pending_approvals: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
    pub revision: u64,
}

impl GateResult {
    /// Blocking criteria in reporting order: failed checks, pending reviews,
    /// then pending approvals.
    pub fn blocking(&self) -> Vec<String> {
        let checks = self
            .failed_automated
            .iter()
            .map(|c| format!("{}: check '{}' failed", self.gate, c));
        let reviews = self
            .pending_manual
            .iter()
            .map(|r| format!("{}: review '{}' not completed", self.gate, r));
        let approvals = self
            .pending_approvals
            .iter()
            .map(|a| format!("{}: {}", self.gate, a));
        checks.chain(reviews).chain(approvals).collect()
    }

    /// Equal apart from the evaluation time.
    pub fn same_outcome(&self, other: &GateResult) -> bool {
        self.gate == other.gate
            && self.passed == other.passed
            && self.failed_automated == other.failed_automated
            && self.pending_manual == other.pending_manual
            && self.pending_approvals == other.pending_approvals
            && self.revision == other.revision
    }
}

/// A gate evaluation either completes or is abandoned because the gate was
/// reconfigured while its checks were running.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRun {
    Evaluated(GateResult),
    Abandoned {
        gate: GateId,
        started_revision: u64,
        current_revision: u64,
    },
}

impl GateRun {
    pub fn passed(&self) -> bool {
        matches!(self, GateRun::Evaluated(result) if result.passed)
    }

    pub fn blocking(&self) -> Vec<String> {
        match self {
            GateRun::Evaluated(result) => result.blocking(),
            GateRun::Abandoned { gate, .. } => {
                vec![format!("{}: reconfigured during evaluation", gate)]
            }
        }
    }
}

/// Mutable per-gate state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub status: GateStatus,
    pub revision: u64,
    #[serde(default)]
    pub history: VecDeque<GateResult>,
    #[serde(default)]
    pub reviews: Vec<CompletedReview>,
    /// Set by [`GateBook::reconfigure`]; replaces the configured definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<GateDefinition>,
}

/// What an evaluation needs to know about a gate when it starts.
#[derive(Debug, Clone)]
pub struct GateTicket {
    pub definition: GateDefinition,
    pub phase: PhaseKind,
    pub revision: u64,
}

/// Gate definitions with their runtime state.
#[derive(Debug, Clone)]
pub struct GateBook {
    definitions: Vec<(PhaseKind, GateDefinition)>,
    states: BTreeMap<GateId, GateState>,
    history_limit: usize,
}

impl GateBook {
    pub fn new(definitions: Vec<(PhaseKind, GateDefinition)>, history_limit: usize) -> Self {
        let states = definitions
            .iter()
            .map(|(_, d)| (d.id.clone(), GateState::default()))
            .collect();
        Self {
            definitions,
            states,
            history_limit: history_limit.max(1),
        }
    }

    /// Restore persisted state for gates that are still configured, including
    /// definitions replaced at runtime.
    pub fn with_states(mut self, states: BTreeMap<GateId, GateState>) -> Self {
        for (id, state) in states {
            let Some(slot) = self.states.get_mut(&id) else {
                continue;
            };
            if let Some(definition) = &state.definition
                && let Some(entry) = self.definitions.iter_mut().find(|(_, d)| d.id == id)
            {
                entry.1 = definition.clone();
            }
            *slot = state;
        }
        self
    }

    pub fn states(&self) -> &BTreeMap<GateId, GateState> {
        &self.states
    }

    pub fn state(&self, gate: &GateId) -> Option<&GateState> {
        self.states.get(gate)
    }

    pub fn definition(&self, gate: &GateId) -> Option<(PhaseKind, &GateDefinition)> {
        self.definitions
            .iter()
            .find(|(_, d)| &d.id == gate)
            .map(|(phase, d)| (*phase, d))
    }

    /// Gate ids of a phase in configuration order.
    pub fn gates_for(&self, phase: PhaseKind) -> Vec<GateId> {
        self.definitions
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, d)| d.id.clone())
            .collect()
    }

    pub fn complete_review(
        &mut self,
        gate: &GateId,
        review: &str,
        by: StakeholderId,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let (_, definition) = self
            .definition(gate)
            .ok_or_else(|| ValidationError::UnknownGate(gate.clone()))?;
        if !definition.reviews.iter().any(|r| r == review) {
            return Err(ValidationError::UnknownReview {
                gate: gate.clone(),
                review: review.to_string(),
            });
        }
        let state = self.states.entry(gate.clone()).or_default();
        state.reviews.retain(|r| r.review != review);
        state.reviews.push(CompletedReview {
            review: review.to_string(),
            by,
            at: now,
        });
        Ok(())
    }

    /// Replace a gate's definition, bumping its revision. Runs in flight are abandoned.
    pub fn reconfigure(&mut self, definition: GateDefinition) -> Result<u64, ValidationError> {
        let gate = definition.id.clone();
        if let Some(reason) = definition.problems() {
            return Err(ValidationError::InvalidGateDefinition { gate, reason });
        }
        let slot = self
            .definitions
            .iter_mut()
            .find(|(_, d)| d.id == gate)
            .ok_or_else(|| ValidationError::UnknownGate(gate.clone()))?;
        slot.1 = definition.clone();
        let state = self.states.entry(gate).or_default();
        state.definition = Some(definition);
        state.revision += 1;
        state.status = GateStatus::NotRun;
        Ok(state.revision)
    }

    /// Mark a gate running and hand out what the evaluation needs.
    pub fn begin(&mut self, gate: &GateId) -> Result<GateTicket, ValidationError> {
        let (phase, definition) = self
            .definition(gate)
            .map(|(p, d)| (p, d.clone()))
            .ok_or_else(|| ValidationError::UnknownGate(gate.clone()))?;
        let state = self.states.entry(gate.clone()).or_default();
        state.status = GateStatus::Running;
        Ok(GateTicket {
            definition,
            phase,
            revision: state.revision,
        })
    }

    /// Finish an evaluation. Returns `Abandoned` without recording anything
    /// when the revision moved since [`Self::begin`].
    pub fn finish(
        &mut self,
        ticket: &GateTicket,
        failed_automated: Vec<String>,
        pending_approvals: Vec<String>,
        now: DateTime<Utc>,
    ) -> GateRun {
        let gate = ticket.definition.id.clone();
        let limit = self.history_limit;
        let state = self.states.entry(gate.clone()).or_default();
        if state.revision != ticket.revision {
            return GateRun::Abandoned {
                gate,
                started_revision: ticket.revision,
                current_revision: state.revision,
            };
        }

        let pending_manual: Vec<String> = ticket
            .definition
            .reviews
            .iter()
            .filter(|r| !state.reviews.iter().any(|done| &done.review == *r))
            .cloned()
            .collect();
        let passed = failed_automated.is_empty()
            && pending_manual.is_empty()
            && pending_approvals.is_empty();
        let result = GateResult {
            gate,
            phase: ticket.phase,
            passed,
            failed_automated,
            pending_manual,
            pending_approvals,
            evaluated_at: now,
            revision: ticket.revision,
        };
        state.status = if passed {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        state.history.push_back(result.clone());
        while state.history.len() > limit {
            state.history.pop_front();
        }
        GateRun::Evaluated(result)
    }

    /// Forget statuses and completed reviews of a phase's gates. History is kept.
    pub fn reset_phase(&mut self, phase: PhaseKind) {
        for gate in self.gates_for(phase) {
            if let Some(state) = self.states.get_mut(&gate) {
                state.status = GateStatus::NotRun;
                state.reviews.clear();
            }
        }
    }

    pub fn history(&self, gate: &GateId) -> Result<Vec<GateResult>, ValidationError> {
        self.states
            .get(gate)
            .map(|s| s.history.iter().cloned().collect())
            .ok_or_else(|| ValidationError::UnknownGate(gate.clone()))
    }

    /// Every recorded run across all gates.
    pub fn all_results(&self) -> Vec<GateResult> {
        self.states
            .values()
            .flat_map(|s| s.history.iter().cloned())
            .collect()
    }
}
