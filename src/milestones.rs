//! Milestone tracking.
//!
//! A milestone is a set of weighted criteria (weights sum to 100). Tracking
//! evaluates every criterion not yet met through the predicate registry and
//! latches the ones that hold, so completion never decreases unless the
//! milestone is explicitly rolled back.
//!
//! Blockers are informational: a milestone is reported as blocked while a
//! milestone it depends on is incomplete, or while a criterion has stayed unmet
//! past the configured SLA window.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};
use waypoint_common::{MilestoneId, PhaseKind};

use crate::errors::ValidationError;
use crate::predicates::{Criterion, PredicateRegistry};
use crate::snapshot::{MilestoneView, StateSnapshot};

/// Milestone section of a phase in `waypoint.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDefinition {
    pub id: MilestoneId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<NaiveDate>,
    /// Milestones (in any phase) that must complete first
    #[serde(default)]
    pub depends_on: Vec<MilestoneId>,
    pub criteria: Vec<Criterion>,
}

impl MilestoneDefinition {
    pub fn total_weight(&self) -> u32 {
        self.criteria.iter().map(|c| c.weight).sum()
    }

    /// The first criterion id that appears more than once.
    pub fn duplicate_criterion(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.criteria
            .iter()
            .map(|c| c.id.as_str())
            .find(|id| !seen.insert(*id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MilestoneStatus::Pending => write!(f, "pending"),
            MilestoneStatus::InProgress => write!(f, "in_progress"),
            MilestoneStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionProgress {
    pub id: String,
    #[serde(default)]
    pub met_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneState {
    pub id: MilestoneId,
    pub phase: PhaseKind,
    pub status: MilestoneStatus,
    pub completion: u32,
    pub criteria: Vec<CriterionProgress>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MilestoneState {
    fn fresh(phase: PhaseKind, definition: &MilestoneDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            phase,
            status: MilestoneStatus::Pending,
            completion: 0,
            criteria: definition
                .criteria
                .iter()
                .map(|c| CriterionProgress {
                    id: c.id.clone(),
                    met_at: None,
                })
                .collect(),
            completed_at: None,
        }
    }

    fn is_met(&self, criterion: &str) -> bool {
        self.criteria
            .iter()
            .any(|c| c.id == criterion && c.met_at.is_some())
    }
}

/// Why a milestone is not progressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MilestoneBlocker {
    MilestoneDependency { milestone: MilestoneId, completion: u32 },
    SlaExceeded { criterion: String, unmet_hours: i64 },
}

impl fmt::Display for MilestoneBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MilestoneBlocker::MilestoneDependency {
                milestone,
                completion,
            } => write!(f, "waiting on milestone {} ({}%)", milestone, completion),
            MilestoneBlocker::SlaExceeded {
                criterion,
                unmet_hours,
            } => write!(f, "criterion '{}' unmet for {}h", criterion, unmet_hours),
        }
    }
}

/// Immutable result of one tracking pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub milestone: MilestoneId,
    pub phase: PhaseKind,
    pub status: MilestoneStatus,
    pub completion: u32,
    pub met: Vec<String>,
    pub unmet: Vec<String>,
    pub blockers: Vec<MilestoneBlocker>,
    pub taken_at: DateTime<Utc>,
}

/// Persisted milestone state plus the append-only progress history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneBook {
    #[serde(default)]
    states: BTreeMap<MilestoneId, MilestoneState>,
    #[serde(default)]
    history: Vec<ProgressSnapshot>,
}

impl MilestoneBook {
    pub fn state(&self, id: &MilestoneId) -> Option<&MilestoneState> {
        self.states.get(id)
    }

    pub fn history(&self) -> &[ProgressSnapshot] {
        &self.history
    }
}

/// About a century; keeps the window representable.
const MAX_SLA_HOURS: u64 = 876_000;

pub struct MilestoneTracker {
    definitions: Vec<(PhaseKind, MilestoneDefinition)>,
    sla: Duration,
    book: MilestoneBook,
}

impl MilestoneTracker {
    pub fn new(definitions: Vec<(PhaseKind, MilestoneDefinition)>, sla_hours: u64) -> Self {
        let mut tracker = Self {
            definitions,
            sla: Duration::hours(sla_hours.min(MAX_SLA_HOURS) as i64),
            book: MilestoneBook::default(),
        };
        tracker.ensure_states();
        tracker
    }

    /// Restore persisted state. Milestones new to the configuration start pending.
    pub fn with_book(mut self, book: MilestoneBook) -> Self {
        self.book = book;
        self.ensure_states();
        self
    }

    fn ensure_states(&mut self) {
        for (phase, definition) in &self.definitions {
            self.book
                .states
                .entry(definition.id.clone())
                .or_insert_with(|| MilestoneState::fresh(*phase, definition));
        }
    }

    pub fn book(&self) -> &MilestoneBook {
        &self.book
    }

    pub fn ids_for(&self, phase: PhaseKind) -> Vec<MilestoneId> {
        self.definitions
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, d)| d.id.clone())
            .collect()
    }

    pub fn views(&self) -> Vec<MilestoneView> {
        self.definitions
            .iter()
            .filter_map(|(phase, definition)| {
                let state = self.book.states.get(&definition.id)?;
                Some(MilestoneView {
                    id: definition.id.clone(),
                    name: definition.name.clone(),
                    phase: *phase,
                    status: state.status,
                    completion: state.completion,
                    target_date: definition.target_date,
                    completed_at: state.completed_at,
                })
            })
            .collect()
    }

    /// Evaluate unmet criteria, latch the ones that hold and record a snapshot.
    ///
    /// `tracking_since` is when the milestone's phase was entered; criteria
    /// unmet for longer than the SLA window are reported as blockers.
    pub async fn track(
        &mut self,
        id: &MilestoneId,
        snapshot: &StateSnapshot,
        predicates: &PredicateRegistry,
        tracking_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ProgressSnapshot, ValidationError> {
        let (phase, definition) = self
            .definitions
            .iter()
            .find(|(_, d)| &d.id == id)
            .ok_or_else(|| ValidationError::UnknownMilestone(id.clone()))?;
        let state = self
            .book
            .states
            .get(id)
            .ok_or_else(|| ValidationError::UnknownMilestone(id.clone()))?;

        let pending: Vec<&Criterion> = definition
            .criteria
            .iter()
            .filter(|c| !state.is_met(&c.id))
            .collect();
        let outcomes = join_all(pending.iter().map(|criterion| async move {
            let held = match predicates.evaluate(criterion, snapshot).await {
                Ok(held) => held,
                Err(e) => {
                    warn!(
                        milestone = %id,
                        criterion = %criterion.id,
                        "Criterion evaluation failed: {:#}",
                        e
                    );
                    false
                }
            };
            (criterion.id.clone(), held)
        }))
        .await;

        let blockers = self.blockers_for(definition, &outcomes, tracking_since, now);
        let phase = *phase;
        let weights: BTreeMap<&str, u32> = definition
            .criteria
            .iter()
            .map(|c| (c.id.as_str(), c.weight))
            .collect();

        let state = self
            .book
            .states
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownMilestone(id.clone()))?;
        for (criterion, held) in &outcomes {
            if *held
                && let Some(progress) = state.criteria.iter_mut().find(|c| &c.id == criterion)
            {
                progress.met_at = Some(now);
            }
        }

        let completion: u32 = state
            .criteria
            .iter()
            .filter(|c| c.met_at.is_some())
            .map(|c| weights.get(c.id.as_str()).copied().unwrap_or(0))
            .sum::<u32>()
            .min(100);
        state.completion = state.completion.max(completion);
        state.status = match state.completion {
            100 => MilestoneStatus::Completed,
            0 => MilestoneStatus::Pending,
            _ => MilestoneStatus::InProgress,
        };
        if state.status == MilestoneStatus::Completed && state.completed_at.is_none() {
            state.completed_at = Some(now);
        }

        let (met, unmet): (Vec<&CriterionProgress>, Vec<&CriterionProgress>) =
            state.criteria.iter().partition(|c| c.met_at.is_some());
        let progress = ProgressSnapshot {
            milestone: id.clone(),
            phase,
            status: state.status,
            completion: state.completion,
            met: met.into_iter().map(|c| c.id.clone()).collect(),
            unmet: unmet.into_iter().map(|c| c.id.clone()).collect(),
            blockers,
            taken_at: now,
        };
        debug!(milestone = %id, completion = progress.completion, "Milestone tracked");
        self.book.history.push(progress.clone());
        Ok(progress)
    }

    fn blockers_for(
        &self,
        definition: &MilestoneDefinition,
        outcomes: &[(String, bool)],
        tracking_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<MilestoneBlocker> {
        let mut blockers: Vec<MilestoneBlocker> = definition
            .depends_on
            .iter()
            .filter_map(|dep| {
                let state = self.book.states.get(dep)?;
                (state.status != MilestoneStatus::Completed).then(|| {
                    MilestoneBlocker::MilestoneDependency {
                        milestone: dep.clone(),
                        completion: state.completion,
                    }
                })
            })
            .collect();

        let elapsed = now - tracking_since;
        if elapsed > self.sla {
            blockers.extend(outcomes.iter().filter(|(_, held)| !held).map(|(criterion, _)| {
                MilestoneBlocker::SlaExceeded {
                    criterion: criterion.clone(),
                    unmet_hours: elapsed.num_hours(),
                }
            }));
        }
        blockers
    }

    /// Clear every latched criterion of a milestone.
    pub fn rollback(&mut self, id: &MilestoneId) -> Result<(), ValidationError> {
        let (phase, definition) = self
            .definitions
            .iter()
            .find(|(_, d)| &d.id == id)
            .ok_or_else(|| ValidationError::UnknownMilestone(id.clone()))?;
        self.book
            .states
            .insert(id.clone(), MilestoneState::fresh(*phase, definition));
        Ok(())
    }

    /// Roll back every milestone of a phase.
    pub fn reset_phase(&mut self, phase: PhaseKind) {
        for (kind, definition) in self.definitions.iter().filter(|(k, _)| *k == phase) {
            self.book
                .states
                .insert(definition.id.clone(), MilestoneState::fresh(*kind, definition));
        }
    }

    pub fn history(&self, id: &MilestoneId) -> Vec<&ProgressSnapshot> {
        self.book
            .history
            .iter()
            .filter(|p| &p.milestone == id)
            .collect()
    }
}
