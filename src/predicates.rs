//! Pluggable criterion predicates.
//!
//! Milestone criteria and gate checks are both [`Criterion`]s that name a
//! predicate. Predicates are registered by name in a [`PredicateRegistry`] and
//! evaluated against an immutable [`StateSnapshot`].
//!
//! Built-in predicates:
//!
//! | Name | Parameters | True when |
//! |------|------------|-----------|
//! | `fact` | `name` (defaults to the criterion id) | the fact was recorded as true |
//! | `all_items_done` | `phase`, `workflow` (optional) | at least one item is in scope and all are done |
//! | `items_done_at_least` | `count`, `phase` (optional) | that many items are done |
//! | `milestone_completed` | `milestone` | the milestone is completed |
//! | `kpi_band_at_least` | `kpi`, `band` | the KPI's band is at least `band` |
//! | `measurement_at_least` | `name`, `value` | the measurement is at least `value` |
//!
//! ## Example
//!
//! ```toml
//! [[phases.milestones.criteria]]
//! id = "contract-signed"
//! weight = 40
//! predicate = "fact"
//! params = { name = "contract_signed" }
//! ```

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use waypoint_common::{Band, PhaseKind};

use crate::milestones::MilestoneStatus;
use crate::snapshot::StateSnapshot;

/// A single checkable condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Contribution to milestone completion; unused for gate checks
    #[serde(default)]
    pub weight: u32,
    pub predicate: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Criterion {
    pub fn new(id: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            weight: 0,
            predicate: predicate.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.param(key)
            .ok_or_else(|| anyhow!("Criterion '{}' is missing parameter '{}'", self.id, key))
    }

    /// Description when present, otherwise the id.
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }
}

/// Decides whether a criterion holds for a snapshot.
#[async_trait]
pub trait CriterionPredicate: Send + Sync {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool>;
}

/// Adapts a synchronous closure into a predicate.
pub struct FnPredicate<F>(pub F);

#[async_trait]
impl<F> CriterionPredicate for FnPredicate<F>
where
    F: Fn(&Criterion, &StateSnapshot) -> bool + Send + Sync,
{
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        Ok((self.0)(criterion, snapshot))
    }
}

pub struct FactPredicate;

#[async_trait]
impl CriterionPredicate for FactPredicate {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let name = criterion.param("name").unwrap_or(&criterion.id);
        Ok(snapshot.facts.fact(name).unwrap_or(false))
    }
}

pub struct AllItemsDone;

#[async_trait]
impl CriterionPredicate for AllItemsDone {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let phase = phase_param(criterion, snapshot)?;
        let workflow = criterion.param("workflow");
        let mut scoped = snapshot
            .items_in(phase)
            .filter(|i| {
                workflow.is_none_or(|w| i.workflow.as_ref().is_some_and(|iw| iw.as_str() == w))
            })
            .peekable();
        // An empty scope has nothing done yet.
        if scoped.peek().is_none() {
            return Ok(false);
        }
        Ok(scoped.all(|i| i.is_done()))
    }
}

pub struct ItemsDoneAtLeast;

#[async_trait]
impl CriterionPredicate for ItemsDoneAtLeast {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let count: usize = criterion
            .required("count")?
            .parse()
            .with_context(|| format!("Criterion '{}': count must be an integer", criterion.id))?;
        let phase = phase_param(criterion, snapshot)?;
        let done = snapshot.items_in(phase).filter(|i| i.is_done()).count();
        Ok(done >= count)
    }
}

pub struct MilestoneCompleted;

#[async_trait]
impl CriterionPredicate for MilestoneCompleted {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let id = criterion.required("milestone")?;
        let milestone = snapshot
            .milestone(id)
            .ok_or_else(|| anyhow!("Unknown milestone '{}'", id))?;
        Ok(milestone.status == MilestoneStatus::Completed)
    }
}

pub struct KpiBandAtLeast;

#[async_trait]
impl CriterionPredicate for KpiBandAtLeast {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let kpi = criterion.required("kpi")?;
        let wanted: Band = criterion.required("band")?.parse()?;
        let reading = snapshot
            .kpi(kpi)
            .ok_or_else(|| anyhow!("Unknown KPI '{}'", kpi))?;
        Ok(reading.band.is_some_and(|band| band >= wanted))
    }
}

pub struct MeasurementAtLeast;

#[async_trait]
impl CriterionPredicate for MeasurementAtLeast {
    async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let name = criterion.required("name")?;
        let threshold: f64 = criterion
            .required("value")?
            .parse()
            .with_context(|| format!("Criterion '{}': value must be a number", criterion.id))?;
        Ok(snapshot
            .facts
            .measurement(name)
            .is_some_and(|value| value >= threshold))
    }
}

fn phase_param(criterion: &Criterion, snapshot: &StateSnapshot) -> Result<PhaseKind> {
    match criterion.param("phase") {
        Some(phase) => Ok(phase.parse()?),
        None => snapshot
            .current_phase()
            .ok_or_else(|| {
                anyhow!(
                    "Criterion '{}' needs a phase once the project is completed",
                    criterion.id
                )
            }),
    }
}

/// Predicates by name.
#[derive(Clone)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Arc<dyn CriterionPredicate>>,
}

impl PredicateRegistry {
    /// A registry with no predicates.
    pub fn empty() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    /// A registry holding every built-in predicate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("fact", FactPredicate);
        registry.register("all_items_done", AllItemsDone);
        registry.register("items_done_at_least", ItemsDoneAtLeast);
        registry.register("milestone_completed", MilestoneCompleted);
        registry.register("kpi_band_at_least", KpiBandAtLeast);
        registry.register("measurement_at_least", MeasurementAtLeast);
        registry
    }

    /// Register (or replace) a predicate.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        predicate: impl CriterionPredicate + 'static,
    ) {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn evaluate(&self, criterion: &Criterion, snapshot: &StateSnapshot) -> Result<bool> {
        let predicate = self
            .predicates
            .get(&criterion.predicate)
            .ok_or_else(|| anyhow!("Unknown predicate '{}'", criterion.predicate))?;
        predicate.evaluate(criterion, snapshot).await
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("predicates", &self.names())
            .finish()
    }
}
