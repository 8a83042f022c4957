//! Backlog store: work items, their dependency DAG and lifecycle.
//!
//! Items are never deleted, only archived. Ids are `ITEM-<n>` and the sequence
//! number records insertion order, which breaks priority ties during planning.
//!
//! ## Example
//!
//! ```
//! use waypoint::backlog::{BacklogStore, NewItem};
//! use waypoint_common::{PhaseKind, Priority};
//!
//! let mut backlog = BacklogStore::default();
//! let id = backlog
//!     .add(
//!         NewItem::new("Interview customers", 5, PhaseKind::BusinessModel)
//!             .with_priority(Priority::High)
//!             .with_criterion("Ten interviews recorded"),
//!         chrono::Utc::now(),
//!     )
//!     .unwrap();
//! assert_eq!(id.as_str(), "ITEM-1");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use waypoint_common::{ItemId, PhaseKind, Priority, SprintId, WorkerId, WorkflowId};

use crate::errors::ValidationError;

/// Lifecycle status of a backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Backlog,
    Assigned,
    InProgress,
    Blocked,
    Done,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Backlog => write!(f, "backlog"),
            ItemStatus::Assigned => write!(f, "assigned"),
            ItemStatus::InProgress => write!(f, "in_progress"),
            ItemStatus::Blocked => write!(f, "blocked"),
            ItemStatus::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub description: String,
    #[serde(default)]
    pub satisfied: bool,
}

/// An impediment raised against an item. Closed blockers stay in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: u32,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Blocker {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// A unit of work (story) in the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogItem {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Estimate in story points
    pub estimate: u32,
    pub priority: Priority,
    pub phase: PhaseKind,
    #[serde(default)]
    pub workflow: Option<WorkflowId>,
    pub status: ItemStatus,
    #[serde(default)]
    pub dependencies: Vec<ItemId>,
    #[serde(default)]
    pub blockers: Vec<Blocker>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub archived: bool,
    /// Insertion order
    pub sequence: u64,
    #[serde(default)]
    pub assignee: Option<WorkerId>,
    #[serde(default)]
    pub sprint: Option<SprintId>,
    /// Status to restore once every blocker is resolved
    #[serde(default)]
    pub status_before_block: Option<ItemStatus>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BacklogItem {
    pub fn open_blockers(&self) -> impl Iterator<Item = &Blocker> {
        self.blockers.iter().filter(|b| b.is_open())
    }

    pub fn has_open_blockers(&self) -> bool {
        self.open_blockers().next().is_some()
    }

    pub fn criteria_met(&self) -> bool {
        self.acceptance_criteria.iter().all(|c| c.satisfied)
    }

    pub fn is_done(&self) -> bool {
        self.status == ItemStatus::Done
    }

    /// Not archived.
    pub fn is_active(&self) -> bool {
        !self.archived
    }
}

/// Request to create a backlog item.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub description: String,
    pub estimate: u32,
    pub priority: Priority,
    pub phase: Option<PhaseKind>,
    pub workflow: Option<WorkflowId>,
    pub dependencies: Vec<ItemId>,
    pub acceptance_criteria: Vec<String>,
}

impl NewItem {
    pub fn new(title: impl Into<String>, estimate: u32, phase: PhaseKind) -> Self {
        Self {
            title: title.into(),
            estimate,
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<WorkflowId>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<ItemId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }
}

/// Done and total points over a set of items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointTally {
    pub done: u32,
    pub total: u32,
}

impl PointTally {
    /// Done percentage, 0 when nothing is counted.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.done) / f64::from(self.total) * 100.0
        }
    }
}

/// All backlog items in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacklogStore {
    items: Vec<BacklogItem>,
    next_sequence: u64,
}

impl BacklogStore {
    /// Validate and add a new item. Nothing is stored when validation fails.
    pub fn add(&mut self, new: NewItem, now: DateTime<Utc>) -> Result<ItemId, ValidationError> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let criteria: Vec<AcceptanceCriterion> = new
            .acceptance_criteria
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|c| AcceptanceCriterion {
                description: c.to_string(),
                satisfied: false,
            })
            .collect();
        if criteria.is_empty() {
            return Err(ValidationError::MissingAcceptanceCriteria);
        }
        let phase = new.phase.unwrap_or(PhaseKind::BusinessModel);

        let sequence = self.next_sequence + 1;
        let id = ItemId::new(format!("ITEM-{}", sequence));

        // A new item cannot be depended on yet, so only existence needs checking.
        let mut dependencies = Vec::new();
        for dep in new.dependencies {
            if self.get(&dep).is_none() {
                return Err(ValidationError::UnknownDependency {
                    item: id,
                    dependency: dep,
                });
            }
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        self.next_sequence = sequence;
        self.items.push(BacklogItem {
            id: id.clone(),
            title: title.to_string(),
            description: new.description,
            estimate: new.estimate,
            priority: new.priority,
            phase,
            workflow: new.workflow,
            status: ItemStatus::Backlog,
            dependencies,
            blockers: Vec::new(),
            acceptance_criteria: criteria,
            archived: false,
            sequence,
            assignee: None,
            sprint: None,
            status_before_block: None,
            created_at: now,
            completed_at: None,
        });
        Ok(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&BacklogItem> {
        self.items.iter().find(|i| &i.id == id)
    }

    fn get_mut(&mut self, id: &ItemId) -> Result<&mut BacklogItem, ValidationError> {
        self.items
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| ValidationError::UnknownItem(id.clone()))
    }

    fn get_active_mut(&mut self, id: &ItemId) -> Result<&mut BacklogItem, ValidationError> {
        let item = self.get_mut(id)?;
        if item.archived {
            return Err(ValidationError::ItemArchived(id.clone()));
        }
        Ok(item)
    }

    /// Every item, archived ones included.
    pub fn items(&self) -> &[BacklogItem] {
        &self.items
    }

    pub fn active_items(&self) -> impl Iterator<Item = &BacklogItem> {
        self.items.iter().filter(|i| i.is_active())
    }

    /// Add a dependency edge, rejecting unknown items and cycles.
    pub fn add_dependency(
        &mut self,
        item: &ItemId,
        dependency: &ItemId,
    ) -> Result<(), ValidationError> {
        if self.get(dependency).is_none() {
            return Err(ValidationError::UnknownDependency {
                item: item.clone(),
                dependency: dependency.clone(),
            });
        }
        if item == dependency || self.depends_on(dependency, item) {
            return Err(ValidationError::DependencyCycle {
                item: item.clone(),
                dependency: dependency.clone(),
            });
        }
        let entry = self.get_active_mut(item)?;
        if !entry.dependencies.contains(dependency) {
            entry.dependencies.push(dependency.clone());
        }
        Ok(())
    }

    /// Whether `from` transitively depends on `target`.
    fn depends_on(&self, from: &ItemId, target: &ItemId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == target {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(item) = self.get(&current) {
                stack.extend(item.dependencies.iter().cloned());
            }
        }
        false
    }

    pub fn dependencies_done(&self, item: &BacklogItem) -> bool {
        item.dependencies
            .iter()
            .all(|d| self.get(d).is_some_and(|dep| dep.is_done()))
    }

    /// Planning candidates for a phase: unarchived backlog items whose
    /// dependencies are all done, by priority descending then insertion order.
    pub fn candidates(&self, phase: PhaseKind) -> Vec<&BacklogItem> {
        let mut candidates: Vec<&BacklogItem> = self
            .active_items()
            .filter(|i| i.phase == phase && i.status == ItemStatus::Backlog)
            .filter(|i| self.dependencies_done(i))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        candidates
    }

    /// Reasons the item cannot be marked done; empty when it can.
    pub fn completion_blockers(&self, id: &ItemId) -> Result<Vec<String>, ValidationError> {
        let item = self
            .get(id)
            .ok_or_else(|| ValidationError::UnknownItem(id.clone()))?;
        if item.archived {
            return Err(ValidationError::ItemArchived(id.clone()));
        }
        let mut unmet = Vec::new();
        for (index, criterion) in item.acceptance_criteria.iter().enumerate() {
            if !criterion.satisfied {
                unmet.push(format!(
                    "acceptance criterion #{} not satisfied: {}",
                    index, criterion.description
                ));
            }
        }
        for blocker in item.open_blockers() {
            unmet.push(format!("open blocker #{}: {}", blocker.id, blocker.reason));
        }
        for dep in &item.dependencies {
            if !self.get(dep).is_some_and(|d| d.is_done()) {
                unmet.push(format!("dependency {} is not done", dep));
            }
        }
        Ok(unmet)
    }

    /// Mark an item done. Callers check [`Self::completion_blockers`] first.
    pub fn mark_done(
        &mut self,
        id: &ItemId,
        now: DateTime<Utc>,
    ) -> Result<&BacklogItem, ValidationError> {
        let item = self.get_active_mut(id)?;
        if item.status == ItemStatus::Done {
            return Err(invalid_change(item, ItemStatus::Done));
        }
        item.status = ItemStatus::Done;
        item.completed_at = Some(now);
        item.status_before_block = None;
        Ok(&*item)
    }

    pub fn mark_assigned(
        &mut self,
        id: &ItemId,
        worker: WorkerId,
        sprint: SprintId,
    ) -> Result<(), ValidationError> {
        let item = self.get_active_mut(id)?;
        if item.status != ItemStatus::Backlog {
            return Err(invalid_change(item, ItemStatus::Assigned));
        }
        item.status = ItemStatus::Assigned;
        item.assignee = Some(worker);
        item.sprint = Some(sprint);
        Ok(())
    }

    /// Assigned → in progress, when the sprint starts.
    pub fn mark_in_progress(&mut self, id: &ItemId) -> Result<(), ValidationError> {
        let item = self.get_active_mut(id)?;
        match item.status {
            ItemStatus::Assigned => item.status = ItemStatus::InProgress,
            ItemStatus::Blocked => item.status_before_block = Some(ItemStatus::InProgress),
            ItemStatus::InProgress => {}
            _ => return Err(invalid_change(item, ItemStatus::InProgress)),
        }
        Ok(())
    }

    /// Send an unfinished item back to the backlog, clearing its assignment.
    /// Done items are left untouched.
    pub fn return_to_backlog(&mut self, id: &ItemId) -> Result<(), ValidationError> {
        let item = self.get_mut(id)?;
        if item.status == ItemStatus::Done {
            return Ok(());
        }
        item.assignee = None;
        item.sprint = None;
        if item.status == ItemStatus::Blocked {
            item.status_before_block = Some(ItemStatus::Backlog);
        } else {
            item.status = ItemStatus::Backlog;
        }
        Ok(())
    }

    pub fn satisfy_criterion(&mut self, id: &ItemId, index: usize) -> Result<(), ValidationError> {
        let item = self.get_active_mut(id)?;
        let criterion = item
            .acceptance_criteria
            .get_mut(index)
            .ok_or_else(|| ValidationError::UnknownCriterion {
                item: id.clone(),
                index,
            })?;
        criterion.satisfied = true;
        Ok(())
    }

    /// Raise a blocker. The item moves to `blocked` until every blocker is resolved.
    pub fn add_blocker(
        &mut self,
        id: &ItemId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<u32, ValidationError> {
        let item = self.get_active_mut(id)?;
        if item.status == ItemStatus::Done {
            return Err(invalid_change(item, ItemStatus::Blocked));
        }
        let blocker_id = item.blockers.iter().map(|b| b.id).max().unwrap_or(0) + 1;
        item.blockers.push(Blocker {
            id: blocker_id,
            reason: reason.into(),
            raised_at: now,
            resolved_at: None,
        });
        if item.status != ItemStatus::Blocked {
            item.status_before_block = Some(item.status);
            item.status = ItemStatus::Blocked;
        }
        Ok(blocker_id)
    }

    pub fn resolve_blocker(
        &mut self,
        id: &ItemId,
        blocker: u32,
        now: DateTime<Utc>,
    ) -> Result<ItemStatus, ValidationError> {
        let item = self.get_active_mut(id)?;
        let entry = item
            .blockers
            .iter_mut()
            .find(|b| b.id == blocker && b.is_open())
            .ok_or_else(|| ValidationError::UnknownBlocker {
                item: id.clone(),
                blocker,
            })?;
        entry.resolved_at = Some(now);
        if !item.has_open_blockers() && item.status == ItemStatus::Blocked {
            item.status = item.status_before_block.take().unwrap_or(ItemStatus::Backlog);
        }
        Ok(item.status)
    }

    /// Archive an item. Items held by a sprint must be released first.
    pub fn archive(&mut self, id: &ItemId) -> Result<(), ValidationError> {
        let item = self.get_active_mut(id)?;
        if item.sprint.is_some() && item.status != ItemStatus::Done {
            return Err(ValidationError::InvalidStatusChange {
                item: id.clone(),
                from: item.status.to_string(),
                to: "archived".into(),
            });
        }
        item.archived = true;
        Ok(())
    }

    /// Done/total points for active items of a phase.
    pub fn phase_points(&self, phase: PhaseKind) -> PointTally {
        tally(self.active_items().filter(|i| i.phase == phase))
    }

    /// Done/total points for active items bound to a workflow.
    pub fn workflow_points(&self, workflow: &WorkflowId) -> PointTally {
        tally(
            self.active_items()
                .filter(|i| i.workflow.as_ref() == Some(workflow)),
        )
    }
}

fn tally<'a>(items: impl Iterator<Item = &'a BacklogItem>) -> PointTally {
    items.fold(PointTally::default(), |mut acc, item| {
        acc.total += item.estimate;
        if item.is_done() {
            acc.done += item.estimate;
        }
        acc
    })
}

fn invalid_change(item: &BacklogItem, to: ItemStatus) -> ValidationError {
    ValidationError::InvalidStatusChange {
        item: item.id.clone(),
        from: item.status.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(items: &[(&str, u32, Priority)]) -> BacklogStore {
        let mut store = BacklogStore::default();
        for (title, estimate, priority) in items {
            store
                .add(
                    NewItem::new(*title, *estimate, PhaseKind::Development)
                        .with_priority(*priority)
                        .with_criterion("works"),
                    Utc::now(),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let store = store_with(&[("a", 1, Priority::Low), ("b", 2, Priority::Low)]);
        let ids: Vec<&str> = store.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["ITEM-1", "ITEM-2"]);
        assert_eq!(store.items()[1].sequence, 2);
    }

    #[test]
    fn test_add_requires_acceptance_criteria() {
        let mut store = BacklogStore::default();
        let err = store
            .add(NewItem::new("No criteria", 3, PhaseKind::Design), Utc::now())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingAcceptanceCriteria);

        let err = store
            .add(
                NewItem::new("Blank criteria", 3, PhaseKind::Design).with_criterion("   "),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingAcceptanceCriteria);
        assert!(store.items().is_empty());
    }

    #[test]
    fn test_add_rejects_unknown_dependency_without_consuming_id() {
        let mut store = BacklogStore::default();
        let err = store
            .add(
                NewItem::new("x", 1, PhaseKind::Design)
                    .with_criterion("c")
                    .with_dependency("ITEM-9"),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownDependency { .. }));

        let id = store
            .add(NewItem::new("y", 1, PhaseKind::Design).with_criterion("c"), Utc::now())
            .unwrap();
        assert_eq!(id.as_str(), "ITEM-1");
    }

    #[test]
    fn test_add_dependency_rejects_cycles() {
        let mut store = store_with(&[("a", 1, Priority::Low), ("b", 1, Priority::Low)]);
        let a = ItemId::from("ITEM-1");
        let b = ItemId::from("ITEM-2");
        store.add_dependency(&b, &a).unwrap();
        let err = store.add_dependency(&a, &b).unwrap_err();
        assert!(matches!(err, ValidationError::DependencyCycle { .. }));
        let err = store.add_dependency(&a, &a).unwrap_err();
        assert!(matches!(err, ValidationError::DependencyCycle { .. }));
    }

    #[test]
    fn test_candidates_order_by_priority_then_insertion() {
        let store = store_with(&[
            ("low", 1, Priority::Low),
            ("high-1", 1, Priority::High),
            ("critical", 1, Priority::Critical),
            ("high-2", 1, Priority::High),
        ]);
        let titles: Vec<&str> = store
            .candidates(PhaseKind::Development)
            .iter()
            .map(|i| i.title.as_str())
            .collect();
        assert_eq!(titles, vec!["critical", "high-1", "high-2", "low"]);
    }

    #[test]
    fn test_candidates_skip_items_with_unfinished_dependencies() {
        let mut store = store_with(&[("base", 1, Priority::Low)]);
        store
            .add(
                NewItem::new("child", 1, PhaseKind::Development)
                    .with_priority(Priority::Critical)
                    .with_criterion("c")
                    .with_dependency("ITEM-1"),
                Utc::now(),
            )
            .unwrap();
        let titles: Vec<&str> = store
            .candidates(PhaseKind::Development)
            .iter()
            .map(|i| i.title.as_str())
            .collect();
        assert_eq!(titles, vec!["base"]);
        assert!(store.candidates(PhaseKind::Design).is_empty());
    }

    #[test]
    fn test_completion_requires_criteria_blockers_and_dependencies() {
        let mut store = store_with(&[("a", 3, Priority::Medium)]);
        let id = ItemId::from("ITEM-1");
        let unmet = store.completion_blockers(&id).unwrap();
        assert_eq!(unmet.len(), 1);
        assert!(unmet[0].contains("acceptance criterion #0"));

        store.satisfy_criterion(&id, 0).unwrap();
        let blocker = store.add_blocker(&id, "waiting on vendor", Utc::now()).unwrap();
        assert_eq!(store.get(&id).unwrap().status, ItemStatus::Blocked);
        assert_eq!(store.completion_blockers(&id).unwrap().len(), 1);

        let status = store.resolve_blocker(&id, blocker, Utc::now()).unwrap();
        assert_eq!(status, ItemStatus::Backlog);
        assert!(store.completion_blockers(&id).unwrap().is_empty());

        store.mark_done(&id, Utc::now()).unwrap();
        assert!(store.get(&id).unwrap().is_done());
        assert!(store.mark_done(&id, Utc::now()).is_err());
    }

    #[test]
    fn test_unknown_criterion_index() {
        let mut store = store_with(&[("a", 3, Priority::Medium)]);
        let err = store.satisfy_criterion(&ItemId::from("ITEM-1"), 4).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownCriterion {
                item: ItemId::from("ITEM-1"),
                index: 4
            }
        );
    }

    #[test]
    fn test_blocking_restores_previous_status() {
        let mut store = store_with(&[("a", 3, Priority::Medium)]);
        let id = ItemId::from("ITEM-1");
        store
            .mark_assigned(&id, WorkerId::from("w1"), SprintId::from("SPRINT-1"))
            .unwrap();
        store.mark_in_progress(&id).unwrap();
        let first = store.add_blocker(&id, "one", Utc::now()).unwrap();
        let second = store.add_blocker(&id, "two", Utc::now()).unwrap();
        assert_eq!(store.resolve_blocker(&id, first, Utc::now()).unwrap(), ItemStatus::Blocked);
        assert_eq!(
            store.resolve_blocker(&id, second, Utc::now()).unwrap(),
            ItemStatus::InProgress
        );
        assert!(store.resolve_blocker(&id, second, Utc::now()).is_err());
    }

    #[test]
    fn test_archive_hides_item_from_planning_and_points() {
        let mut store = store_with(&[("a", 3, Priority::Medium), ("b", 2, Priority::Medium)]);
        let id = ItemId::from("ITEM-1");
        store.archive(&id).unwrap();
        assert_eq!(store.items().len(), 2);
        assert_eq!(store.candidates(PhaseKind::Development).len(), 1);
        assert_eq!(store.phase_points(PhaseKind::Development).total, 2);
        assert_eq!(
            store.satisfy_criterion(&id, 0).unwrap_err(),
            ValidationError::ItemArchived(id)
        );
    }

    #[test]
    fn test_archive_rejects_items_held_by_a_sprint() {
        let mut store = store_with(&[("a", 3, Priority::Medium)]);
        let id = ItemId::from("ITEM-1");
        store
            .mark_assigned(&id, WorkerId::from("w1"), SprintId::from("SPRINT-1"))
            .unwrap();
        assert!(store.archive(&id).is_err());
        store.return_to_backlog(&id).unwrap();
        store.archive(&id).unwrap();
    }

    #[test]
    fn test_workflow_points_and_percent() {
        let mut store = BacklogStore::default();
        for estimate in [3, 5] {
            store
                .add(
                    NewItem::new("w", estimate, PhaseKind::Architecture)
                        .with_workflow("apis")
                        .with_criterion("c"),
                    Utc::now(),
                )
                .unwrap();
        }
        let id = ItemId::from("ITEM-2");
        store.satisfy_criterion(&id, 0).unwrap();
        store.mark_done(&id, Utc::now()).unwrap();
        let tally = store.workflow_points(&WorkflowId::from("apis"));
        assert_eq!(tally, PointTally { done: 5, total: 8 });
        assert!((tally.percent() - 62.5).abs() < f64::EPSILON);
        assert_eq!(store.workflow_points(&WorkflowId::from("none")).percent(), 0.0);
    }
}
