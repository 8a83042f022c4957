//! Sprint planning.
//!
//! Planning is greedy first-fit: candidates are walked in priority order and
//! each one is accepted when it fits the remaining sprint capacity and some
//! worker can absorb it; otherwise it is skipped and the walk continues.
//! Accepted items go to the worker with the most remaining capacity.
//!
//! Every operation here stages its changes on copies of the backlog and the
//! worker registry and only writes them back once everything succeeded.

pub mod burndown;
pub mod sprint;

pub use burndown::{BurndownPoint, BurndownReport};
pub use sprint::{Sprint, SprintAssignment, SprintBook, SprintStatus};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use waypoint_common::{ItemId, PhaseKind, SprintId};

use crate::backlog::BacklogStore;
use crate::errors::{NotReady, OrchestratorError};
use crate::workers::WorkerRegistry;

/// A freshly planned sprint plus soft warnings for the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSprint {
    pub sprint: Sprint,
    pub skipped: Vec<ItemId>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SprintPlanner {
    commitment_ratio: f64,
}

impl SprintPlanner {
    pub fn new(commitment_ratio: f64) -> Self {
        Self {
            commitment_ratio: commitment_ratio.clamp(0.0, 1.0),
        }
    }

    /// Ready capacity scaled by the commitment ratio, rounded down.
    pub fn capacity(&self, workers: &WorkerRegistry) -> u32 {
        (f64::from(workers.ready_capacity()) * self.commitment_ratio).floor() as u32
    }

    /// Plan a sprint for `phase`. Returns `NotReady` when no worker is ready.
    pub fn plan(
        &self,
        phase: PhaseKind,
        duration_days: u32,
        backlog: &mut BacklogStore,
        workers: &mut WorkerRegistry,
        sprints: &mut SprintBook,
        now: DateTime<Utc>,
    ) -> Result<Result<PlannedSprint, NotReady>, OrchestratorError> {
        if let Some(sprint) = sprints.in_flight(phase) {
            return Ok(Err(NotReady::SprintInFlight {
                sprint: sprint.id.clone(),
            }));
        }
        if workers.ready_capacity() == 0 {
            return Ok(Err(NotReady::InsufficientCapacity));
        }
        let capacity = self.capacity(workers);

        let mut staged_workers = workers.clone();
        let mut remaining = capacity;
        let mut assignments = Vec::new();
        let mut skipped = Vec::new();
        let mut top_title = None;
        for item in backlog.candidates(phase) {
            if item.estimate > remaining {
                skipped.push(item.id.clone());
                continue;
            }
            let Some(worker) = staged_workers.best_fit(item.estimate).map(|w| w.id.clone()) else {
                skipped.push(item.id.clone());
                continue;
            };
            staged_workers.reserve(&worker, item.estimate)?;
            remaining -= item.estimate;
            top_title.get_or_insert_with(|| item.title.clone());
            assignments.push(SprintAssignment {
                item: item.id.clone(),
                worker,
                estimate: item.estimate,
            });
        }

        let (number, id) = sprints.next_id();
        let mut staged_backlog = backlog.clone();
        for assignment in &assignments {
            staged_backlog.mark_assigned(&assignment.item, assignment.worker.clone(), id.clone())?;
        }

        let committed: u32 = assignments.iter().map(|a| a.estimate).sum();
        let mut warnings = Vec::new();
        let goal = match top_title {
            Some(title) => format!(
                "Sprint {} ({}): deliver {} items, {} of {} points, starting with '{}'",
                number,
                phase.label(),
                assignments.len(),
                committed,
                capacity,
                title
            ),
            None => {
                warn!(sprint = %id, phase = %phase, capacity, "No backlog item fits the sprint");
                warnings.push(format!(
                    "No backlog item fits {} points of capacity; sprint {} is empty",
                    capacity, id
                ));
                format!(
                    "Sprint {} ({}): no items fit the available capacity",
                    number,
                    phase.label()
                )
            }
        };

        let sprint = Sprint {
            id,
            number,
            phase,
            status: SprintStatus::Planned,
            capacity,
            goal,
            assignments,
            starts_at: now,
            ends_at: now + Duration::days(i64::from(duration_days.max(1))),
            created_at: now,
            started_at: None,
            closed_at: None,
            burndown: Vec::new(),
        };
        info!(
            sprint = %sprint.id,
            phase = %phase,
            items = sprint.assignments.len(),
            committed,
            capacity,
            "Sprint planned"
        );

        *workers = staged_workers;
        *backlog = staged_backlog;
        sprints.push(sprint.clone());
        Ok(Ok(PlannedSprint {
            sprint,
            skipped,
            warnings,
        }))
    }
}

/// Planned → active. Items move to in progress and the first burndown point is recorded.
pub fn start(
    sprints: &mut SprintBook,
    backlog: &mut BacklogStore,
    id: &SprintId,
    now: DateTime<Utc>,
) -> Result<Sprint, OrchestratorError> {
    let sprint = sprints.get_mut(id)?;
    sprint.expect_status(SprintStatus::Planned, "planned")?;

    let mut staged = backlog.clone();
    for assignment in &sprint.assignments {
        staged.mark_in_progress(&assignment.item)?;
    }
    *backlog = staged;

    let length = sprint.ends_at - sprint.starts_at;
    sprint.status = SprintStatus::Active;
    sprint.started_at = Some(now);
    sprint.starts_at = now;
    sprint.ends_at = now + length;
    sprint.burndown.push(BurndownPoint {
        at: now,
        remaining: sprint.remaining(backlog),
    });
    info!(sprint = %id, "Sprint started");
    Ok(sprint.clone())
}

/// Active → completed. Unfinished items go back to the backlog and their
/// reserved workload is released.
pub fn close(
    sprints: &mut SprintBook,
    backlog: &mut BacklogStore,
    workers: &mut WorkerRegistry,
    id: &SprintId,
    now: DateTime<Utc>,
) -> Result<Sprint, OrchestratorError> {
    let sprint = sprints.get_mut(id)?;
    sprint.expect_status(SprintStatus::Active, "active")?;
    release_unfinished(sprint, backlog, workers)?;
    sprint.status = SprintStatus::Completed;
    sprint.closed_at = Some(now);
    sprint.burndown.push(BurndownPoint {
        at: now,
        remaining: sprint.remaining(backlog),
    });
    info!(sprint = %id, "Sprint closed");
    Ok(sprint.clone())
}

/// Cancel a planned sprint, releasing every reservation at once.
pub fn cancel(
    sprints: &mut SprintBook,
    backlog: &mut BacklogStore,
    workers: &mut WorkerRegistry,
    id: &SprintId,
    now: DateTime<Utc>,
) -> Result<Sprint, OrchestratorError> {
    let sprint = sprints.get_mut(id)?;
    sprint.expect_status(SprintStatus::Planned, "planned")?;
    release_unfinished(sprint, backlog, workers)?;
    sprint.status = SprintStatus::Cancelled;
    sprint.closed_at = Some(now);
    info!(sprint = %id, "Sprint cancelled");
    Ok(sprint.clone())
}

fn release_unfinished(
    sprint: &Sprint,
    backlog: &mut BacklogStore,
    workers: &mut WorkerRegistry,
) -> Result<(), OrchestratorError> {
    let mut staged_backlog = backlog.clone();
    let mut staged_workers = workers.clone();
    for assignment in &sprint.assignments {
        let done = staged_backlog
            .get(&assignment.item)
            .is_some_and(|i| i.is_done());
        if !done {
            staged_backlog.return_to_backlog(&assignment.item)?;
            staged_workers.release(&assignment.worker, assignment.estimate);
        }
    }
    *backlog = staged_backlog;
    *workers = staged_workers;
    Ok(())
}

/// Record that an item of the sprint is done: its workload is released and a
/// burndown point appended.
pub fn record_progress(
    sprint: &mut Sprint,
    item: &ItemId,
    backlog: &BacklogStore,
    workers: &mut WorkerRegistry,
    now: DateTime<Utc>,
) {
    if let Some(assignment) = sprint.assignment(item) {
        workers.release(&assignment.worker, assignment.estimate);
    }
    sprint.burndown.push(BurndownPoint {
        at: now,
        remaining: sprint.remaining(backlog),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{ItemStatus, NewItem};
    use crate::errors::ValidationError;
    use crate::workers::{WorkerConfig, WorkerStatus};
    use waypoint_common::{Priority, WorkerId};

    const PHASE: PhaseKind = PhaseKind::Development;

    fn workers(capacities: &[(&str, u32)]) -> WorkerRegistry {
        let configs: Vec<WorkerConfig> = capacities
            .iter()
            .map(|(id, capacity)| WorkerConfig {
                id: WorkerId::from(*id),
                name: None,
                capacity: *capacity,
                unavailable: false,
            })
            .collect();
        WorkerRegistry::from_config(&configs)
    }

    fn backlog(estimates: &[u32]) -> (BacklogStore, Vec<ItemId>) {
        let mut store = BacklogStore::default();
        let ids = estimates
            .iter()
            .enumerate()
            .map(|(i, estimate)| {
                store
                    .add(
                        NewItem::new(format!("item {}", i), *estimate, PHASE)
                            .with_priority(Priority::High)
                            .with_criterion("accepted"),
                        Utc::now(),
                    )
                    .unwrap()
            })
            .collect();
        (store, ids)
    }

    fn plan(
        planner: &SprintPlanner,
        backlog: &mut BacklogStore,
        workers: &mut WorkerRegistry,
        sprints: &mut SprintBook,
    ) -> PlannedSprint {
        planner
            .plan(PHASE, 10, backlog, workers, sprints, Utc::now())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_first_fit_skips_what_does_not_fit() {
        let planner = SprintPlanner::new(0.8);
        let mut registry = workers(&[("w1", 25)]);
        assert_eq!(planner.capacity(&registry), 20);
        let (mut store, ids) = backlog(&[13, 5, 8]);
        let mut sprints = SprintBook::default();

        let planned = plan(&planner, &mut store, &mut registry, &mut sprints);
        let items: Vec<&ItemId> = planned.sprint.assignments.iter().map(|a| &a.item).collect();
        assert_eq!(items, vec![&ids[0], &ids[1]]);
        assert_eq!(planned.sprint.committed(), 18);
        assert!(planned.sprint.committed() <= planned.sprint.capacity);
        assert_eq!(planned.skipped, vec![ids[2].clone()]);
        assert_eq!(store.get(&ids[0]).unwrap().status, ItemStatus::Assigned);
        assert_eq!(store.get(&ids[2]).unwrap().status, ItemStatus::Backlog);
        assert_eq!(registry.get(&WorkerId::from("w1")).unwrap().workload, 18);
    }

    #[test]
    fn test_assignment_balances_load() {
        let planner = SprintPlanner::new(1.0);
        let mut registry = workers(&[("a", 10), ("b", 10)]);
        let (mut store, _) = backlog(&[6, 4, 4]);
        let mut sprints = SprintBook::default();
        let planned = plan(&planner, &mut store, &mut registry, &mut sprints);
        let owners: Vec<&str> = planned
            .sprint
            .assignments
            .iter()
            .map(|a| a.worker.as_str())
            .collect();
        assert_eq!(owners, vec!["a", "b", "b"]);
        for worker in registry.workers() {
            assert!(worker.workload <= worker.capacity);
        }
    }

    #[test]
    fn test_zero_fit_creates_empty_sprint_with_warning() {
        let planner = SprintPlanner::new(0.8);
        let mut registry = workers(&[("w1", 5)]);
        let (mut store, _) = backlog(&[8]);
        let mut sprints = SprintBook::default();
        let planned = plan(&planner, &mut store, &mut registry, &mut sprints);
        assert!(planned.sprint.assignments.is_empty());
        assert_eq!(planned.warnings.len(), 1);
        assert!(planned.sprint.goal.contains("no items fit"));
        assert_eq!(planned.sprint.status, SprintStatus::Planned);
    }

    #[test]
    fn test_planning_requires_ready_workers_and_no_sprint_in_flight() {
        let planner = SprintPlanner::new(0.8);
        let mut none = workers(&[]);
        let (mut store, _) = backlog(&[3]);
        let mut sprints = SprintBook::default();
        let outcome = planner
            .plan(PHASE, 10, &mut store, &mut none, &mut sprints, Utc::now())
            .unwrap();
        assert_eq!(outcome.unwrap_err(), NotReady::InsufficientCapacity);

        let mut registry = workers(&[("w1", 10)]);
        let first = plan(&planner, &mut store, &mut registry, &mut sprints);
        let outcome = planner
            .plan(PHASE, 10, &mut store, &mut registry, &mut sprints, Utc::now())
            .unwrap();
        assert_eq!(
            outcome.unwrap_err(),
            NotReady::SprintInFlight {
                sprint: first.sprint.id
            }
        );
    }

    #[test]
    fn test_dependencies_must_be_done_before_planning() {
        let planner = SprintPlanner::new(1.0);
        let mut registry = workers(&[("w1", 20)]);
        let (mut store, ids) = backlog(&[2, 3]);
        store.add_dependency(&ids[1], &ids[0]).unwrap();
        let mut sprints = SprintBook::default();
        let planned = plan(&planner, &mut store, &mut registry, &mut sprints);
        assert_eq!(planned.sprint.assignments.len(), 1);
        assert_eq!(planned.sprint.assignments[0].item, ids[0]);
    }

    #[test]
    fn test_cancel_releases_all_workload() {
        let planner = SprintPlanner::new(0.8);
        let mut registry = workers(&[("w1", 25)]);
        let (mut store, ids) = backlog(&[13, 5]);
        let mut sprints = SprintBook::default();
        let planned = plan(&planner, &mut store, &mut registry, &mut sprints);

        let cancelled = cancel(
            &mut sprints,
            &mut store,
            &mut registry,
            &planned.sprint.id,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(cancelled.status, SprintStatus::Cancelled);
        let worker = registry.get(&WorkerId::from("w1")).unwrap();
        assert_eq!(worker.workload, 0);
        assert_eq!(worker.status, WorkerStatus::Ready);
        assert!(ids.iter().all(|id| store.get(id).unwrap().status == ItemStatus::Backlog));
        assert!(sprints.in_flight(PHASE).is_none());

        let err = cancel(
            &mut sprints,
            &mut store,
            &mut registry,
            &planned.sprint.id,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Validation(ValidationError::SprintState { .. })
        ));
    }

    #[test]
    fn test_start_progress_and_close() {
        let planner = SprintPlanner::new(1.0);
        let mut registry = workers(&[("w1", 10)]);
        let (mut store, ids) = backlog(&[4, 3]);
        let mut sprints = SprintBook::default();
        let planned = plan(&planner, &mut store, &mut registry, &mut sprints);
        let id = planned.sprint.id.clone();

        assert!(close(&mut sprints, &mut store, &mut registry, &id, Utc::now()).is_err());
        let started = start(&mut sprints, &mut store, &id, Utc::now()).unwrap();
        assert_eq!(started.status, SprintStatus::Active);
        assert_eq!(started.burndown[0].remaining, 7);
        assert_eq!(store.get(&ids[0]).unwrap().status, ItemStatus::InProgress);

        store.satisfy_criterion(&ids[0], 0).unwrap();
        store.mark_done(&ids[0], Utc::now()).unwrap();
        let sprint = sprints.get_mut(&id).unwrap();
        record_progress(sprint, &ids[0], &store, &mut registry, Utc::now());
        assert_eq!(sprint.burndown.last().unwrap().remaining, 3);
        assert_eq!(registry.get(&WorkerId::from("w1")).unwrap().workload, 3);

        let closed = close(&mut sprints, &mut store, &mut registry, &id, Utc::now()).unwrap();
        assert_eq!(closed.status, SprintStatus::Completed);
        assert_eq!(store.get(&ids[1]).unwrap().status, ItemStatus::Backlog);
        assert_eq!(store.get(&ids[1]).unwrap().sprint, None);
        assert_eq!(registry.get(&WorkerId::from("w1")).unwrap().workload, 0);

        let report = burndown::report(&closed);
        assert_eq!(report.committed, 7);
        assert_eq!(report.ideal.first().unwrap().remaining, 7);
        assert_eq!(report.ideal.last().unwrap().remaining, 0);
        assert_eq!(report.actual.len(), 3);
    }
}
