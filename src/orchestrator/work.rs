//! Backlog, sprint, worker and fact operations.

use chrono::Utc;
use tracing::info;
use waypoint_common::{ItemId, PhaseKind, SprintId, WorkerId};

use super::engine::Orchestrator;
use super::events::OrchestratorEvent;
use super::{ItemCompletion, Outcome};
use crate::backlog::{ItemStatus, NewItem};
use crate::errors::{NotReady, OrchestratorError, ValidationError};
use crate::planner::{self, BurndownReport, Sprint, SprintBook, SprintStatus, burndown};
use crate::workers::WorkerStatus;

impl Orchestrator {
    /// Add an item to the backlog. Items without a phase join the current one.
    pub async fn add_backlog_item(&self, mut new: NewItem) -> Result<ItemId, OrchestratorError> {
        let phase = match new.phase {
            Some(phase) => phase,
            None => self.phase.current().phase().unwrap_or(PhaseKind::Development),
        };
        new.phase = Some(phase);
        if let Some(workflow) = &new.workflow
            && !self.definition(phase).has_workflow(workflow)
        {
            return Err(ValidationError::UnknownWorkflow {
                workflow: workflow.clone(),
                phase,
            }
            .into());
        }
        let id = self.backlog.lock().await.add(new, Utc::now())?;
        info!(item = %id, phase = %phase, "Backlog item added");
        self.persist().await?;
        Ok(id)
    }

    pub async fn add_dependency(
        &self,
        item: &ItemId,
        dependency: &ItemId,
    ) -> Result<(), OrchestratorError> {
        self.backlog.lock().await.add_dependency(item, dependency)?;
        self.persist().await
    }

    pub async fn satisfy_acceptance_criterion(
        &self,
        item: &ItemId,
        index: usize,
    ) -> Result<(), OrchestratorError> {
        self.backlog.lock().await.satisfy_criterion(item, index)?;
        self.persist().await
    }

    /// Raise a blocker; returns its number within the item.
    pub async fn add_blocker(&self, item: &ItemId, reason: &str) -> Result<u32, OrchestratorError> {
        let blocker = self.backlog.lock().await.add_blocker(item, reason, Utc::now())?;
        info!(item = %item, blocker, "Blocker raised");
        self.persist().await?;
        Ok(blocker)
    }

    /// Resolve a blocker; returns the item's status afterwards.
    pub async fn resolve_blocker(
        &self,
        item: &ItemId,
        blocker: u32,
    ) -> Result<ItemStatus, OrchestratorError> {
        let status = self
            .backlog
            .lock()
            .await
            .resolve_blocker(item, blocker, Utc::now())?;
        self.persist().await?;
        Ok(status)
    }

    pub async fn archive_item(&self, item: &ItemId) -> Result<(), OrchestratorError> {
        self.backlog.lock().await.archive(item)?;
        info!(item = %item, "Backlog item archived");
        self.persist().await
    }

    /// Mark an item done, then re-track the phase's milestones and recompute KPIs.
    pub async fn record_item_completion(
        &self,
        item: &ItemId,
    ) -> Result<Outcome<ItemCompletion>, OrchestratorError> {
        let done = {
            let mut backlog = self.backlog.lock().await;
            let unmet = backlog.completion_blockers(item)?;
            if !unmet.is_empty() {
                return Ok(Err(NotReady::ItemIncomplete {
                    item: item.clone(),
                    unmet,
                }));
            }
            let mut workers = self.workers.lock().await;
            let mut sprints = self.sprints.lock().await;
            let now = Utc::now();
            let done = backlog.mark_done(item, now)?.clone();
            if let Some(sprint) = sprints.holding(item).map(|s| s.id.clone()) {
                let sprint = sprints.get_mut(&sprint)?;
                planner::record_progress(sprint, item, &backlog, &mut workers, now);
            }
            done
        };
        info!(item = %item, "Item completed");
        self.events
            .emit(OrchestratorEvent::ItemCompleted { item: item.clone() });

        let milestones = self.track_current_milestones().await?;
        let report = self.recompute().await;
        self.persist().await?;
        Ok(Ok(ItemCompletion {
            item: done,
            milestones,
            triggered_alerts: report.triggered,
        }))
    }

    /// Planned → active. Without an id, the planned sprint of the current phase.
    pub async fn start_sprint(
        &self,
        id: Option<SprintId>,
    ) -> Result<Outcome<Sprint>, OrchestratorError> {
        let sprint = {
            let mut backlog = self.backlog.lock().await;
            let mut sprints = self.sprints.lock().await;
            let id = match self.pick_sprint(&sprints, id, SprintStatus::Planned) {
                Ok(id) => id,
                Err(reason) => return Ok(Err(reason)),
            };
            planner::start(&mut sprints, &mut backlog, &id, Utc::now())?
        };
        self.events.emit(OrchestratorEvent::SprintStarted {
            sprint: sprint.id.clone(),
        });
        self.persist().await?;
        Ok(Ok(sprint))
    }

    /// Active → completed; unfinished items return to the backlog.
    pub async fn close_sprint(
        &self,
        id: Option<SprintId>,
    ) -> Result<Outcome<Sprint>, OrchestratorError> {
        let (sprint, remaining) = {
            let mut backlog = self.backlog.lock().await;
            let mut workers = self.workers.lock().await;
            let mut sprints = self.sprints.lock().await;
            let id = match self.pick_sprint(&sprints, id, SprintStatus::Active) {
                Ok(id) => id,
                Err(reason) => return Ok(Err(reason)),
            };
            let remaining = sprints.get(&id).map(|s| s.remaining(&backlog)).unwrap_or(0);
            let sprint = planner::close(&mut sprints, &mut backlog, &mut workers, &id, Utc::now())?;
            (sprint, remaining)
        };
        self.events.emit(OrchestratorEvent::SprintClosed {
            sprint: sprint.id.clone(),
            remaining,
        });
        self.recompute().await;
        self.persist().await?;
        Ok(Ok(sprint))
    }

    /// Cancel a planned sprint, releasing every reservation.
    pub async fn cancel_sprint(
        &self,
        id: Option<SprintId>,
    ) -> Result<Outcome<Sprint>, OrchestratorError> {
        let sprint = {
            let mut backlog = self.backlog.lock().await;
            let mut workers = self.workers.lock().await;
            let mut sprints = self.sprints.lock().await;
            let id = match self.pick_sprint(&sprints, id, SprintStatus::Planned) {
                Ok(id) => id,
                Err(reason) => return Ok(Err(reason)),
            };
            planner::cancel(&mut sprints, &mut backlog, &mut workers, &id, Utc::now())?
        };
        self.events.emit(OrchestratorEvent::SprintCancelled {
            sprint: sprint.id.clone(),
        });
        self.persist().await?;
        Ok(Ok(sprint))
    }

    /// Ideal and actual burndown. Without an id, the newest sprint.
    pub async fn burndown(
        &self,
        id: Option<SprintId>,
    ) -> Result<Outcome<BurndownReport>, OrchestratorError> {
        let sprints = self.sprints.lock().await;
        let sprint = match &id {
            Some(id) => sprints
                .get(id)
                .ok_or_else(|| ValidationError::UnknownSprint(id.clone()))?,
            None => match sprints.all().last() {
                Some(sprint) => sprint,
                None => {
                    return Ok(Err(NotReady::NoSprint {
                        expected: "existing".into(),
                    }));
                }
            },
        };
        Ok(Ok(burndown::report(sprint)))
    }

    fn pick_sprint(
        &self,
        sprints: &SprintBook,
        id: Option<SprintId>,
        status: SprintStatus,
    ) -> Outcome<SprintId> {
        if let Some(id) = id {
            return Ok(id);
        }
        self.phase
            .current()
            .phase()
            .and_then(|phase| sprints.latest_with(phase, status))
            .map(|s| s.id.clone())
            .ok_or_else(|| NotReady::NoSprint {
                expected: status.to_string(),
            })
    }

    pub async fn set_worker_availability(
        &self,
        worker: &WorkerId,
        available: bool,
    ) -> Result<WorkerStatus, OrchestratorError> {
        let status = self.workers.lock().await.set_available(worker, available)?;
        info!(worker = %worker, status = %status, "Worker availability changed");
        self.persist().await?;
        Ok(status)
    }

    /// Record a host-observed fact for the `fact` predicate.
    pub async fn record_fact(&self, name: &str, value: bool) -> Result<(), OrchestratorError> {
        self.facts.lock().await.set_fact(name, value);
        self.persist().await
    }

    /// Record a measurement for `measurement` KPIs and the `measurement_at_least` predicate.
    pub async fn record_measurement(
        &self,
        name: &str,
        value: f64,
    ) -> Result<(), OrchestratorError> {
        if !value.is_finite() {
            return Err(anyhow::anyhow!("Measurement '{}' must be a finite number", name).into());
        }
        self.facts.lock().await.set_measurement(name, value);
        self.persist().await
    }
}
