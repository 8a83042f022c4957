//! Orchestrator state, construction and the core lifecycle operations.
//!
//! Locks are always taken in this order when more than one is needed:
//! backlog, workers, sprints, approvals, milestones, gates, metrics, facts.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use waypoint_common::{PhaseKind, StakeholderId};

use super::events::{EventBus, EventRecord, OrchestratorEvent};
use super::state::{MemoryStore, PersistedState, STATE_VERSION, StateStore};
use super::status::{BacklogSummary, PendingApproval, StatusSnapshot, WorkflowProgress};
use super::{Outcome, TransitionOutcome};
use crate::approvals::{
    ApprovalBook, LogDelivery, Notification, NotificationDelivery, NotificationKind, Notifier,
    Stakeholder,
};
use crate::backlog::BacklogStore;
use crate::errors::{NotReady, OrchestratorError, ValidationError};
use crate::gates::{GateBook, GateEvaluator, GateRun};
use crate::metrics::MetricsEngine;
use crate::milestones::MilestoneTracker;
use crate::phase::{PhaseContext, PhaseDefinition, PhasePointer, ProjectStage};
use crate::planner::{PlannedSprint, SprintBook, SprintPlanner};
use crate::predicates::{CriterionPredicate, PredicateRegistry};
use crate::snapshot::{FactSheet, StateSnapshot};
use crate::waypoint_config::WaypointToml;
use crate::workers::WorkerRegistry;

/// Alerts shown in a status snapshot.
const RECENT_ALERTS: usize = 10;

/// Builds an [`Orchestrator`] from a validated configuration.
pub struct OrchestratorBuilder {
    config: WaypointToml,
    project: Option<String>,
    store: Arc<dyn StateStore>,
    delivery: Arc<dyn NotificationDelivery>,
    predicates: PredicateRegistry,
    subscriber: Option<mpsc::Sender<EventRecord>>,
}

impl OrchestratorBuilder {
    /// Defaults: in-memory store, log-only delivery, built-in predicates.
    pub fn new(config: WaypointToml) -> Self {
        Self {
            config,
            project: None,
            store: Arc::new(MemoryStore::new()),
            delivery: Arc::new(LogDelivery),
            predicates: PredicateRegistry::with_builtins(),
            subscriber: None,
        }
    }

    /// Overrides `[project] name`.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project = Some(name.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn NotificationDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    /// Register a custom predicate. Registered before validation, so
    /// configuration may reference it.
    pub fn with_predicate(
        mut self,
        name: impl Into<String>,
        predicate: impl CriterionPredicate + 'static,
    ) -> Self {
        self.predicates.register(name, predicate);
        self
    }

    /// Receive a copy of every event. Sends never block; a full channel drops that copy.
    pub fn with_event_sender(mut self, sender: mpsc::Sender<EventRecord>) -> Self {
        self.subscriber = Some(sender);
        self
    }

    /// Start a new project in its first phase. Fails when the store already
    /// holds a project.
    pub async fn start(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate_with(&self.predicates)?;
        if self.store.load().await.map_err(OrchestratorError::Store)?.is_some() {
            return Err(OrchestratorError::AlreadyStarted);
        }
        let orchestrator = self.assemble(None)?;
        let phase = PhaseKind::BusinessModel;
        info!(project = %orchestrator.project, phase = %phase, "Project started");
        orchestrator.events.emit(OrchestratorEvent::ProjectStarted { phase });
        orchestrator.persist().await?;
        Ok(orchestrator)
    }

    /// Restore the project held by the store, exactly where it stopped.
    pub async fn resume(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate_with(&self.predicates)?;
        let state = self
            .store
            .load()
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or(OrchestratorError::NotStarted)?;
        let orchestrator = self.assemble(Some(state))?;
        info!(
            project = %orchestrator.project,
            stage = %orchestrator.phase.current().stage,
            "Project resumed"
        );
        Ok(orchestrator)
    }

    fn assemble(self, restored: Option<PersistedState>) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config;
        let now = Utc::now();
        let sprint_days = config.sprint_days();
        let definitions: Vec<PhaseDefinition> =
            PhaseKind::ALL.iter().map(|&k| config.phase(k)).collect();

        let metrics = MetricsEngine::new(
            config.kpis.clone(),
            config.metrics.settings(),
            config.metrics.alert_recipients.clone(),
        )?;
        let milestones =
            MilestoneTracker::new(config.milestone_definitions(), config.milestones.sla_hours);
        let gates = GateBook::new(config.gate_definitions(), config.gates.history_limit);

        let default_name = self
            .project
            .or_else(|| config.project.name.clone())
            .unwrap_or_else(|| "project".to_string());
        let parts = match restored {
            Some(state) => {
                let mut workers = state.workers;
                workers.merge_config(&config.workers);
                Parts {
                    project: state.project,
                    context: state.phase,
                    backlog: state.backlog,
                    workers,
                    sprints: state.sprints,
                    approvals: state.approvals,
                    milestones: milestones.with_book(state.milestones),
                    gates: gates.with_states(state.gates),
                    metrics: metrics.with_state(state.metrics),
                    facts: state.facts,
                }
            }
            None => Parts {
                project: default_name,
                context: PhaseContext::enter(&definitions[0], sprint_days, now),
                backlog: BacklogStore::default(),
                workers: WorkerRegistry::from_config(&config.workers),
                sprints: SprintBook::default(),
                approvals: ApprovalBook::default(),
                milestones,
                gates,
                metrics,
                facts: FactSheet::default(),
            },
        };

        let predicates = Arc::new(self.predicates);
        let gates = Arc::new(Mutex::new(parts.gates));
        Ok(Orchestrator {
            project: parts.project,
            definitions,
            stakeholders: config.stakeholders.clone(),
            sprint_days,
            corrective_estimate: config.notifications.corrective_estimate,
            phase: PhasePointer::new(parts.context),
            backlog: Mutex::new(parts.backlog),
            workers: Mutex::new(parts.workers),
            sprints: Mutex::new(parts.sprints),
            approvals: Mutex::new(parts.approvals),
            milestones: Mutex::new(parts.milestones),
            evaluator: GateEvaluator::new(gates.clone(), predicates.clone()),
            gates,
            metrics: Mutex::new(parts.metrics),
            facts: Mutex::new(parts.facts),
            planner: SprintPlanner::new(config.commitment_ratio()),
            predicates,
            notifier: Notifier::new(
                self.delivery,
                config.notifications.timeout(),
                config.notifications.default_channel.clone(),
            ),
            store: self.store,
            events: EventBus::new(self.subscriber),
            transition: Mutex::new(()),
            planning: std::sync::Mutex::new(HashSet::new()),
        })
    }
}

struct Parts {
    project: String,
    context: PhaseContext,
    backlog: BacklogStore,
    workers: WorkerRegistry,
    sprints: SprintBook,
    approvals: ApprovalBook,
    milestones: MilestoneTracker,
    gates: GateBook,
    metrics: MetricsEngine,
    facts: FactSheet,
}

/// Owns all mutable project state. `Send + Sync`; share it as `Arc<Orchestrator>`.
pub struct Orchestrator {
    pub(super) project: String,
    /// One entry per phase, in phase order
    pub(super) definitions: Vec<PhaseDefinition>,
    pub(super) stakeholders: Vec<Stakeholder>,
    pub(super) sprint_days: u32,
    pub(super) corrective_estimate: u32,
    pub(super) phase: PhasePointer,
    pub(super) backlog: Mutex<BacklogStore>,
    pub(super) workers: Mutex<WorkerRegistry>,
    pub(super) sprints: Mutex<SprintBook>,
    pub(super) approvals: Mutex<ApprovalBook>,
    pub(super) milestones: Mutex<MilestoneTracker>,
    pub(super) gates: Arc<Mutex<GateBook>>,
    pub(super) metrics: Mutex<MetricsEngine>,
    pub(super) facts: Mutex<FactSheet>,
    pub(super) evaluator: GateEvaluator,
    pub(super) planner: SprintPlanner,
    pub(super) predicates: Arc<PredicateRegistry>,
    pub(super) notifier: Notifier,
    pub(super) store: Arc<dyn StateStore>,
    pub(super) events: EventBus,
    transition: Mutex<()>,
    planning: std::sync::Mutex<HashSet<PhaseKind>>,
}

/// Holds a phase in the planning set until dropped.
struct PlanningSlot<'a> {
    set: &'a std::sync::Mutex<HashSet<PhaseKind>>,
    phase: PhaseKind,
}

impl Drop for PlanningSlot<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.phase);
    }
}

impl Orchestrator {
    pub fn builder(config: WaypointToml) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Start a project with the default store and delivery.
    pub async fn start_project(config: WaypointToml) -> Result<Self, OrchestratorError> {
        OrchestratorBuilder::new(config).start().await
    }

    /// Resume the project held by `store`.
    pub async fn resume(
        config: WaypointToml,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, OrchestratorError> {
        OrchestratorBuilder::new(config).with_store(store).resume().await
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn stage(&self) -> ProjectStage {
        self.phase.current().stage
    }

    pub fn stakeholders(&self) -> &[Stakeholder] {
        &self.stakeholders
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.predicates
    }

    /// Take every queued event, oldest first.
    pub fn drain_events(&self) -> Vec<EventRecord> {
        self.events.drain()
    }

    pub(super) fn definition(&self, phase: PhaseKind) -> &PhaseDefinition {
        &self.definitions[usize::from(phase.order() - 1)]
    }

    pub(super) fn stakeholder(&self, id: &StakeholderId) -> Result<&Stakeholder, ValidationError> {
        self.stakeholders
            .iter()
            .find(|s| &s.id == id)
            .ok_or_else(|| ValidationError::UnknownStakeholder(id.clone()))
    }

    /// Consistent copy of every record, for predicates and formulas.
    pub async fn capture_snapshot(&self) -> StateSnapshot {
        let context = self.phase.current();
        let backlog = self.backlog.lock().await;
        let workers = self.workers.lock().await;
        let sprints = self.sprints.lock().await;
        let approvals = self.approvals.lock().await;
        let milestones = self.milestones.lock().await;
        let gates = self.gates.lock().await;
        let metrics = self.metrics.lock().await;
        let facts = self.facts.lock().await;
        StateSnapshot {
            taken_at: Utc::now(),
            stage: context.stage,
            items: backlog.items().to_vec(),
            workers: workers.workers().to_vec(),
            sprints: sprints.all().to_vec(),
            approvals: approvals.all().to_vec(),
            milestones: milestones.views(),
            gate_runs: gates.all_results(),
            kpis: metrics
                .readings()
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect(),
            facts: facts.clone(),
        }
    }

    /// Everything the store needs to resume this project.
    pub async fn persisted_state(&self) -> PersistedState {
        let context = self.phase.current();
        let backlog = self.backlog.lock().await;
        let workers = self.workers.lock().await;
        let sprints = self.sprints.lock().await;
        let approvals = self.approvals.lock().await;
        let milestones = self.milestones.lock().await;
        let gates = self.gates.lock().await;
        let metrics = self.metrics.lock().await;
        let facts = self.facts.lock().await;
        PersistedState {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            project: self.project.clone(),
            phase: (*context).clone(),
            backlog: backlog.clone(),
            workers: workers.clone(),
            sprints: sprints.clone(),
            approvals: approvals.clone(),
            milestones: milestones.book().clone(),
            gates: gates.states().clone(),
            metrics: metrics.state().clone(),
            facts: facts.clone(),
        }
    }

    pub(super) async fn persist(&self) -> Result<(), OrchestratorError> {
        let state = self.persisted_state().await;
        self.store.save(&state).await.map_err(OrchestratorError::Store)?;
        debug!(project = %self.project, "State persisted");
        Ok(())
    }

    fn claim_planning(&self, phase: PhaseKind) -> Option<PlanningSlot<'_>> {
        let mut set = self.planning.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(phase) {
            return None;
        }
        // The slot's Drop takes this lock again.
        drop(set);
        Some(PlanningSlot {
            set: &self.planning,
            phase,
        })
    }

    /// Plan the next sprint of the current phase.
    pub async fn plan_next_sprint(&self) -> Result<Outcome<PlannedSprint>, OrchestratorError> {
        let context = self.phase.current();
        let Some(phase) = context.phase() else {
            return Ok(Err(NotReady::ProjectCompleted));
        };
        let Some(_slot) = self.claim_planning(phase) else {
            return Ok(Err(NotReady::PlanningInProgress { phase }));
        };

        let planned = {
            let mut backlog = self.backlog.lock().await;
            let mut workers = self.workers.lock().await;
            let mut sprints = self.sprints.lock().await;
            match self.planner.plan(
                phase,
                context.sprint_days,
                &mut backlog,
                &mut workers,
                &mut sprints,
                Utc::now(),
            )? {
                Ok(planned) => planned,
                Err(reason) => {
                    info!(phase = %phase, "Sprint not planned: {}", reason);
                    return Ok(Err(reason));
                }
            }
        };

        self.events.emit(OrchestratorEvent::SprintPlanned {
            sprint: planned.sprint.id.clone(),
            items: planned.sprint.assignments.len(),
            committed: planned.sprint.committed(),
            capacity: planned.sprint.capacity,
        });
        self.persist().await?;
        Ok(Ok(planned))
    }

    /// Attempt to leave the current phase.
    ///
    /// Every gate of the phase is evaluated. On success the next context is
    /// built completely and swapped in with one write; on failure nothing but
    /// the gates' run history changes.
    pub async fn request_phase_transition(&self) -> Result<TransitionOutcome, OrchestratorError> {
        let Ok(_guard) = self.transition.try_lock() else {
            return Ok(TransitionOutcome::Blocked {
                phase: self.phase.current().phase(),
                reason: NotReady::TransitionInProgress,
            });
        };
        let context = self.phase.current();
        let Some(phase) = context.phase() else {
            return Ok(TransitionOutcome::Blocked {
                phase: None,
                reason: NotReady::ProjectCompleted,
            });
        };
        if let Some(sprint) = self.sprints.lock().await.in_flight(phase) {
            return Ok(TransitionOutcome::Blocked {
                phase: Some(phase),
                reason: NotReady::SprintInFlight {
                    sprint: sprint.id.clone(),
                },
            });
        }

        let snapshot = self.capture_snapshot().await;
        let runs = join_all(
            context
                .gates
                .iter()
                .map(|gate| self.evaluator.evaluate(gate, &snapshot)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<GateRun>, ValidationError>>()?;
        for run in &runs {
            self.emit_gate_run(run);
        }

        let blocking: Vec<String> = runs.iter().flat_map(GateRun::blocking).collect();
        if !blocking.is_empty() {
            info!(phase = %phase, blocking = blocking.len(), "Phase transition blocked");
            self.events.emit(OrchestratorEvent::TransitionBlocked {
                phase,
                blocking: blocking.clone(),
            });
            self.persist().await?;
            return Ok(TransitionOutcome::Blocked {
                phase: Some(phase),
                reason: NotReady::GateBlocked { blocking },
            });
        }

        let now = Utc::now();
        let next = phase.next();
        let staged = context.advance(next.map(|p| self.definition(p)), self.sprint_days, now);
        let to = staged.stage;
        self.phase.swap(staged);

        let notification = match next {
            Some(next) => {
                info!(from = %phase, to = %next, "Phase transitioned");
                self.events.emit(OrchestratorEvent::PhaseTransitioned { from: phase, to: next });
                Notification::new(
                    NotificationKind::PhaseTransitioned,
                    format!("{}: entered {}", self.project, self.definition(next).display_name()),
                    format!("{} passed its gates; {} has started.", phase.label(), next.label()),
                )
            }
            None => {
                info!(from = %phase, "Project completed");
                self.events.emit(OrchestratorEvent::ProjectCompleted);
                Notification::new(
                    NotificationKind::ProjectCompleted,
                    format!("{}: completed", self.project),
                    format!("{} passed its gates; the project is complete.", phase.label()),
                )
            }
        };
        self.persist().await?;
        self.notifier.broadcast(&self.stakeholders, &notification).await;

        let gates = runs
            .into_iter()
            .filter_map(|run| match run {
                GateRun::Evaluated(result) => Some(result),
                GateRun::Abandoned { .. } => None,
            })
            .collect();
        Ok(TransitionOutcome::Advanced {
            from: phase,
            to,
            gates,
        })
    }

    pub(super) fn emit_gate_run(&self, run: &GateRun) {
        match run {
            GateRun::Evaluated(result) => self.events.emit(OrchestratorEvent::GateEvaluated {
                gate: result.gate.clone(),
                passed: result.passed,
            }),
            GateRun::Abandoned { gate, .. } => {
                self.events
                    .emit(OrchestratorEvent::GateRunAbandoned { gate: gate.clone() })
            }
        }
    }

    /// Move back one phase. Its context is re-entered fresh and its
    /// milestones and gate statuses are reset.
    pub async fn rollback_phase(&self) -> Result<Outcome<PhaseKind>, OrchestratorError> {
        let Ok(_guard) = self.transition.try_lock() else {
            return Ok(Err(NotReady::TransitionInProgress));
        };
        let context = self.phase.current();
        let Some(phase) = context.phase() else {
            return Ok(Err(NotReady::ProjectCompleted));
        };
        let Some(previous) = phase.previous() else {
            return Ok(Err(NotReady::AtFirstPhase));
        };
        if let Some(sprint) = self.sprints.lock().await.in_flight(phase) {
            return Ok(Err(NotReady::SprintInFlight {
                sprint: sprint.id.clone(),
            }));
        }

        let staged = context.rollback(self.definition(previous), self.sprint_days, Utc::now());
        self.milestones.lock().await.reset_phase(previous);
        self.gates.lock().await.reset_phase(previous);
        self.phase.swap(staged);

        warn!(from = %phase, to = %previous, "Phase rolled back");
        self.events.emit(OrchestratorEvent::PhaseRolledBack {
            from: phase,
            to: previous,
        });
        self.persist().await?;
        Ok(Ok(previous))
    }

    /// Read-only view for hosts. Taking one changes nothing.
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let context = self.phase.current();
        let phase = context.phase();
        let backlog = self.backlog.lock().await;
        let workers = self.workers.lock().await;
        let sprints = self.sprints.lock().await;
        let approvals = self.approvals.lock().await;
        let milestones = self.milestones.lock().await;
        let metrics = self.metrics.lock().await;

        let workflows = match phase {
            Some(phase) => self
                .definition(phase)
                .workflows
                .iter()
                .map(|w| {
                    let points = backlog.workflow_points(&w.id);
                    WorkflowProgress {
                        id: w.id.clone(),
                        name: w.name.clone(),
                        points,
                        percent: points.percent(),
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let mut summary = BacklogSummary::default();
        for item in backlog
            .active_items()
            .filter(|i| phase.is_none_or(|p| i.phase == p))
        {
            summary.count(item.status);
            summary.points.total += item.estimate;
            if item.is_done() {
                summary.points.done += item.estimate;
            }
        }

        StatusSnapshot {
            project: self.project.clone(),
            stage: context.stage,
            phase_entered_at: context.entered_at,
            phase_history: context.history.clone(),
            next_phase: phase.and_then(PhaseKind::next),
            workflows,
            backlog: summary,
            sprint: phase.and_then(|p| sprints.in_flight(p).cloned()),
            workers: workers.workers().to_vec(),
            milestones: milestones
                .views()
                .into_iter()
                .filter(|m| phase.is_none_or(|p| m.phase == p))
                .collect(),
            kpis: metrics.readings(),
            recent_alerts: metrics
                .alerts()
                .recent(RECENT_ALERTS)
                .into_iter()
                .cloned()
                .collect(),
            pending_approvals: approvals
                .pending()
                .map(|a| PendingApproval {
                    id: a.id.clone(),
                    subject: a.subject.clone(),
                    approval_type: a.approval_type.clone(),
                    requested_from: a.requested_from.to_string(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("project", &self.project)
            .field("stage", &self.phase.current().stage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::NewItem;
    use crate::gates::GateDefinition;
    use crate::predicates::Criterion;
    use crate::workers::WorkerConfig;

    fn config() -> WaypointToml {
        let mut config = WaypointToml::default();
        config.workers = vec![WorkerConfig {
            id: "w1".into(),
            name: None,
            capacity: 10,
            unavailable: false,
        }];
        let mut phase = PhaseDefinition::empty(PhaseKind::BusinessModel);
        phase
            .gates
            .push(GateDefinition::new("exit").with_check(Criterion::new("validated", "fact")));
        config.phases.push(phase);
        config
    }

    #[tokio::test]
    async fn test_start_twice_on_same_store_fails() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        Orchestrator::builder(config())
            .with_store(store.clone())
            .start()
            .await
            .unwrap();
        let err = Orchestrator::builder(config())
            .with_store(store)
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_resume_without_state_fails() {
        let err = Orchestrator::resume(config(), Arc::new(MemoryStore::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotStarted));
    }

    #[tokio::test]
    async fn test_concurrent_transition_is_refused() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        let _held = orchestrator.transition.try_lock().unwrap();
        let outcome = orchestrator.request_phase_transition().await.unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Blocked {
                phase: Some(PhaseKind::BusinessModel),
                reason: NotReady::TransitionInProgress,
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_planning_is_refused() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        let _slot = orchestrator.claim_planning(PhaseKind::BusinessModel).unwrap();
        let outcome = orchestrator.plan_next_sprint().await.unwrap();
        assert_eq!(
            outcome.unwrap_err(),
            NotReady::PlanningInProgress {
                phase: PhaseKind::BusinessModel
            }
        );
    }

    #[tokio::test]
    async fn test_refused_claim_keeps_first_slot() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        let first = orchestrator.claim_planning(PhaseKind::BusinessModel).unwrap();
        assert!(orchestrator.claim_planning(PhaseKind::BusinessModel).is_none());
        assert!(orchestrator.claim_planning(PhaseKind::BusinessModel).is_none());
        drop(first);
        assert!(orchestrator.claim_planning(PhaseKind::BusinessModel).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_plan_calls_refuse_the_second() {
        let orchestrator = Arc::new(Orchestrator::start_project(config()).await.unwrap());
        orchestrator
            .add_backlog_item(
                NewItem::new("Size the market", 3, PhaseKind::BusinessModel)
                    .with_criterion("estimate written"),
            )
            .await
            .unwrap();

        // Hold the backlog so the first call claims its slot and then waits.
        let backlog = orchestrator.backlog.lock().await;
        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.plan_next_sprint().await }
        });
        while !orchestrator
            .planning
            .lock()
            .unwrap()
            .contains(&PhaseKind::BusinessModel)
        {
            tokio::task::yield_now().await;
        }

        let second = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            orchestrator.plan_next_sprint(),
        )
        .await
        .expect("second planning call must not block");
        assert_eq!(
            second.unwrap().unwrap_err(),
            NotReady::PlanningInProgress {
                phase: PhaseKind::BusinessModel
            }
        );

        drop(backlog);
        let planned = first.await.unwrap().unwrap().unwrap();
        assert_eq!(planned.sprint.committed(), 3);
    }

    #[tokio::test]
    async fn test_planning_slot_released_after_plan() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        orchestrator
            .add_backlog_item(
                NewItem::new("Interview customers", 5, PhaseKind::BusinessModel)
                    .with_criterion("ten interviews"),
            )
            .await
            .unwrap();
        let planned = orchestrator.plan_next_sprint().await.unwrap().unwrap();
        assert_eq!(planned.sprint.committed(), 5);
        // The slot is free again; the refusal now comes from the in-flight sprint.
        let again = orchestrator.plan_next_sprint().await.unwrap().unwrap_err();
        assert!(matches!(again, NotReady::SprintInFlight { .. }));
    }

    #[tokio::test]
    async fn test_transition_blocked_by_in_flight_sprint() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        orchestrator.record_fact("validated", true).await.unwrap();
        orchestrator.plan_next_sprint().await.unwrap().unwrap();
        let outcome = orchestrator.request_phase_transition().await.unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Blocked {
                reason: NotReady::SprintInFlight { .. },
                ..
            }
        ));
        assert_eq!(orchestrator.stage(), ProjectStage::Active(PhaseKind::BusinessModel));
    }

    #[tokio::test]
    async fn test_transition_advances_and_rollback_returns() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        orchestrator.record_fact("validated", true).await.unwrap();
        let outcome = orchestrator.request_phase_transition().await.unwrap();
        assert!(outcome.is_advanced());
        assert_eq!(orchestrator.stage(), ProjectStage::Active(PhaseKind::Architecture));

        let back = orchestrator.rollback_phase().await.unwrap().unwrap();
        assert_eq!(back, PhaseKind::BusinessModel);
        assert_eq!(
            orchestrator.rollback_phase().await.unwrap().unwrap_err(),
            NotReady::AtFirstPhase
        );
        let events: Vec<OrchestratorEvent> =
            orchestrator.drain_events().into_iter().map(|r| r.event).collect();
        assert!(events.contains(&OrchestratorEvent::PhaseRolledBack {
            from: PhaseKind::Architecture,
            to: PhaseKind::BusinessModel,
        }));
    }

    #[tokio::test]
    async fn test_unconfigured_phases_exit_freely_to_completion() {
        let orchestrator = Orchestrator::start_project(config()).await.unwrap();
        orchestrator.record_fact("validated", true).await.unwrap();
        for _ in 0..4 {
            assert!(orchestrator.request_phase_transition().await.unwrap().is_advanced());
        }
        assert_eq!(orchestrator.stage(), ProjectStage::Completed);
        let outcome = orchestrator.request_phase_transition().await.unwrap();
        assert_eq!(outcome.blocking(), vec![NotReady::ProjectCompleted.to_string()]);
        assert!(
            orchestrator
                .drain_events()
                .iter()
                .any(|r| r.event == OrchestratorEvent::ProjectCompleted)
        );
    }
}
