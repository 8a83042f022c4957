//! End-to-end tests of the orchestrator API.

use std::sync::Arc;
use tempfile::TempDir;

use waypoint::approvals::{ApprovalSubject, Stakeholder};
use waypoint::backlog::NewItem;
use waypoint::errors::{NotReady, OrchestratorError};
use waypoint::gates::{GateDefinition, GateRun};
use waypoint::metrics::{Formula, KpiDefinition, Thresholds};
use waypoint::orchestrator::{
    JsonFileStore, MemoryStore, Orchestrator, OrchestratorEvent, StateStore, TransitionOutcome,
};
use waypoint::phase::{PhaseDefinition, ProjectStage};
use waypoint::predicates::Criterion;
use waypoint::waypoint_config::WaypointToml;
use waypoint::workers::WorkerConfig;
use waypoint::{Decision, GateId, PhaseKind, Priority, WorkerId};

fn worker(id: &str, capacity: u32) -> WorkerConfig {
    WorkerConfig {
        id: id.into(),
        name: None,
        capacity,
        unavailable: false,
    }
}

fn base_config() -> WaypointToml {
    let mut config = WaypointToml::default();
    config.project.name = Some("acme".into());
    config.planner.commitment_ratio = 1.0;
    config.stakeholders = vec![
        Stakeholder::new("pm", "Product Manager").with_authority("*"),
        Stakeholder::new("cto", "CTO").with_authority("architecture"),
    ];
    config
}

fn gated_config() -> WaypointToml {
    let mut config = base_config();
    config.workers = vec![worker("w1", 10)];
    let mut phase = PhaseDefinition::empty(PhaseKind::BusinessModel);
    phase.gates.push(
        GateDefinition::new("market-fit")
            .with_check(Criterion::new("customers_interviewed", "fact"))
            .with_check(Criterion::new("pricing_validated", "fact"))
            .with_approval("architecture", "cto"),
    );
    config.phases.push(phase);
    config
}

fn item(title: &str, estimate: u32, priority: Priority) -> NewItem {
    NewItem::new(title, estimate, PhaseKind::BusinessModel)
        .with_priority(priority)
        .with_criterion(format!("{} accepted", title))
}

#[tokio::test]
async fn test_planner_skips_items_that_no_longer_fit() {
    let mut config = base_config();
    config.workers = vec![worker("w1", 13), worker("w2", 7)];
    let orchestrator = Orchestrator::start_project(config).await.unwrap();

    let big = orchestrator
        .add_backlog_item(item("Market sizing", 13, Priority::Critical))
        .await
        .unwrap();
    let small = orchestrator
        .add_backlog_item(item("Competitor scan", 5, Priority::High))
        .await
        .unwrap();
    let medium = orchestrator
        .add_backlog_item(item("Pricing survey", 8, Priority::Medium))
        .await
        .unwrap();

    let planned = orchestrator.plan_next_sprint().await.unwrap().unwrap();
    assert_eq!(planned.sprint.capacity, 20);
    let items: Vec<_> = planned.sprint.assignments.iter().map(|a| a.item.clone()).collect();
    assert_eq!(items, vec![big, small]);
    assert_eq!(planned.sprint.committed(), 18);
    assert_eq!(planned.skipped, vec![medium]);
}

#[tokio::test]
async fn test_worker_filled_to_capacity_takes_nothing_more() {
    let mut config = base_config();
    config.workers = vec![worker("solo", 8)];
    let orchestrator = Orchestrator::start_project(config).await.unwrap();
    orchestrator
        .add_backlog_item(item("Business model canvas", 8, Priority::High))
        .await
        .unwrap();
    let extra = orchestrator
        .add_backlog_item(item("Glossary", 1, Priority::Low))
        .await
        .unwrap();

    let planned = orchestrator.plan_next_sprint().await.unwrap().unwrap();
    assert_eq!(planned.sprint.committed(), 8);
    assert_eq!(planned.skipped, vec![extra]);

    let status = orchestrator.status_snapshot().await;
    let solo = status
        .workers
        .iter()
        .find(|w| w.id == WorkerId::from("solo"))
        .unwrap();
    assert_eq!(solo.workload, 8);
    assert!(status.workers.iter().all(|w| w.workload <= w.capacity));
}

#[tokio::test]
async fn test_no_ready_capacity_is_not_ready() {
    let mut config = base_config();
    config.workers = vec![worker("w1", 5)];
    let orchestrator = Orchestrator::start_project(config).await.unwrap();
    orchestrator
        .set_worker_availability(&WorkerId::from("w1"), false)
        .await
        .unwrap();
    let outcome = orchestrator.plan_next_sprint().await.unwrap();
    assert_eq!(outcome.unwrap_err(), NotReady::InsufficientCapacity);
}

#[tokio::test]
async fn test_band_sequence_raises_and_resolves_one_alert() {
    let mut config = base_config();
    let mut latency = KpiDefinition::new(
        "error-rate",
        Formula::Measurement {
            name: "error_rate".into(),
        },
        Thresholds {
            excellent: 1.0,
            good: 2.0,
            warning: 5.0,
        },
    )
    .lower_is_better();
    latency.recipients = vec!["pm".into()];
    config.kpis.push(latency);
    let orchestrator = Orchestrator::start_project(config).await.unwrap();

    // good, warning, warning, warning, good
    let mut triggered = 0;
    let mut resolved = 0;
    for value in [1.5, 3.0, 4.0, 3.5, 1.8] {
        orchestrator.record_measurement("error_rate", value).await.unwrap();
        let report = orchestrator.recompute_kpis().await.unwrap();
        triggered += report.triggered.len();
        resolved += report.resolved.len();
    }
    assert_eq!(triggered, 1);
    assert_eq!(resolved, 1);

    let events: Vec<OrchestratorEvent> =
        orchestrator.drain_events().into_iter().map(|r| r.event).collect();
    let alerts = events
        .iter()
        .filter(|e| matches!(e, OrchestratorEvent::AlertTriggered { .. }))
        .count();
    assert_eq!(alerts, 1);
}

#[tokio::test]
async fn test_gate_passes_once_required_approval_is_granted() {
    let orchestrator = Orchestrator::start_project(gated_config()).await.unwrap();
    let gate = GateId::from("market-fit");
    orchestrator.record_fact("customers_interviewed", true).await.unwrap();
    orchestrator.record_fact("pricing_validated", true).await.unwrap();
    let approval = orchestrator
        .request_approval(ApprovalSubject::Gate(gate.clone()), "architecture", &"cto".into())
        .await
        .unwrap();

    let GateRun::Evaluated(first) = orchestrator.evaluate_gate(&gate).await.unwrap() else {
        panic!("gate run abandoned");
    };
    assert!(!first.passed);
    assert!(first.failed_automated.is_empty());
    assert_eq!(first.pending_approvals.len(), 1);

    // Unchanged state gives the same outcome.
    let GateRun::Evaluated(again) = orchestrator.evaluate_gate(&gate).await.unwrap() else {
        panic!("gate run abandoned");
    };
    assert!(first.same_outcome(&again));

    orchestrator
        .record_decision(&approval, Decision::Approved, None, &"cto".into())
        .await
        .unwrap();
    let run = orchestrator.evaluate_gate(&gate).await.unwrap();
    assert!(run.passed());
}

#[tokio::test]
async fn test_failed_transition_leaves_status_unchanged() {
    let orchestrator = Orchestrator::start_project(gated_config()).await.unwrap();
    orchestrator
        .add_backlog_item(item("Interview customers", 3, Priority::High))
        .await
        .unwrap();
    orchestrator.record_fact("customers_interviewed", true).await.unwrap();

    let before = orchestrator.status_snapshot().await;
    let outcome = orchestrator.request_phase_transition().await.unwrap();
    let after = orchestrator.status_snapshot().await;

    assert!(!outcome.is_advanced());
    let blocking = outcome.blocking();
    assert!(blocking.iter().any(|b| b.contains("pricing_validated")));
    assert!(blocking.iter().any(|b| b.contains("architecture")));
    assert_eq!(before, after);
    assert_eq!(orchestrator.stage(), ProjectStage::Active(PhaseKind::BusinessModel));
}

#[tokio::test]
async fn test_transition_advances_when_gate_passes() {
    let orchestrator = Orchestrator::start_project(gated_config()).await.unwrap();
    orchestrator.record_fact("customers_interviewed", true).await.unwrap();
    orchestrator.record_fact("pricing_validated", true).await.unwrap();
    let gate = GateId::from("market-fit");
    let requested = orchestrator.request_gate_approvals(&gate).await.unwrap();
    assert_eq!(requested.len(), 1);
    orchestrator
        .record_decision(&requested[0], Decision::Approved, Some("ship it".into()), &"pm".into())
        .await
        .unwrap();

    match orchestrator.request_phase_transition().await.unwrap() {
        TransitionOutcome::Advanced { from, to, gates } => {
            assert_eq!(from, PhaseKind::BusinessModel);
            assert_eq!(to, ProjectStage::Active(PhaseKind::Architecture));
            assert_eq!(gates.len(), 1);
        }
        blocked => panic!("expected an advance, got {:?}", blocked),
    }
    let status = orchestrator.status_snapshot().await;
    assert_eq!(status.phase_history.len(), 1);
    assert_eq!(status.phase_history[0].phase, PhaseKind::BusinessModel);
}

#[tokio::test]
async fn test_item_without_criteria_is_rejected() {
    let orchestrator = Orchestrator::start_project(gated_config()).await.unwrap();
    let err = orchestrator
        .add_backlog_item(NewItem::new("Vague idea", 3, PhaseKind::BusinessModel))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(orchestrator.status_snapshot().await.backlog.backlog, 0);
}

#[tokio::test]
async fn test_completing_item_releases_workload() {
    let orchestrator = Orchestrator::start_project(gated_config()).await.unwrap();
    let id = orchestrator
        .add_backlog_item(item("Interview customers", 4, Priority::High))
        .await
        .unwrap();
    orchestrator.plan_next_sprint().await.unwrap().unwrap();
    orchestrator.start_sprint(None).await.unwrap().unwrap();

    let refused = orchestrator.record_item_completion(&id).await.unwrap();
    assert!(matches!(refused, Err(NotReady::ItemIncomplete { .. })));

    orchestrator.satisfy_acceptance_criterion(&id, 0).await.unwrap();
    let completion = orchestrator.record_item_completion(&id).await.unwrap().unwrap();
    assert!(completion.item.is_done());

    let status = orchestrator.status_snapshot().await;
    assert_eq!(status.workers[0].workload, 0);
    assert_eq!(status.backlog.done, 1);
}

#[tokio::test]
async fn test_state_round_trips_through_json_store() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(dir.path().join("state.json")));

    let orchestrator = Orchestrator::builder(gated_config())
        .with_store(store.clone())
        .start()
        .await
        .unwrap();
    let id = orchestrator
        .add_backlog_item(item("Interview customers", 4, Priority::High))
        .await
        .unwrap();
    orchestrator.add_blocker(&id, "No recruiting budget").await.unwrap();
    orchestrator
        .add_backlog_item(item("Pricing survey", 3, Priority::Medium))
        .await
        .unwrap();
    orchestrator.plan_next_sprint().await.unwrap().unwrap();
    orchestrator.record_fact("customers_interviewed", true).await.unwrap();
    orchestrator
        .request_approval(
            ApprovalSubject::Gate(GateId::from("market-fit")),
            "architecture",
            &"cto".into(),
        )
        .await
        .unwrap();
    orchestrator.recompute_kpis().await.unwrap();
    let before = orchestrator.status_snapshot().await;
    drop(orchestrator);

    let resumed = Orchestrator::resume(gated_config(), store).await.unwrap();
    assert_eq!(resumed.status_snapshot().await, before);
}

#[tokio::test]
async fn test_reconfigured_gate_is_restored_on_resume() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
    let gate = GateId::from("market-fit");

    let orchestrator = Orchestrator::builder(gated_config())
        .with_store(store.clone())
        .start()
        .await
        .unwrap();
    orchestrator.record_fact("customers_interviewed", true).await.unwrap();
    let revision = orchestrator
        .reconfigure_gate(
            GateDefinition::new("market-fit")
                .with_check(Criterion::new("customers_interviewed", "fact")),
        )
        .await
        .unwrap();
    assert_eq!(revision, 1);
    assert!(orchestrator.evaluate_gate(&gate).await.unwrap().passed());
    drop(orchestrator);

    let resumed = Orchestrator::resume(gated_config(), store).await.unwrap();
    let run = resumed.evaluate_gate(&gate).await.unwrap();
    assert!(run.passed(), "blocked by {:?}", run.blocking());
    let history = resumed.gate_history(&gate).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_independent_projects_do_not_share_state() {
    let first = Orchestrator::builder(gated_config())
        .with_store(Arc::new(MemoryStore::new()))
        .start()
        .await
        .unwrap();
    let second = Orchestrator::builder(gated_config())
        .with_store(Arc::new(MemoryStore::new()))
        .start()
        .await
        .unwrap();
    first
        .add_backlog_item(item("Interview customers", 4, Priority::High))
        .await
        .unwrap();
    assert_eq!(first.status_snapshot().await.backlog.backlog, 1);
    assert_eq!(second.status_snapshot().await.backlog.backlog, 0);
}
