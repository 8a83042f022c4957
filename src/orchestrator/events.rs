//! Outbound orchestrator events.
//!
//! Events are queued in emission order and drained by the host. A subscriber
//! channel can be attached as well; sends to it never block and a full or
//! closed channel only drops that copy of the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use waypoint_common::{
    AlertId, ApprovalId, Band, Decision, GateId, ItemId, KpiId, MilestoneId, PhaseKind, SprintId,
};

/// Something observable happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    ProjectStarted {
        phase: PhaseKind,
    },
    PhaseTransitioned {
        from: PhaseKind,
        to: PhaseKind,
    },
    PhaseRolledBack {
        from: PhaseKind,
        to: PhaseKind,
    },
    ProjectCompleted,
    TransitionBlocked {
        phase: PhaseKind,
        blocking: Vec<String>,
    },
    SprintPlanned {
        sprint: SprintId,
        items: usize,
        committed: u32,
        capacity: u32,
    },
    SprintStarted {
        sprint: SprintId,
    },
    SprintClosed {
        sprint: SprintId,
        remaining: u32,
    },
    SprintCancelled {
        sprint: SprintId,
    },
    ItemCompleted {
        item: ItemId,
    },
    CorrectiveItemCreated {
        item: ItemId,
        approval: ApprovalId,
    },
    GateEvaluated {
        gate: GateId,
        passed: bool,
    },
    GateRunAbandoned {
        gate: GateId,
    },
    MilestoneCompleted {
        milestone: MilestoneId,
    },
    AlertTriggered {
        alert: AlertId,
        kpi: KpiId,
        band: Band,
    },
    AlertResolved {
        alert: AlertId,
    },
    ApprovalRequested {
        approval: ApprovalId,
    },
    ApprovalGranted {
        approval: ApprovalId,
        gate: GateId,
    },
    WorkflowResumed {
        approval: ApprovalId,
        decision: String,
    },
    DecisionRecorded {
        approval: ApprovalId,
        decision: Decision,
    },
}

/// An event with its emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OrchestratorEvent,
}

#[derive(Debug, Default)]
pub struct EventBus {
    queue: Mutex<VecDeque<EventRecord>>,
    subscriber: Option<mpsc::Sender<EventRecord>>,
}

impl EventBus {
    pub fn new(subscriber: Option<mpsc::Sender<EventRecord>>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            subscriber,
        }
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        let record = EventRecord {
            at: Utc::now(),
            event,
        };
        debug!(event = ?record.event, "Event emitted");
        if let Some(tx) = &self.subscriber
            && let Err(e) = tx.try_send(record.clone())
        {
            debug!("Event subscriber did not take event: {}", e);
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(record);
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<EventRecord> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order_and_empties_queue() {
        let bus = EventBus::default();
        bus.emit(OrchestratorEvent::ProjectStarted {
            phase: PhaseKind::BusinessModel,
        });
        bus.emit(OrchestratorEvent::ProjectCompleted);
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].event, OrchestratorEvent::ProjectCompleted);
        assert!(bus.drain().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_receives_copies() {
        let (tx, mut rx) = mpsc::channel(1);
        let bus = EventBus::new(Some(tx));
        bus.emit(OrchestratorEvent::ProjectCompleted);
        // The channel is full; the queue still gets the event.
        bus.emit(OrchestratorEvent::ProjectCompleted);
        assert_eq!(rx.recv().await.unwrap().event, OrchestratorEvent::ProjectCompleted);
        assert_eq!(bus.drain().len(), 2);
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let record = EventRecord {
            at: Utc::now(),
            event: OrchestratorEvent::PhaseTransitioned {
                from: PhaseKind::Design,
                to: PhaseKind::Development,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "phase_transitioned");
        assert_eq!(json["to"], "development");
    }
}
