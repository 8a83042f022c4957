//! Concurrent gate evaluation.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use waypoint_common::{Decision, GateId};

use super::{GateBook, GateRun, RequiredApproval};
use crate::approvals::{Approval, ApprovalSubject};
use crate::errors::ValidationError;
use crate::predicates::PredicateRegistry;
use crate::snapshot::StateSnapshot;

/// Evaluates gates against state snapshots.
///
/// The gate book lock is held only to start and to finish a run; the checks
/// themselves run concurrently without it, so a gate can be reconfigured
/// mid-run (the run is then abandoned).
#[derive(Clone)]
pub struct GateEvaluator {
    book: Arc<Mutex<GateBook>>,
    predicates: Arc<PredicateRegistry>,
}

impl GateEvaluator {
    pub fn new(book: Arc<Mutex<GateBook>>, predicates: Arc<PredicateRegistry>) -> Self {
        Self { book, predicates }
    }

    pub async fn evaluate(
        &self,
        gate: &GateId,
        snapshot: &StateSnapshot,
    ) -> Result<GateRun, ValidationError> {
        let ticket = self.book.lock().await.begin(gate)?;

        let checks = join_all(ticket.definition.checks.iter().map(|check| async move {
            let held = match self.predicates.evaluate(check, snapshot).await {
                Ok(held) => held,
                Err(e) => {
                    warn!(
                        gate = %gate,
                        check = %check.id,
                        "Gate check errored, counting as failed: {:#}",
                        e
                    );
                    false
                }
            };
            (check.id.clone(), held)
        }))
        .await;
        let failed_automated: Vec<String> = checks
            .into_iter()
            .filter(|(_, held)| !held)
            .map(|(id, _)| id)
            .collect();

        let pending_approvals: Vec<String> = ticket
            .definition
            .approvals
            .iter()
            .filter_map(|required| approval_gap(gate, required, &snapshot.approvals))
            .collect();

        let run = self
            .book
            .lock()
            .await
            .finish(&ticket, failed_automated, pending_approvals, Utc::now());
        match &run {
            GateRun::Evaluated(result) => {
                info!(gate = %gate, passed = result.passed, "Gate evaluated");
                debug!(gate = %gate, blocking = ?result.blocking(), "Gate details");
            }
            GateRun::Abandoned {
                started_revision,
                current_revision,
                ..
            } => warn!(
                gate = %gate,
                started_revision,
                current_revision,
                "Gate reconfigured during evaluation; run abandoned"
            ),
        }
        Ok(run)
    }
}

/// Why a required approval is not yet granted, or `None` when it is.
fn approval_gap(
    gate: &GateId,
    required: &RequiredApproval,
    approvals: &[Approval],
) -> Option<String> {
    let latest = approvals
        .iter()
        .filter(|a| {
            matches!(&a.subject, ApprovalSubject::Gate(g) if g == gate)
                && a.approval_type == required.approval_type
        })
        .max_by_key(|a| a.sequence);
    match latest {
        None => Some(format!(
            "approval '{}' from {} not requested",
            required.approval_type, required.stakeholder
        )),
        Some(approval) if approval.decision == Decision::Approved => None,
        Some(approval) => Some(format!(
            "approval {} ('{}') from {} is {}",
            approval.id, required.approval_type, approval.requested_from, approval.decision
        )),
    }
}
