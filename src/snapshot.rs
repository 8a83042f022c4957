//! Immutable state snapshots handed to predicates and KPI formulas.
//!
//! A snapshot is a consistent copy of the orchestrator's records taken at one
//! instant. Checks and formulas only ever read it, which lets them run
//! concurrently without holding any orchestrator lock.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use waypoint_common::{KpiId, MilestoneId, PhaseKind};

use crate::approvals::Approval;
use crate::backlog::BacklogItem;
use crate::gates::GateResult;
use crate::metrics::KpiReading;
use crate::milestones::MilestoneStatus;
use crate::phase::ProjectStage;
use crate::planner::Sprint;
use crate::workers::Worker;

/// Host-recorded facts and measurements that feed predicates and KPIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactSheet {
    #[serde(default)]
    facts: BTreeMap<String, bool>,
    #[serde(default)]
    measurements: BTreeMap<String, f64>,
}

impl FactSheet {
    pub fn set_fact(&mut self, name: impl Into<String>, value: bool) {
        self.facts.insert(name.into(), value);
    }

    pub fn fact(&self, name: &str) -> Option<bool> {
        self.facts.get(name).copied()
    }

    pub fn set_measurement(&mut self, name: impl Into<String>, value: f64) {
        self.measurements.insert(name.into(), value);
    }

    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }

    pub fn facts(&self) -> &BTreeMap<String, bool> {
        &self.facts
    }

    pub fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }
}

/// Read-only milestone summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneView {
    pub id: MilestoneId,
    pub name: String,
    pub phase: PhaseKind,
    pub status: MilestoneStatus,
    /// 0..=100
    pub completion: u32,
    pub target_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub stage: ProjectStage,
    pub items: Vec<BacklogItem>,
    pub workers: Vec<Worker>,
    pub sprints: Vec<Sprint>,
    pub approvals: Vec<Approval>,
    pub milestones: Vec<MilestoneView>,
    pub gate_runs: Vec<GateResult>,
    pub kpis: BTreeMap<KpiId, KpiReading>,
    pub facts: FactSheet,
}

impl StateSnapshot {
    /// A snapshot with no records.
    pub fn empty(stage: ProjectStage, taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            stage,
            items: Vec::new(),
            workers: Vec::new(),
            sprints: Vec::new(),
            approvals: Vec::new(),
            milestones: Vec::new(),
            gate_runs: Vec::new(),
            kpis: BTreeMap::new(),
            facts: FactSheet::default(),
        }
    }

    pub fn current_phase(&self) -> Option<PhaseKind> {
        self.stage.phase()
    }

    /// Active (unarchived) items tagged with `phase`.
    pub fn items_in(&self, phase: PhaseKind) -> impl Iterator<Item = &BacklogItem> {
        self.items
            .iter()
            .filter(move |i| i.is_active() && i.phase == phase)
    }

    /// Items in the current phase, or every active item once the project is completed.
    pub fn scoped_items(&self) -> Vec<&BacklogItem> {
        match self.current_phase() {
            Some(phase) => self.items_in(phase).collect(),
            None => self.items.iter().filter(|i| i.is_active()).collect(),
        }
    }

    pub fn milestone(&self, id: &str) -> Option<&MilestoneView> {
        self.milestones.iter().find(|m| m.id.as_str() == id)
    }

    pub fn kpi(&self, id: &str) -> Option<&KpiReading> {
        self.kpis.get(&KpiId::from(id))
    }
}
