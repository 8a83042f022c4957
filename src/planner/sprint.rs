//! Sprint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use waypoint_common::{ItemId, PhaseKind, SprintId, WorkerId};

use super::burndown::BurndownPoint;
use crate::backlog::BacklogStore;
use crate::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Planned,
    Active,
    Completed,
    Cancelled,
}

impl SprintStatus {
    /// Planned or active.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SprintStatus::Planned | SprintStatus::Active)
    }
}

impl fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SprintStatus::Planned => write!(f, "planned"),
            SprintStatus::Active => write!(f, "active"),
            SprintStatus::Completed => write!(f, "completed"),
            SprintStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintAssignment {
    pub item: ItemId,
    pub worker: WorkerId,
    pub estimate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: SprintId,
    pub number: u32,
    pub phase: PhaseKind,
    pub status: SprintStatus,
    /// Points the sprint may commit to
    pub capacity: u32,
    pub goal: String,
    pub assignments: Vec<SprintAssignment>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub burndown: Vec<BurndownPoint>,
}

impl Sprint {
    /// Sum of assigned estimates.
    pub fn committed(&self) -> u32 {
        self.assignments.iter().map(|a| a.estimate).sum()
    }

    /// Points not yet done.
    pub fn remaining(&self, backlog: &BacklogStore) -> u32 {
        self.assignments
            .iter()
            .filter(|a| !backlog.get(&a.item).is_some_and(|i| i.is_done()))
            .map(|a| a.estimate)
            .sum()
    }

    pub fn assignment(&self, item: &ItemId) -> Option<&SprintAssignment> {
        self.assignments.iter().find(|a| &a.item == item)
    }

    pub(crate) fn expect_status(
        &self,
        expected: SprintStatus,
        label: &'static str,
    ) -> Result<(), ValidationError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ValidationError::SprintState {
                sprint: self.id.clone(),
                status: self.status.to_string(),
                expected: label,
            })
        }
    }
}

/// Every sprint ever planned, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SprintBook {
    sprints: Vec<Sprint>,
    next_number: u32,
}

impl SprintBook {
    pub fn all(&self) -> &[Sprint] {
        &self.sprints
    }

    /// Allocate the next sprint number and id.
    pub fn next_id(&mut self) -> (u32, SprintId) {
        self.next_number += 1;
        (
            self.next_number,
            SprintId::new(format!("SPRINT-{}", self.next_number)),
        )
    }

    pub fn push(&mut self, sprint: Sprint) {
        self.sprints.push(sprint);
    }

    pub fn get(&self, id: &SprintId) -> Option<&Sprint> {
        self.sprints.iter().find(|s| &s.id == id)
    }

    pub fn get_mut(&mut self, id: &SprintId) -> Result<&mut Sprint, ValidationError> {
        self.sprints
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| ValidationError::UnknownSprint(id.clone()))
    }

    /// The planned or active sprint of a phase, if any.
    pub fn in_flight(&self, phase: PhaseKind) -> Option<&Sprint> {
        self.sprints
            .iter()
            .find(|s| s.phase == phase && s.status.is_in_flight())
    }

    pub fn active(&self) -> Option<&Sprint> {
        self.sprints.iter().find(|s| s.status == SprintStatus::Active)
    }

    /// Most recent sprint of a phase with the given status.
    pub fn latest_with(&self, phase: PhaseKind, status: SprintStatus) -> Option<&Sprint> {
        self.sprints
            .iter()
            .rev()
            .find(|s| s.phase == phase && s.status == status)
    }

    /// Sprint holding the item while it is planned or active.
    pub fn holding(&self, item: &ItemId) -> Option<&Sprint> {
        self.sprints
            .iter()
            .find(|s| s.status.is_in_flight() && s.assignment(item).is_some())
    }
}
