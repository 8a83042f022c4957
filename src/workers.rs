//! Worker registry.
//!
//! Workers are the agents that execute backlog items. Each has a capacity in
//! points per sprint; [`WorkerRegistry::reserve`] is the only way workload grows,
//! so `workload <= capacity` holds for every worker at all times.

use serde::{Deserialize, Serialize};
use std::fmt;
use waypoint_common::WorkerId;

use crate::errors::{AssignmentRejected, ValidationError};

/// Worker entry in `waypoint.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: WorkerId,
    #[serde(default)]
    pub name: Option<String>,
    /// Points per sprint
    pub capacity: u32,
    /// Start out unavailable
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ready,
    Assigned,
    Unavailable,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Ready => write!(f, "ready"),
            WorkerStatus::Assigned => write!(f, "assigned"),
            WorkerStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub capacity: u32,
    pub status: WorkerStatus,
    pub workload: u32,
}

impl Worker {
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.workload)
    }

    pub fn is_available(&self) -> bool {
        self.status != WorkerStatus::Unavailable
    }

    pub fn can_absorb(&self, points: u32) -> bool {
        self.is_available() && points <= self.remaining()
    }

    fn refresh_status(&mut self) {
        if self.status != WorkerStatus::Unavailable {
            self.status = if self.workload > 0 {
                WorkerStatus::Assigned
            } else {
                WorkerStatus::Ready
            };
        }
    }
}

/// Registry of all workers, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistry {
    workers: Vec<Worker>,
}

impl WorkerRegistry {
    pub fn from_config(configs: &[WorkerConfig]) -> Self {
        let workers = configs.iter().map(worker_from_config).collect();
        Self { workers }
    }

    /// Add workers present in configuration but missing from a restored registry.
    pub fn merge_config(&mut self, configs: &[WorkerConfig]) {
        for config in configs {
            if self.get(&config.id).is_none() {
                self.workers.push(worker_from_config(config));
            }
        }
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn get(&self, id: &WorkerId) -> Option<&Worker> {
        self.workers.iter().find(|w| &w.id == id)
    }

    /// Reserve points on a worker. Rejected without any change when the
    /// reservation would exceed the worker's capacity.
    pub fn reserve(&mut self, id: &WorkerId, points: u32) -> Result<(), AssignmentRejected> {
        let worker = self
            .workers
            .iter_mut()
            .find(|w| &w.id == id)
            .ok_or_else(|| AssignmentRejected::UnknownWorker(id.clone()))?;
        if !worker.is_available() {
            return Err(AssignmentRejected::Unavailable(id.clone()));
        }
        if !worker.can_absorb(points) {
            return Err(AssignmentRejected::OverCapacity {
                worker: id.clone(),
                requested: points,
                workload: worker.workload,
                capacity: worker.capacity,
            });
        }
        worker.workload += points;
        worker.refresh_status();
        Ok(())
    }

    /// Release previously reserved points. Unknown workers are ignored.
    pub fn release(&mut self, id: &WorkerId, points: u32) {
        if let Some(worker) = self.workers.iter_mut().find(|w| &w.id == id) {
            worker.workload = worker.workload.saturating_sub(points);
            worker.refresh_status();
        }
    }

    /// Mark a worker available or unavailable. Reserved workload is kept.
    pub fn set_available(
        &mut self,
        id: &WorkerId,
        available: bool,
    ) -> Result<WorkerStatus, ValidationError> {
        let worker = self
            .workers
            .iter_mut()
            .find(|w| &w.id == id)
            .ok_or_else(|| ValidationError::UnknownWorker(id.clone()))?;
        if available {
            worker.status = WorkerStatus::Ready;
            worker.refresh_status();
        } else {
            worker.status = WorkerStatus::Unavailable;
        }
        Ok(worker.status)
    }

    /// Sum of capacity over workers with nothing reserved and not unavailable.
    pub fn ready_capacity(&self) -> u32 {
        self.workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Ready)
            .map(|w| w.capacity)
            .sum()
    }

    /// The available worker with the most remaining capacity that can absorb
    /// `points`. Ties go to the earlier worker.
    pub fn best_fit(&self, points: u32) -> Option<&Worker> {
        self.workers
            .iter()
            .filter(|w| w.can_absorb(points))
            .fold(None, |best: Option<&Worker>, w| match best {
                Some(b) if b.remaining() >= w.remaining() => Some(b),
                _ => Some(w),
            })
    }

    /// Total workload over total capacity of available workers, as a percentage.
    pub fn utilization(&self) -> f64 {
        let (load, capacity) = self
            .workers
            .iter()
            .filter(|w| w.is_available())
            .fold((0u32, 0u32), |(l, c), w| (l + w.workload, c + w.capacity));
        if capacity == 0 {
            0.0
        } else {
            f64::from(load) / f64::from(capacity) * 100.0
        }
    }
}

fn worker_from_config(config: &WorkerConfig) -> Worker {
    Worker {
        id: config.id.clone(),
        name: config
            .name
            .clone()
            .unwrap_or_else(|| config.id.to_string()),
        capacity: config.capacity,
        status: if config.unavailable {
            WorkerStatus::Unavailable
        } else {
            WorkerStatus::Ready
        },
        workload: 0,
    }
}
