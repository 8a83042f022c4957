//! Burndown series.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use waypoint_common::SprintId;

use super::sprint::Sprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurndownPoint {
    pub at: DateTime<Utc>,
    /// Points not yet done
    pub remaining: u32,
}

/// Ideal and actual remaining work over a sprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurndownReport {
    pub sprint: SprintId,
    pub committed: u32,
    pub ideal: Vec<BurndownPoint>,
    pub actual: Vec<BurndownPoint>,
}

/// One point per day from `start` to `end`, falling linearly from `committed` to zero.
pub fn ideal_line(start: DateTime<Utc>, end: DateTime<Utc>, committed: u32) -> Vec<BurndownPoint> {
    let days = (end - start).num_days().max(1);
    (0..=days)
        .map(|day| {
            let left = f64::from(committed) * (days - day) as f64 / days as f64;
            BurndownPoint {
                at: start + Duration::days(day),
                remaining: left.round() as u32,
            }
        })
        .collect()
}

pub fn report(sprint: &Sprint) -> BurndownReport {
    let committed = sprint.committed();
    let start = sprint.started_at.unwrap_or(sprint.starts_at);
    let end = start + (sprint.ends_at - sprint.starts_at);
    BurndownReport {
        sprint: sprint.id.clone(),
        committed,
        ideal: ideal_line(start, end, committed),
        actual: sprint.burndown.clone(),
    }
}
