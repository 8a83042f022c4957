//! KPI definitions, built-in formulas, banding and trend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use waypoint_common::{Band, Direction, KpiId, StakeholderId, Trend};

use crate::backlog::ItemStatus;
use crate::errors::ConfigurationError;
use crate::milestones::MilestoneStatus;
use crate::planner::SprintStatus;
use crate::snapshot::StateSnapshot;

/// Band boundaries. For higher-is-better KPIs a value at or above `excellent`
/// is excellent; for lower-is-better KPIs a value at or below it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub excellent: f64,
    pub good: f64,
    pub warning: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedInput {
    pub kpi: KpiId,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// How a KPI value is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Formula {
    /// On-time completed milestones over milestones due or completed
    ScheduleAdherence,
    /// Done points over total points in the current phase
    BacklogCompletion,
    /// Done points of the latest active or completed sprint
    SprintVelocity,
    /// Passed runs over all runs of the current phase's gates
    GatePassRate,
    WorkerUtilization,
    /// Blocked items over unfinished items in the current phase
    BlockedRatio,
    /// Mean completion of the current phase's milestones
    MilestoneCompletion,
    /// A host-recorded measurement
    Measurement { name: String },
    /// Weighted average of other KPIs
    Composite { inputs: Vec<WeightedInput> },
}

impl Formula {
    /// KPIs this formula reads.
    pub fn inputs(&self) -> Vec<&KpiId> {
        match self {
            Formula::Composite { inputs } => inputs.iter().map(|i| &i.kpi).collect(),
            _ => Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Formula::ScheduleAdherence => "schedule_adherence",
            Formula::BacklogCompletion => "backlog_completion",
            Formula::SprintVelocity => "sprint_velocity",
            Formula::GatePassRate => "gate_pass_rate",
            Formula::WorkerUtilization => "worker_utilization",
            Formula::BlockedRatio => "blocked_ratio",
            Formula::MilestoneCompletion => "milestone_completion",
            Formula::Measurement { .. } => "measurement",
            Formula::Composite { .. } => "composite",
        }
    }

    /// Compute the value over a snapshot. `fresh` holds the values already
    /// computed in this cycle, which composites read. `None` means no data.
    pub fn compute(&self, snapshot: &StateSnapshot, fresh: &BTreeMap<KpiId, f64>) -> Option<f64> {
        match self {
            Formula::ScheduleAdherence => Some(schedule_adherence(snapshot)),
            Formula::BacklogCompletion => {
                let (done, total) = snapshot
                    .scoped_items()
                    .iter()
                    .fold((0u32, 0u32), |(d, t), item| {
                        let done = if item.is_done() { item.estimate } else { 0 };
                        (d + done, t + item.estimate)
                    });
                percent(f64::from(done), f64::from(total))
            }
            Formula::SprintVelocity => snapshot
                .sprints
                .iter()
                .filter(|s| matches!(s.status, SprintStatus::Active | SprintStatus::Completed))
                .max_by_key(|s| s.number)
                .map(|sprint| {
                    let done: u32 = sprint
                        .assignments
                        .iter()
                        .filter(|a| {
                            snapshot
                                .items
                                .iter()
                                .any(|i| i.id == a.item && i.is_done())
                        })
                        .map(|a| a.estimate)
                        .sum();
                    f64::from(done)
                }),
            Formula::GatePassRate => {
                let phase = snapshot.current_phase()?;
                let runs: Vec<bool> = snapshot
                    .gate_runs
                    .iter()
                    .filter(|r| r.phase == phase)
                    .map(|r| r.passed)
                    .collect();
                let passed = runs.iter().filter(|p| **p).count();
                percent(passed as f64, runs.len() as f64)
            }
            Formula::WorkerUtilization => {
                let (load, capacity) = snapshot
                    .workers
                    .iter()
                    .filter(|w| w.is_available())
                    .fold((0u32, 0u32), |(l, c), w| (l + w.workload, c + w.capacity));
                percent(f64::from(load), f64::from(capacity))
            }
            Formula::BlockedRatio => {
                let unfinished: Vec<ItemStatus> = snapshot
                    .scoped_items()
                    .iter()
                    .filter(|i| !i.is_done())
                    .map(|i| i.status)
                    .collect();
                if unfinished.is_empty() {
                    return Some(0.0);
                }
                let blocked = unfinished
                    .iter()
                    .filter(|s| **s == ItemStatus::Blocked)
                    .count();
                percent(blocked as f64, unfinished.len() as f64)
            }
            Formula::MilestoneCompletion => {
                let phase = snapshot.current_phase()?;
                let completions: Vec<u32> = snapshot
                    .milestones
                    .iter()
                    .filter(|m| m.phase == phase)
                    .map(|m| m.completion)
                    .collect();
                if completions.is_empty() {
                    None
                } else {
                    let sum: u32 = completions.iter().sum();
                    Some(f64::from(sum) / completions.len() as f64)
                }
            }
            Formula::Measurement { name } => snapshot.facts.measurement(name),
            Formula::Composite { inputs } => {
                let (sum, weight) = inputs
                    .iter()
                    .filter_map(|input| {
                        fresh
                            .get(&input.kpi)
                            .map(|v| (v * input.weight, input.weight))
                    })
                    .fold((0.0, 0.0), |(s, w), (v, iw)| (s + v, w + iw));
                (weight > 0.0).then(|| sum / weight)
            }
        }
    }
}

fn percent(part: f64, whole: f64) -> Option<f64> {
    (whole > 0.0).then(|| part / whole * 100.0)
}

/// 100 when nothing is due yet.
fn schedule_adherence(snapshot: &StateSnapshot) -> f64 {
    let today = snapshot.taken_at.date_naive();
    let mut due = 0u32;
    let mut on_time = 0u32;
    for milestone in &snapshot.milestones {
        let completed = milestone.status == MilestoneStatus::Completed;
        let past_due = milestone.target_date.is_some_and(|d| d <= today);
        if !completed && !past_due {
            continue;
        }
        due += 1;
        if let Some(completed_at) = milestone.completed_at
            && milestone
                .target_date
                .is_none_or(|target| completed_at.date_naive() <= target)
        {
            on_time += 1;
        }
    }
    percent(f64::from(on_time), f64::from(due)).unwrap_or(100.0)
}

/// A `[[kpis]]` entry in `waypoint.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub id: KpiId,
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub formula: Formula,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    #[serde(default)]
    pub direction: Direction,
    pub thresholds: Thresholds,
    /// Alert recipients; the configured default recipients when empty
    #[serde(default)]
    pub recipients: Vec<StakeholderId>,
}

fn default_category() -> String {
    "general".to_string()
}

impl KpiDefinition {
    pub fn new(id: impl Into<KpiId>, formula: Formula, thresholds: Thresholds) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            category: default_category(),
            formula,
            target: None,
            direction: Direction::HigherIsBetter,
            thresholds,
            recipients: Vec::new(),
        }
    }

    pub fn lower_is_better(mut self) -> Self {
        self.direction = Direction::LowerIsBetter;
        self
    }

    pub fn band(&self, value: f64) -> Band {
        let t = &self.thresholds;
        match self.direction {
            Direction::HigherIsBetter => {
                if value >= t.excellent {
                    Band::Excellent
                } else if value >= t.good {
                    Band::Good
                } else if value >= t.warning {
                    Band::Warning
                } else {
                    Band::Critical
                }
            }
            Direction::LowerIsBetter => {
                if value <= t.excellent {
                    Band::Excellent
                } else if value <= t.good {
                    Band::Good
                } else if value <= t.warning {
                    Band::Warning
                } else {
                    Band::Critical
                }
            }
        }
    }

    /// Thresholds must be finite and ordered in the KPI's direction.
    pub fn validate_thresholds(&self) -> Result<(), ConfigurationError> {
        let t = &self.thresholds;
        let invalid = |message: String| ConfigurationError::InvalidThresholds {
            kpi: self.id.clone(),
            message,
        };
        if ![t.excellent, t.good, t.warning].iter().all(|v| v.is_finite()) {
            return Err(invalid("thresholds must be finite numbers".into()));
        }
        let ordered = match self.direction {
            Direction::HigherIsBetter => t.excellent >= t.good && t.good >= t.warning,
            Direction::LowerIsBetter => t.excellent <= t.good && t.good <= t.warning,
        };
        if !ordered {
            let expected = match self.direction {
                Direction::HigherIsBetter => "excellent >= good >= warning",
                Direction::LowerIsBetter => "excellent <= good <= warning",
            };
            return Err(invalid(format!(
                "expected {} (got {}, {}, {})",
                expected, t.excellent, t.good, t.warning
            )));
        }
        Ok(())
    }

    /// Composite inputs must carry finite, positive weights.
    pub fn validate_inputs(&self) -> Result<(), ConfigurationError> {
        let Formula::Composite { inputs } = &self.formula else {
            return Ok(());
        };
        match inputs.iter().find(|i| !(i.weight.is_finite() && i.weight > 0.0)) {
            Some(input) => Err(ConfigurationError::InvalidInputWeight {
                kpi: self.id.clone(),
                input: input.kpi.clone(),
                weight: input.weight,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for KpiDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.formula.name())
    }
}

/// Compare `value` with the mean of `samples` using a relative threshold.
pub fn trend(direction: Direction, value: f64, samples: &[f64], threshold: f64) -> Trend {
    if samples.is_empty() {
        return Trend::Stable;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let delta = if mean == 0.0 {
        if value == 0.0 {
            0.0
        } else {
            value.signum()
        }
    } else {
        (value - mean) / mean.abs()
    };
    let rising = delta > threshold;
    let falling = delta < -threshold;
    match (direction, rising, falling) {
        (Direction::HigherIsBetter, true, _) | (Direction::LowerIsBetter, _, true) => {
            Trend::Improving
        }
        (Direction::HigherIsBetter, _, true) | (Direction::LowerIsBetter, true, _) => {
            Trend::Declining
        }
        _ => Trend::Stable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{BacklogStore, NewItem};
    use crate::phase::ProjectStage;
    use crate::snapshot::MilestoneView;
    use chrono::{Duration, Utc};
    use waypoint_common::{MilestoneId, PhaseKind};

    fn thresholds() -> Thresholds {
        Thresholds {
            excellent: 90.0,
            good: 70.0,
            warning: 50.0,
        }
    }

    fn snapshot() -> StateSnapshot {
        StateSnapshot::empty(ProjectStage::Active(PhaseKind::Development), Utc::now())
    }

    #[test]
    fn test_bands_follow_direction() {
        let kpi = KpiDefinition::new("velocity", Formula::SprintVelocity, thresholds());
        assert_eq!(kpi.band(95.0), Band::Excellent);
        assert_eq!(kpi.band(70.0), Band::Good);
        assert_eq!(kpi.band(55.0), Band::Warning);
        assert_eq!(kpi.band(10.0), Band::Critical);

        let blocked = KpiDefinition::new(
            "blocked",
            Formula::BlockedRatio,
            Thresholds {
                excellent: 5.0,
                good: 10.0,
                warning: 25.0,
            },
        )
        .lower_is_better();
        assert_eq!(blocked.band(0.0), Band::Excellent);
        assert_eq!(blocked.band(20.0), Band::Warning);
        assert_eq!(blocked.band(40.0), Band::Critical);
    }

    #[test]
    fn test_threshold_validation() {
        let kpi = KpiDefinition::new("k", Formula::SprintVelocity, thresholds());
        assert!(kpi.validate_thresholds().is_ok());
        // Higher-is-better order is invalid once the KPI is lower-is-better.
        let err = kpi.lower_is_better().validate_thresholds().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidThresholds { .. }));

        let nan = KpiDefinition::new(
            "n",
            Formula::SprintVelocity,
            Thresholds {
                excellent: f64::NAN,
                good: 1.0,
                warning: 0.0,
            },
        );
        assert!(nan.validate_thresholds().is_err());
    }

    #[test]
    fn test_composite_rejects_non_positive_weights() {
        let composite = |weight: f64| {
            KpiDefinition::new(
                "health",
                Formula::Composite {
                    inputs: vec![
                        WeightedInput {
                            kpi: KpiId::from("velocity"),
                            weight: 2.0,
                        },
                        WeightedInput {
                            kpi: KpiId::from("quality"),
                            weight,
                        },
                    ],
                },
                thresholds(),
            )
        };
        assert!(composite(0.5).validate_inputs().is_ok());
        for weight in [0.0, -1.0, f64::NAN] {
            let err = composite(weight).validate_inputs().unwrap_err();
            assert!(matches!(
                err,
                ConfigurationError::InvalidInputWeight { ref input, .. }
                    if input.as_str() == "quality"
            ));
        }
        let plain = KpiDefinition::new("k", Formula::SprintVelocity, thresholds());
        assert!(plain.validate_inputs().is_ok());
    }

    #[test]
    fn test_trend_uses_relative_delta() {
        let samples = [100.0, 100.0, 100.0];
        assert_eq!(trend(Direction::HigherIsBetter, 104.0, &samples, 0.05), Trend::Stable);
        assert_eq!(trend(Direction::HigherIsBetter, 110.0, &samples, 0.05), Trend::Improving);
        assert_eq!(trend(Direction::HigherIsBetter, 90.0, &samples, 0.05), Trend::Declining);
        assert_eq!(trend(Direction::LowerIsBetter, 90.0, &samples, 0.05), Trend::Improving);
        assert_eq!(trend(Direction::LowerIsBetter, 110.0, &samples, 0.05), Trend::Declining);
        assert_eq!(trend(Direction::HigherIsBetter, 50.0, &[], 0.05), Trend::Stable);
        assert_eq!(trend(Direction::HigherIsBetter, 1.0, &[0.0, 0.0], 0.05), Trend::Improving);
    }

    #[test]
    fn test_backlog_completion_and_blocked_ratio() {
        let mut store = BacklogStore::default();
        let now = Utc::now();
        let a = store
            .add(NewItem::new("a", 3, PhaseKind::Development).with_criterion("ok"), now)
            .unwrap();
        let b = store
            .add(NewItem::new("b", 1, PhaseKind::Development).with_criterion("ok"), now)
            .unwrap();
        store.satisfy_criterion(&a, 0).unwrap();
        store.mark_done(&a, now).unwrap();
        store.add_blocker(&b, "waiting on vendor", now).unwrap();

        let mut snap = snapshot();
        snap.items = store.items().to_vec();
        let fresh = BTreeMap::new();
        assert_eq!(Formula::BacklogCompletion.compute(&snap, &fresh), Some(75.0));
        assert_eq!(Formula::BlockedRatio.compute(&snap, &fresh), Some(100.0));

        let empty = snapshot();
        assert_eq!(Formula::BacklogCompletion.compute(&empty, &fresh), None);
        assert_eq!(Formula::BlockedRatio.compute(&empty, &fresh), Some(0.0));
    }

    #[test]
    fn test_no_data_formulas_yield_nothing() {
        let snap = snapshot();
        let fresh = BTreeMap::new();
        assert_eq!(Formula::SprintVelocity.compute(&snap, &fresh), None);
        assert_eq!(Formula::GatePassRate.compute(&snap, &fresh), None);
        assert_eq!(Formula::MilestoneCompletion.compute(&snap, &fresh), None);
        assert_eq!(Formula::WorkerUtilization.compute(&snap, &fresh), None);
        assert_eq!(
            Formula::Measurement { name: "nps".into() }.compute(&snap, &fresh),
            None
        );
        assert_eq!(Formula::ScheduleAdherence.compute(&snap, &fresh), Some(100.0));
    }

    #[test]
    fn test_schedule_adherence_counts_late_and_overdue() {
        let now = Utc::now();
        let today = now.date_naive();
        let view = |id: &str, status, target, completed_at| MilestoneView {
            id: MilestoneId::from(id),
            name: id.into(),
            phase: PhaseKind::Development,
            status,
            completion: if status == MilestoneStatus::Completed { 100 } else { 0 },
            target_date: target,
            completed_at,
        };
        let mut snap = snapshot();
        snap.milestones = vec![
            view("on-time", MilestoneStatus::Completed, Some(today), Some(now)),
            view(
                "late",
                MilestoneStatus::Completed,
                Some(today - Duration::days(3)),
                Some(now),
            ),
            view("overdue", MilestoneStatus::InProgress, Some(today - Duration::days(1)), None),
            view("future", MilestoneStatus::Pending, Some(today + Duration::days(9)), None),
        ];
        let value = Formula::ScheduleAdherence
            .compute(&snap, &BTreeMap::new())
            .unwrap();
        assert!((value - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_composite_weights_available_inputs() {
        let formula = Formula::Composite {
            inputs: vec![
                WeightedInput {
                    kpi: KpiId::from("a"),
                    weight: 3.0,
                },
                WeightedInput {
                    kpi: KpiId::from("b"),
                    weight: 1.0,
                },
                WeightedInput {
                    kpi: KpiId::from("missing"),
                    weight: 5.0,
                },
            ],
        };
        let mut fresh = BTreeMap::new();
        fresh.insert(KpiId::from("a"), 100.0);
        fresh.insert(KpiId::from("b"), 60.0);
        assert_eq!(formula.compute(&snapshot(), &fresh), Some(90.0));
        assert_eq!(formula.compute(&snapshot(), &BTreeMap::new()), None);
        assert_eq!(formula.inputs().len(), 3);
    }

    #[test]
    fn test_formula_parses_from_toml() {
        let kpi: KpiDefinition = toml::from_str(
            r#"
            id = "health"
            name = "Project health"
            formula = { type = "composite", inputs = [{ kpi = "velocity" }, { kpi = "quality", weight = 2.0 }] }
            thresholds = { excellent = 90.0, good = 70.0, warning = 50.0 }
            "#,
        )
        .unwrap();
        assert_eq!(kpi.category, "general");
        assert_eq!(kpi.direction, Direction::HigherIsBetter);
        let Formula::Composite { inputs } = &kpi.formula else {
            panic!("expected a composite formula");
        };
        assert_eq!(inputs[0].weight, 1.0);
        assert_eq!(inputs[1].weight, 2.0);
    }
}
