//! KPI computation and alerting.
//!
//! KPIs are evaluated in topological layers of their dependency graph. Within
//! a layer the formulas run concurrently over one snapshot; their results are
//! then applied one at a time: sample history, trend, band and finally the
//! alert edge check against the band of the previous reading.

pub mod alerts;
pub mod graph;
pub mod kpi;

pub use alerts::{Alert, AlertBook, AlertChange, AlertStatus};
pub use kpi::{Formula, KpiDefinition, Thresholds, WeightedInput};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};
use waypoint_common::{AlertId, Band, KpiId, StakeholderId, Trend};

use crate::errors::{ConfigurationError, ValidationError};
use crate::snapshot::StateSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSettings {
    /// Samples averaged for the trend
    pub trend_window: usize,
    /// Relative change needed to count as improving or declining
    pub trend_threshold: f64,
    /// Samples kept per KPI
    pub sample_limit: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            trend_window: 5,
            trend_threshold: 0.05,
            sample_limit: 50,
        }
    }
}

/// Persisted per-KPI state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiState {
    pub value: Option<f64>,
    pub trend: Trend,
    pub band: Option<Band>,
    #[serde(default)]
    pub samples: VecDeque<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsState {
    #[serde(default)]
    pub kpis: BTreeMap<KpiId, KpiState>,
    #[serde(default)]
    pub alerts: AlertBook,
}

/// Read-only view of one KPI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReading {
    pub id: KpiId,
    pub name: String,
    pub category: String,
    pub value: Option<f64>,
    pub target: Option<f64>,
    pub trend: Trend,
    pub band: Option<Band>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecomputeReport {
    pub readings: Vec<KpiReading>,
    pub triggered: Vec<Alert>,
    pub resolved: Vec<AlertId>,
}

pub struct MetricsEngine {
    definitions: Vec<KpiDefinition>,
    layers: Vec<Vec<usize>>,
    settings: MetricsSettings,
    default_recipients: Vec<StakeholderId>,
    state: MetricsState,
}

impl MetricsEngine {
    /// Validate the definitions and build the evaluation order. Fails on
    /// cycles, unknown inputs, duplicate ids, inconsistent thresholds and
    /// non-positive input weights.
    pub fn new(
        definitions: Vec<KpiDefinition>,
        settings: MetricsSettings,
        default_recipients: Vec<StakeholderId>,
    ) -> Result<Self, ConfigurationError> {
        for def in &definitions {
            def.validate_thresholds()?;
            def.validate_inputs()?;
        }
        let layers = graph::evaluation_layers(&definitions)?;
        debug!(kpis = definitions.len(), layers = layers.len(), "KPI graph built");
        Ok(Self {
            definitions,
            layers,
            settings,
            default_recipients,
            state: MetricsState::default(),
        })
    }

    /// Restore persisted state. State for KPIs no longer configured is dropped.
    pub fn with_state(mut self, mut state: MetricsState) -> Self {
        state
            .kpis
            .retain(|id, _| self.definitions.iter().any(|d| &d.id == id));
        self.state = state;
        self
    }

    pub fn state(&self) -> &MetricsState {
        &self.state
    }

    pub fn definitions(&self) -> &[KpiDefinition] {
        &self.definitions
    }

    pub fn alerts(&self) -> &AlertBook {
        &self.state.alerts
    }

    /// Recompute every KPI, then run the alert edge check on the fresh values.
    pub async fn recompute(
        &mut self,
        snapshot: &StateSnapshot,
        now: DateTime<Utc>,
    ) -> RecomputeReport {
        let mut fresh: BTreeMap<KpiId, f64> = BTreeMap::new();
        let mut report = RecomputeReport::default();

        for layer in &self.layers {
            let values = join_all(layer.iter().map(|&i| {
                let def = &self.definitions[i];
                let fresh = &fresh;
                async move { (i, def.formula.compute(snapshot, fresh)) }
            }))
            .await;

            for (i, value) in values {
                let def = &self.definitions[i];
                let Some(value) = value else {
                    debug!(kpi = %def.id, "No data for KPI this cycle");
                    continue;
                };
                fresh.insert(def.id.clone(), value);

                let state = self.state.kpis.entry(def.id.clone()).or_default();
                let window: Vec<f64> = state
                    .samples
                    .iter()
                    .rev()
                    .take(self.settings.trend_window)
                    .copied()
                    .collect();
                let previous = state.band.unwrap_or(Band::Good);
                let band = def.band(value);
                state.trend =
                    kpi::trend(def.direction, value, &window, self.settings.trend_threshold);
                state.value = Some(value);
                state.band = Some(band);
                state.updated_at = Some(now);
                state.samples.push_back(value);
                while state.samples.len() > self.settings.sample_limit.max(1) {
                    state.samples.pop_front();
                }

                let recipients = if def.recipients.is_empty() {
                    &self.default_recipients
                } else {
                    &def.recipients
                };
                match self
                    .state
                    .alerts
                    .observe(&def.id, previous, band, value, recipients, now)
                {
                    Some(AlertChange::Triggered(alert)) => {
                        info!(
                            kpi = %def.id,
                            alert = %alert.id,
                            from = %previous,
                            to = %band,
                            "KPI alert triggered"
                        );
                        report.triggered.push(alert);
                    }
                    Some(AlertChange::Resolved(ids)) => {
                        info!(kpi = %def.id, count = ids.len(), "KPI alerts resolved");
                        report.resolved.extend(ids);
                    }
                    None => {}
                }
            }
        }

        report.readings = self.readings();
        report
    }

    /// Current readings in definition order.
    pub fn readings(&self) -> Vec<KpiReading> {
        self.definitions
            .iter()
            .map(|def| {
                let state = self.state.kpis.get(&def.id);
                KpiReading {
                    id: def.id.clone(),
                    name: def.name.clone(),
                    category: def.category.clone(),
                    value: state.and_then(|s| s.value),
                    target: def.target,
                    trend: state.map(|s| s.trend).unwrap_or_default(),
                    band: state.and_then(|s| s.band),
                    updated_at: state.and_then(|s| s.updated_at),
                }
            })
            .collect()
    }

    pub fn acknowledge(
        &mut self,
        id: &AlertId,
        by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Alert, ValidationError> {
        self.state.alerts.acknowledge(id, by, now).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::ProjectStage;
    use waypoint_common::PhaseKind;

    fn thresholds() -> Thresholds {
        Thresholds {
            excellent: 90.0,
            good: 70.0,
            warning: 50.0,
        }
    }

    fn measured(id: &str) -> KpiDefinition {
        KpiDefinition::new(
            id,
            Formula::Measurement {
                name: id.to_string(),
            },
            thresholds(),
        )
    }

    fn snapshot_with(measurements: &[(&str, f64)]) -> StateSnapshot {
        let mut snap = StateSnapshot::empty(ProjectStage::Active(PhaseKind::Design), Utc::now());
        for (name, value) in measurements {
            snap.facts.set_measurement(*name, *value);
        }
        snap
    }

    #[tokio::test]
    async fn test_band_sequence_alerts_on_edges_only() {
        let mut engine =
            MetricsEngine::new(vec![measured("nps")], MetricsSettings::default(), vec![]).unwrap();
        let mut triggered = 0;
        let mut resolved = 0;
        for value in [80.0, 60.0, 55.0, 58.0, 75.0] {
            let report = engine
                .recompute(&snapshot_with(&[("nps", value)]), Utc::now())
                .await;
            triggered += report.triggered.len();
            resolved += report.resolved.len();
        }
        assert_eq!(triggered, 1);
        assert_eq!(resolved, 1);
        assert_eq!(engine.alerts().all().len(), 1);
    }

    #[tokio::test]
    async fn test_first_reading_is_compared_with_good() {
        let mut engine = MetricsEngine::new(
            vec![measured("nps")],
            MetricsSettings::default(),
            vec![StakeholderId::from("cto")],
        )
        .unwrap();
        let report = engine
            .recompute(&snapshot_with(&[("nps", 10.0)]), Utc::now())
            .await;
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].from, Band::Good);
        assert_eq!(report.triggered[0].recipients, vec![StakeholderId::from("cto")]);

        let mut quiet =
            MetricsEngine::new(vec![measured("nps")], MetricsSettings::default(), vec![]).unwrap();
        let report = quiet
            .recompute(&snapshot_with(&[("nps", 95.0)]), Utc::now())
            .await;
        assert!(report.triggered.is_empty());
    }

    #[tokio::test]
    async fn test_composite_reads_fresh_inputs() {
        let defs = vec![
            KpiDefinition::new(
                "health",
                Formula::Composite {
                    inputs: vec![
                        WeightedInput {
                            kpi: KpiId::from("quality"),
                            weight: 1.0,
                        },
                        WeightedInput {
                            kpi: KpiId::from("speed"),
                            weight: 1.0,
                        },
                    ],
                },
                thresholds(),
            ),
            measured("quality"),
            measured("speed"),
        ];
        let mut engine = MetricsEngine::new(defs, MetricsSettings::default(), vec![]).unwrap();
        let report = engine
            .recompute(&snapshot_with(&[("quality", 100.0), ("speed", 60.0)]), Utc::now())
            .await;
        assert_eq!(report.readings[0].value, Some(80.0));
        assert_eq!(report.readings[0].band, Some(Band::Good));

        let report = engine
            .recompute(&snapshot_with(&[("quality", 40.0), ("speed", 40.0)]), Utc::now())
            .await;
        assert_eq!(report.readings[0].value, Some(40.0));
        assert_eq!(report.readings[0].trend, Trend::Declining);
    }

    #[tokio::test]
    async fn test_missing_data_leaves_kpi_untouched() {
        let mut engine =
            MetricsEngine::new(vec![measured("nps")], MetricsSettings::default(), vec![]).unwrap();
        let report = engine.recompute(&snapshot_with(&[]), Utc::now()).await;
        assert_eq!(report.readings[0].value, None);
        assert_eq!(report.readings[0].band, None);
        assert!(report.triggered.is_empty());
    }

    #[tokio::test]
    async fn test_samples_are_bounded() {
        let settings = MetricsSettings {
            sample_limit: 3,
            ..MetricsSettings::default()
        };
        let mut engine = MetricsEngine::new(vec![measured("nps")], settings, vec![]).unwrap();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            engine
                .recompute(&snapshot_with(&[("nps", value)]), Utc::now())
                .await;
        }
        let state = &engine.state().kpis[&KpiId::from("nps")];
        assert_eq!(state.samples, VecDeque::from(vec![3.0, 4.0, 5.0]));
    }

    #[test]
    fn test_invalid_configuration_fails_fast() {
        let cyclic = vec![KpiDefinition::new(
            "loop",
            Formula::Composite {
                inputs: vec![WeightedInput {
                    kpi: KpiId::from("loop"),
                    weight: 1.0,
                }],
            },
            thresholds(),
        )];
        assert!(matches!(
            MetricsEngine::new(cyclic, MetricsSettings::default(), vec![]),
            Err(ConfigurationError::KpiCycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_drops_unconfigured_kpis() {
        let mut engine = MetricsEngine::new(
            vec![measured("nps"), measured("old")],
            MetricsSettings::default(),
            vec![],
        )
        .unwrap();
        engine
            .recompute(&snapshot_with(&[("nps", 80.0), ("old", 80.0)]), Utc::now())
            .await;
        let state = engine.state().clone();
        let restored = MetricsEngine::new(vec![measured("nps")], MetricsSettings::default(), vec![])
            .unwrap()
            .with_state(state);
        assert_eq!(restored.state().kpis.len(), 1);
        assert_eq!(restored.readings()[0].value, Some(80.0));
    }
}
