//! Project configuration read from `.waypoint/waypoint.toml`.
//!
//! Settings are layered: the file provides the base, environment variables
//! override individual planner settings and CLI flags override both.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "storefront"
//!
//! [planner]
//! commitment_ratio = 0.8
//! sprint_days = 10
//!
//! [gates]
//! history_limit = 20
//!
//! [milestones]
//! sla_hours = 72
//!
//! [metrics]
//! trend_window = 5
//! trend_threshold = 0.05
//! alert_recipients = ["pm"]
//!
//! [notifications]
//! timeout_secs = 10
//! default_channel = "log"
//!
//! [[workers]]
//! id = "alice"
//! capacity = 8
//!
//! [[stakeholders]]
//! id = "pm"
//! name = "Product manager"
//! authority = ["*"]
//!
//! [[kpis]]
//! id = "completion"
//! name = "Backlog completion"
//! formula = { type = "backlog_completion" }
//! thresholds = { excellent = 90, good = 60, warning = 30 }
//!
//! [[phases]]
//! kind = "business_model"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use waypoint_common::{PhaseKind, StakeholderId};

use crate::approvals::Stakeholder;
use crate::errors::ConfigurationError;
use crate::gates::GateDefinition;
use crate::metrics::{KpiDefinition, MetricsSettings, graph};
use crate::milestones::MilestoneDefinition;
use crate::phase::PhaseDefinition;
use crate::predicates::{Criterion, PredicateRegistry};
use crate::workers::WorkerConfig;

pub const CONFIG_FILE: &str = "waypoint.toml";

/// Project-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to the directory name)
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSection {
    /// Share of ready capacity committed to a sprint (default: 0.8)
    #[serde(default = "default_commitment_ratio")]
    pub commitment_ratio: f64,
    /// Sprint length in days when a phase does not override it (default: 10)
    #[serde(default = "default_sprint_days")]
    pub sprint_days: u32,
}

fn default_commitment_ratio() -> f64 {
    0.8
}

fn default_sprint_days() -> u32 {
    10
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            commitment_ratio: default_commitment_ratio(),
            sprint_days: default_sprint_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesSection {
    /// Runs kept per gate (default: 20)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    20
}

impl Default for GatesSection {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestonesSection {
    /// Hours a criterion may stay unmet after phase entry before it is reported (default: 72)
    #[serde(default = "default_sla_hours")]
    pub sla_hours: u64,
}

fn default_sla_hours() -> u64 {
    72
}

impl Default for MilestonesSection {
    fn default() -> Self {
        Self {
            sla_hours: default_sla_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Relative change that counts as a trend, 0.05 = 5% (default: 0.05)
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    /// Alert recipients for KPIs that name none
    #[serde(default)]
    pub alert_recipients: Vec<StakeholderId>,
}

fn default_trend_window() -> usize {
    5
}

fn default_trend_threshold() -> f64 {
    0.05
}

fn default_sample_limit() -> usize {
    50
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            trend_window: default_trend_window(),
            trend_threshold: default_trend_threshold(),
            sample_limit: default_sample_limit(),
            alert_recipients: Vec::new(),
        }
    }
}

impl MetricsSection {
    pub fn settings(&self) -> MetricsSettings {
        MetricsSettings {
            trend_window: self.trend_window,
            trend_threshold: self.trend_threshold,
            sample_limit: self.sample_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsSection {
    /// Upper bound for one delivery (default: 10)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Channel used for stakeholders without preferences (default: "log")
    #[serde(default = "default_channel")]
    pub default_channel: String,
    /// Estimate of the corrective item created for a rejected approval (default: 3)
    #[serde(default = "default_corrective_estimate")]
    pub corrective_estimate: u32,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_channel() -> String {
    "log".to_string()
}

fn default_corrective_estimate() -> u32 {
    3
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            default_channel: default_channel(),
            corrective_estimate: default_corrective_estimate(),
        }
    }
}

impl NotificationsSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The complete waypoint.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaypointToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub milestones: MilestonesSection,
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub stakeholders: Vec<Stakeholder>,
    #[serde(default)]
    pub kpis: Vec<KpiDefinition>,
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
}

impl WaypointToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse waypoint.toml")
    }

    /// Load `waypoint.toml` from `waypoint_dir`, or the defaults when it doesn't exist.
    pub fn load_or_default(waypoint_dir: &Path) -> Result<Self> {
        let config_path = waypoint_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize waypoint.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// The starter configuration written by `waypoint init`.
    pub fn template() -> &'static str {
        DEFAULT_TEMPLATE
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project.name.as_deref()
    }

    /// Commitment ratio, with `WAYPOINT_COMMITMENT_RATIO` taking precedence.
    pub fn commitment_ratio(&self) -> f64 {
        std::env::var("WAYPOINT_COMMITMENT_RATIO")
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(self.planner.commitment_ratio)
    }

    /// Default sprint length, with `WAYPOINT_SPRINT_DAYS` taking precedence.
    pub fn sprint_days(&self) -> u32 {
        std::env::var("WAYPOINT_SPRINT_DAYS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(self.planner.sprint_days)
    }

    /// The configured definition of `kind`, or an empty phase.
    pub fn phase(&self, kind: PhaseKind) -> PhaseDefinition {
        self.phases
            .iter()
            .find(|p| p.kind == kind)
            .cloned()
            .unwrap_or_else(|| PhaseDefinition::empty(kind))
    }

    pub fn stakeholder(&self, id: &StakeholderId) -> Option<&Stakeholder> {
        self.stakeholders.iter().find(|s| &s.id == id)
    }

    pub fn milestone_definitions(&self) -> Vec<(PhaseKind, MilestoneDefinition)> {
        self.phases
            .iter()
            .flat_map(|p| p.milestones.iter().map(|m| (p.kind, m.clone())))
            .collect()
    }

    pub fn gate_definitions(&self) -> Vec<(PhaseKind, GateDefinition)> {
        self.phases
            .iter()
            .flat_map(|p| p.gates.iter().map(|g| (p.kind, g.clone())))
            .collect()
    }

    /// Validate against the built-in predicates.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.validate_with(&PredicateRegistry::with_builtins())
    }

    /// Check everything that must hold before a project can start. The first
    /// problem found is returned.
    pub fn validate_with(&self, predicates: &PredicateRegistry) -> Result<(), ConfigurationError> {
        self.validate_settings()?;

        unique("worker", self.workers.iter().map(|w| w.id.to_string()))?;
        unique("stakeholder", self.stakeholders.iter().map(|s| s.id.to_string()))?;

        let mut phases = HashSet::new();
        for phase in &self.phases {
            if !phases.insert(phase.kind) {
                return Err(ConfigurationError::DuplicatePhase(phase.kind));
            }
        }

        unique(
            "workflow",
            self.phases
                .iter()
                .flat_map(|p| p.workflows.iter().map(|w| w.id.to_string())),
        )?;
        let milestones = self.milestone_definitions();
        unique("milestone", milestones.iter().map(|(_, m)| m.id.to_string()))?;
        let gates = self.gate_definitions();
        unique("gate", gates.iter().map(|(_, g)| g.id.to_string()))?;

        for (_, milestone) in &milestones {
            if let Some(criterion) = milestone.duplicate_criterion() {
                return Err(ConfigurationError::DuplicateMilestoneCriterion {
                    milestone: milestone.id.clone(),
                    criterion: criterion.to_string(),
                });
            }
            let total = milestone.total_weight();
            if total != 100 {
                return Err(ConfigurationError::MilestoneWeights {
                    milestone: milestone.id.clone(),
                    total,
                });
            }
            for dependency in &milestone.depends_on {
                if !milestones.iter().any(|(_, m)| &m.id == dependency) {
                    return Err(ConfigurationError::UnknownMilestoneDependency {
                        milestone: milestone.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            known_predicates(&milestone.criteria, predicates)?;
        }

        for (_, gate) in &gates {
            if let Some(reason) = gate.problems() {
                return Err(ConfigurationError::MalformedGate {
                    gate: gate.id.clone(),
                    reason,
                });
            }
            known_predicates(&gate.checks, predicates)?;
            for required in &gate.approvals {
                self.known_stakeholder(&format!("Gate '{}'", gate.id), &required.stakeholder)?;
            }
        }

        for kpi in &self.kpis {
            kpi.validate_thresholds()?;
            kpi.validate_inputs()?;
            for recipient in &kpi.recipients {
                self.known_stakeholder(&format!("KPI '{}'", kpi.id), recipient)?;
            }
        }
        for recipient in &self.metrics.alert_recipients {
            self.known_stakeholder("metrics.alert_recipients", recipient)?;
        }
        graph::evaluation_layers(&self.kpis)?;
        Ok(())
    }

    fn validate_settings(&self) -> Result<(), ConfigurationError> {
        let ratio = self.commitment_ratio();
        if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "planner.commitment_ratio".into(),
                message: format!("{} is not in (0, 1]", ratio),
            });
        }
        if self.sprint_days() == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "planner.sprint_days".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.metrics.trend_window == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "metrics.trend_window".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.metrics.trend_threshold.is_nan() || self.metrics.trend_threshold < 0.0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "metrics.trend_threshold".into(),
                message: "must not be negative".into(),
            });
        }
        Ok(())
    }

    fn known_stakeholder(&self, owner: &str, id: &StakeholderId) -> Result<(), ConfigurationError> {
        if self.stakeholder(id).is_some() {
            Ok(())
        } else {
            Err(ConfigurationError::UnknownStakeholder {
                owner: owner.to_string(),
                stakeholder: id.clone(),
            })
        }
    }

    /// Soft issues that do not prevent a start.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.workers.is_empty() {
            warnings.push("No workers configured; sprints cannot be planned".to_string());
        }
        for worker in self.workers.iter().filter(|w| w.capacity == 0) {
            warnings.push(format!("Worker '{}' has zero capacity", worker.id));
        }
        for kind in PhaseKind::ALL {
            match self.phases.iter().find(|p| p.kind == kind) {
                None => warnings.push(format!(
                    "Phase '{}' is not configured; it has no gates and exits freely",
                    kind
                )),
                Some(phase) if phase.gates.is_empty() => {
                    warnings.push(format!("Phase '{}' has no gates", kind))
                }
                Some(_) => {}
            }
        }
        if !self.kpis.is_empty() && self.metrics.alert_recipients.is_empty() {
            for kpi in self.kpis.iter().filter(|k| k.recipients.is_empty()) {
                warnings.push(format!("KPI '{}' has no alert recipients", kpi.id));
            }
        }

        warnings
    }
}

fn unique(kind: &'static str, ids: impl Iterator<Item = String>) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.clone()) {
            return Err(ConfigurationError::DuplicateId { kind, id });
        }
    }
    Ok(())
}

fn known_predicates(
    criteria: &[Criterion],
    predicates: &PredicateRegistry,
) -> Result<(), ConfigurationError> {
    match criteria.iter().find(|c| !predicates.contains(&c.predicate)) {
        Some(criterion) => Err(ConfigurationError::UnknownPredicate {
            criterion: criterion.id.clone(),
            predicate: criterion.predicate.clone(),
        }),
        None => Ok(()),
    }
}

const DEFAULT_TEMPLATE: &str = r#"# waypoint project configuration

[project]
name = "my-project"

[planner]
commitment_ratio = 0.8
sprint_days = 10

[gates]
history_limit = 20

[milestones]
sla_hours = 72

[metrics]
trend_window = 5
trend_threshold = 0.05
alert_recipients = ["pm"]

[notifications]
timeout_secs = 10
default_channel = "log"

[[workers]]
id = "worker-1"
capacity = 8

[[workers]]
id = "worker-2"
capacity = 8

[[stakeholders]]
id = "pm"
name = "Product manager"
role = "product"
authority = ["*"]

[[stakeholders]]
id = "cto"
name = "CTO"
role = "engineering"
authority = ["architecture", "release"]

[[kpis]]
id = "backlog-completion"
name = "Backlog completion"
category = "delivery"
formula = { type = "backlog_completion" }
target = 100
thresholds = { excellent = 90, good = 60, warning = 30 }

[[kpis]]
id = "blocked-ratio"
name = "Blocked items"
category = "delivery"
formula = { type = "blocked_ratio" }
direction = "lower_is_better"
thresholds = { excellent = 5, good = 15, warning = 30 }

[[kpis]]
id = "health"
name = "Delivery health"
category = "summary"
thresholds = { excellent = 85, good = 60, warning = 40 }

[kpis.formula]
type = "composite"
inputs = [{ kpi = "backlog-completion", weight = 2 }, { kpi = "milestone-completion" }]

[[kpis]]
id = "milestone-completion"
name = "Milestone completion"
category = "delivery"
formula = { type = "milestone_completion" }
thresholds = { excellent = 90, good = 50, warning = 25 }

[[phases]]
kind = "business_model"

[[phases.workflows]]
id = "discovery"
name = "Customer discovery"

[[phases.milestones]]
id = "model-validated"
name = "Business model validated"

[[phases.milestones.criteria]]
id = "interviews"
weight = 50
predicate = "fact"

[[phases.milestones.criteria]]
id = "pricing"
weight = 50
predicate = "fact"

[[phases.gates]]
id = "business-model-exit"
name = "Business model sign-off"

[[phases.gates.checks]]
id = "model-validated"
predicate = "milestone_completed"
params = { milestone = "model-validated" }

[[phases.gates.approvals]]
type = "business"
stakeholder = "pm"

[[phases]]
kind = "architecture"

[[phases.workflows]]
id = "system-design"
name = "System design"

[[phases.milestones]]
id = "architecture-agreed"
name = "Architecture agreed"
depends_on = ["model-validated"]

[[phases.milestones.criteria]]
id = "adr"
weight = 60
predicate = "fact"

[[phases.milestones.criteria]]
id = "design-items"
weight = 40
predicate = "all_items_done"
params = { phase = "architecture" }

[[phases.gates]]
id = "architecture-exit"
name = "Architecture sign-off"
reviews = ["security-review"]

[[phases.gates.checks]]
id = "adr"
predicate = "fact"

[[phases.gates.approvals]]
type = "architecture"
stakeholder = "cto"

[[phases]]
kind = "design"

[[phases.workflows]]
id = "ux"
name = "UX and visual design"

[[phases.milestones]]
id = "design-approved"
name = "Design approved"

[[phases.milestones.criteria]]
id = "prototype"
weight = 100
predicate = "fact"

[[phases.gates]]
id = "design-exit"
name = "Design sign-off"
reviews = ["usability-review"]

[[phases.gates.checks]]
id = "prototype"
predicate = "fact"

[[phases]]
kind = "development"
sprint_days = 14

[[phases.workflows]]
id = "build"
name = "Build"

[[phases.milestones]]
id = "release-ready"
name = "Release ready"

[[phases.milestones.criteria]]
id = "all-built"
weight = 70
predicate = "all_items_done"
params = { phase = "development" }

[[phases.milestones.criteria]]
id = "health"
weight = 30
predicate = "kpi_band_at_least"
params = { kpi = "health", band = "good" }

[[phases.gates]]
id = "release"
name = "Release approval"

[[phases.gates.checks]]
id = "release-ready"
predicate = "milestone_completed"
params = { milestone = "release-ready" }

[[phases.gates.approvals]]
type = "release"
stakeholder = "cto"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = WaypointToml::default();
        assert_eq!(config.planner.commitment_ratio, 0.8);
        assert_eq!(config.planner.sprint_days, 10);
        assert_eq!(config.gates.history_limit, 20);
        assert_eq!(config.milestones.sla_hours, 72);
        assert_eq!(config.metrics.trend_window, 5);
        assert_eq!(config.notifications.timeout_secs, 10);
        assert_eq!(config.notifications.default_channel, "log");
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config = WaypointToml::parse(
            r#"
[planner]
sprint_days = 5
"#,
        )
        .unwrap();
        assert_eq!(config.planner.sprint_days, 5);
        assert_eq!(config.planner.commitment_ratio, 0.8);
    }

    #[test]
    fn test_template_parses_and_validates() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(WaypointToml::template()).unwrap();
        assert_eq!(config.phases.len(), 4);
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.kpis.len(), 4);
        config.validate().unwrap();
        assert!(config.warnings().is_empty(), "{:?}", config.warnings());
    }

    #[test]
    fn test_missing_phase_falls_back_to_empty() {
        let config = WaypointToml::default();
        let phase = config.phase(PhaseKind::Design);
        assert_eq!(phase.kind, PhaseKind::Design);
        assert!(phase.gates.is_empty());
        assert!(config.warnings().iter().any(|w| w.contains("not configured")));
    }

    #[test]
    fn test_milestone_weights_must_sum_to_100() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[phases]]
kind = "design"

[[phases.milestones]]
id = "m"
name = "M"

[[phases.milestones.criteria]]
id = "a"
weight = 30
predicate = "fact"
"#,
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::MilestoneWeights {
                milestone: "m".into(),
                total: 30
            })
        );
    }

    #[test]
    fn test_duplicate_milestone_criterion_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[phases]]
kind = "design"

[[phases.milestones]]
id = "m"
name = "M"

[[phases.milestones.criteria]]
id = "x"
weight = 30
predicate = "fact"

[[phases.milestones.criteria]]
id = "x"
weight = 70
predicate = "fact"
"#,
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::DuplicateMilestoneCriterion {
                milestone: "m".into(),
                criterion: "x".into(),
            })
        );
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[phases]]
kind = "design"

[[phases]]
kind = "design"
"#,
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::DuplicatePhase(PhaseKind::Design))
        );
    }

    #[test]
    fn test_empty_gate_is_malformed() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[phases]]
kind = "architecture"

[[phases.gates]]
id = "exit"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MalformedGate { .. })
        ));
    }

    #[test]
    fn test_unknown_predicate_and_stakeholder() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[phases]]
kind = "architecture"

[[phases.gates]]
id = "exit"

[[phases.gates.checks]]
id = "vibes"
predicate = "feels_right"
"#,
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::UnknownPredicate {
                criterion: "vibes".into(),
                predicate: "feels_right".into()
            })
        );

        let mut predicates = PredicateRegistry::with_builtins();
        predicates.register(
            "feels_right",
            crate::predicates::FnPredicate(
                |_: &Criterion, _: &crate::snapshot::StateSnapshot| true,
            ),
        );
        assert!(config.validate_with(&predicates).is_ok());

        let config = WaypointToml::parse(
            r#"
[[phases]]
kind = "architecture"

[[phases.gates]]
id = "exit"

[[phases.gates.approvals]]
type = "architecture"
stakeholder = "ghost"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::UnknownStakeholder { .. })
        ));
    }

    #[test]
    fn test_kpi_cycle_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[kpis]]
id = "a"
name = "A"
thresholds = { excellent = 90, good = 60, warning = 30 }
formula = { type = "composite", inputs = [{ kpi = "b" }] }

[[kpis]]
id = "b"
name = "B"
thresholds = { excellent = 90, good = 60, warning = 30 }
formula = { type = "composite", inputs = [{ kpi = "a" }] }
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::KpiCycle { .. })
        ));
    }

    #[test]
    fn test_composite_input_weight_must_be_positive() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::parse(
            r#"
[[kpis]]
id = "velocity"
name = "Velocity"
thresholds = { excellent = 30, good = 20, warning = 10 }
formula = { type = "sprint_velocity" }

[[kpis]]
id = "health"
name = "Health"
thresholds = { excellent = 90, good = 60, warning = 30 }
formula = { type = "composite", inputs = [{ kpi = "velocity", weight = 0.0 }] }
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidInputWeight { ref kpi, weight, .. })
                if kpi.as_str() == "health" && weight == 0.0
        ));
    }

    #[test]
    fn test_env_overrides_planner_settings() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = WaypointToml::default();

        unsafe { std::env::set_var("WAYPOINT_COMMITMENT_RATIO", "0.5") };
        unsafe { std::env::set_var("WAYPOINT_SPRINT_DAYS", "7") };
        assert_eq!(config.commitment_ratio(), 0.5);
        assert_eq!(config.sprint_days(), 7);

        unsafe { std::env::set_var("WAYPOINT_SPRINT_DAYS", "soon") };
        assert_eq!(config.sprint_days(), 10);

        unsafe { std::env::remove_var("WAYPOINT_COMMITMENT_RATIO") };
        unsafe { std::env::remove_var("WAYPOINT_SPRINT_DAYS") };
        assert_eq!(config.commitment_ratio(), 0.8);
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let mut config = WaypointToml::default();
        config.planner.commitment_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_load_or_default_and_save() {
        let dir = tempdir().unwrap();
        let config = WaypointToml::load_or_default(dir.path()).unwrap();
        assert!(config.phases.is_empty());

        let parsed = WaypointToml::parse(WaypointToml::template()).unwrap();
        let path = dir.path().join(CONFIG_FILE);
        parsed.save(&path).unwrap();
        let loaded = WaypointToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.phases.len(), 4);
        assert_eq!(loaded.kpis, parsed.kpis);
    }
}
