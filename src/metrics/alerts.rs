//! Edge-triggered KPI alerts.
//!
//! An alert is raised only when a KPI's band moves into `warning` or
//! `critical` from a better band, and every open alert for the KPI is resolved
//! when it comes back to `good` or better. Readings that stay in the same band
//! change nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use waypoint_common::{AlertId, Band, KpiId, Severity, StakeholderId};

use crate::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn is_open(self) -> bool {
        self != AlertStatus::Resolved
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Triggered => write!(f, "triggered"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub kpi: KpiId,
    pub from: Band,
    pub to: Band,
    pub severity: Severity,
    pub value: f64,
    pub recipients: Vec<StakeholderId>,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// What a band observation changed.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    Triggered(Alert),
    Resolved(Vec<AlertId>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertBook {
    alerts: Vec<Alert>,
    next_id: u64,
}

impl AlertBook {
    /// Apply the edge rules to one band observation.
    pub fn observe(
        &mut self,
        kpi: &KpiId,
        previous: Band,
        current: Band,
        value: f64,
        recipients: &[StakeholderId],
        now: DateTime<Utc>,
    ) -> Option<AlertChange> {
        if current.is_alerting() && current < previous {
            self.next_id += 1;
            let alert = Alert {
                id: AlertId::new(format!("ALERT-{}", self.next_id)),
                kpi: kpi.clone(),
                from: previous,
                to: current,
                severity: if current == Band::Critical {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                value,
                recipients: recipients.to_vec(),
                status: AlertStatus::Triggered,
                triggered_at: now,
                acknowledged_at: None,
                acknowledged_by: None,
                resolved_at: None,
            };
            self.alerts.push(alert.clone());
            return Some(AlertChange::Triggered(alert));
        }

        if previous.is_alerting() && !current.is_alerting() {
            let resolved: Vec<AlertId> = self
                .alerts
                .iter_mut()
                .filter(|a| &a.kpi == kpi && a.status.is_open())
                .map(|a| {
                    a.status = AlertStatus::Resolved;
                    a.resolved_at = Some(now);
                    a.id.clone()
                })
                .collect();
            if !resolved.is_empty() {
                return Some(AlertChange::Resolved(resolved));
            }
        }
        None
    }

    /// Mark a triggered alert as seen. Acknowledged and resolved alerts are left as they are.
    pub fn acknowledge(
        &mut self,
        id: &AlertId,
        by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<&Alert, ValidationError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| ValidationError::UnknownAlert(id.clone()))?;
        if alert.status == AlertStatus::Triggered {
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_at = Some(now);
            alert.acknowledged_by = Some(by.into());
        }
        Ok(&*alert)
    }

    pub fn all(&self) -> &[Alert] {
        &self.alerts
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<&Alert> {
        self.alerts.iter().rev().take(limit).collect()
    }

    pub fn open_for(&self, kpi: &KpiId) -> Vec<&Alert> {
        self.alerts
            .iter()
            .filter(|a| &a.kpi == kpi && a.status.is_open())
            .collect()
    }
}
