//! Small enums shared by the backlog, metrics and approval subsystems.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid {kind} '{value}'. Valid values: {valid}")]
pub struct ValueParseError {
    pub kind: &'static str,
    pub value: String,
    pub valid: &'static str,
}

/// Backlog item priority. Orders `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(ValueParseError {
                kind: "priority",
                value: s.to_string(),
                valid: "low, medium, high, critical",
            }),
        }
    }
}

/// KPI threshold band. Orders from worst to best, so `a > b` means `a` is the better band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl Band {
    /// Bands that raise an alert when entered from a better band.
    pub fn is_alerting(self) -> bool {
        matches!(self, Band::Warning | Band::Critical)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Critical => write!(f, "critical"),
            Band::Warning => write!(f, "warning"),
            Band::Good => write!(f, "good"),
            Band::Excellent => write!(f, "excellent"),
        }
    }
}

impl FromStr for Band {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Band::Critical),
            "warning" => Ok(Band::Warning),
            "good" => Ok(Band::Good),
            "excellent" => Ok(Band::Excellent),
            _ => Err(ValueParseError {
                kind: "band",
                value: s.to_string(),
                valid: "critical, warning, good, excellent",
            }),
        }
    }
}

/// Direction of a KPI's recent movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    #[default]
    Stable,
    Declining,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Declining => write!(f, "declining"),
        }
    }
}

/// Which way is "better" for a KPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

/// Alert severity, derived from the band that was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Stakeholder decision on an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Pending,
    Approved,
    Rejected,
    NeedsRevision,
}

impl Decision {
    pub fn is_decided(self) -> bool {
        !matches!(self, Decision::Pending)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Pending => write!(f, "pending"),
            Decision::Approved => write!(f, "approved"),
            Decision::Rejected => write!(f, "rejected"),
            Decision::NeedsRevision => write!(f, "needs_revision"),
        }
    }
}

impl FromStr for Decision {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Decision::Pending),
            "approved" | "approve" => Ok(Decision::Approved),
            "rejected" | "reject" => Ok(Decision::Rejected),
            "needs_revision" | "revise" => Ok(Decision::NeedsRevision),
            _ => Err(ValueParseError {
                kind: "decision",
                value: s.to_string(),
                valid: "approved, rejected, needs_revision",
            }),
        }
    }
}
