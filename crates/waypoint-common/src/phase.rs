//! The fixed project lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A top-level project lifecycle stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Business-model validation
    BusinessModel,
    /// Architecture design
    Architecture,
    /// UX and visual design
    Design,
    /// Implementation
    Development,
}

impl PhaseKind {
    /// All phases in order.
    pub const ALL: [PhaseKind; 4] = [
        PhaseKind::BusinessModel,
        PhaseKind::Architecture,
        PhaseKind::Design,
        PhaseKind::Development,
    ];

    /// One-based order index.
    pub fn order(self) -> u8 {
        match self {
            PhaseKind::BusinessModel => 1,
            PhaseKind::Architecture => 2,
            PhaseKind::Design => 3,
            PhaseKind::Development => 4,
        }
    }

    /// The phase after this one, or `None` for the final phase.
    pub fn next(self) -> Option<PhaseKind> {
        match self {
            PhaseKind::BusinessModel => Some(PhaseKind::Architecture),
            PhaseKind::Architecture => Some(PhaseKind::Design),
            PhaseKind::Design => Some(PhaseKind::Development),
            PhaseKind::Development => None,
        }
    }

    /// The phase before this one, or `None` for the first phase.
    pub fn previous(self) -> Option<PhaseKind> {
        match self {
            PhaseKind::BusinessModel => None,
            PhaseKind::Architecture => Some(PhaseKind::BusinessModel),
            PhaseKind::Design => Some(PhaseKind::Architecture),
            PhaseKind::Development => Some(PhaseKind::Design),
        }
    }

    pub fn is_final(self) -> bool {
        self.next().is_none()
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            PhaseKind::BusinessModel => "Business model",
            PhaseKind::Architecture => "Architecture",
            PhaseKind::Design => "Design",
            PhaseKind::Development => "Development",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseKind::BusinessModel => "business_model",
            PhaseKind::Architecture => "architecture",
            PhaseKind::Design => "design",
            PhaseKind::Development => "development",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "Invalid phase '{0}'. Valid values: business_model, architecture, design, development"
)]
pub struct PhaseParseError(pub String);

impl FromStr for PhaseKind {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "business_model" | "business" => Ok(PhaseKind::BusinessModel),
            "architecture" => Ok(PhaseKind::Architecture),
            "design" => Ok(PhaseKind::Design),
            "development" | "implementation" => Ok(PhaseKind::Development),
            _ => Err(PhaseParseError(s.to_string())),
        }
    }
}
