//! String-backed identifiers.
//!
//! Every entity is addressed by a typed id so that a worker id can never be
//! passed where an item id is expected. Ids serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Backlog item (story) id, e.g. `ITEM-7`.
    ItemId
);
string_id!(
    /// Worker (agent) id from the static registry.
    WorkerId
);
string_id!(
    /// Milestone id, unique across all phases.
    MilestoneId
);
string_id!(
    /// Quality gate id, unique across all phases.
    GateId
);
string_id!(
    /// KPI id.
    KpiId
);
string_id!(AlertId);
string_id!(SprintId);
string_id!(ApprovalId);
string_id!(StakeholderId);
string_id!(WorkflowId);
