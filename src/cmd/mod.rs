//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module       | Commands handled                                           |
//! |--------------|-------------------------------------------------------------|
//! | `project`    | `Init`, `Config`, `Start`, `Status`, `Transition`, `Rollback` |
//! | `work`       | `Item`, `Sprint`, `Worker`, `Fact`, `Measure`               |
//! | `governance` | `Gate`, `Approval`, `Kpi`, `Milestones`                     |

pub mod governance;
pub mod project;
pub mod work;

pub use governance::{cmd_approval, cmd_gate, cmd_kpi, cmd_milestones};
pub use project::{cmd_config, cmd_init, cmd_rollback, cmd_start, cmd_status, cmd_transition};
pub use work::{cmd_fact, cmd_item, cmd_measure, cmd_sprint, cmd_worker};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use waypoint::approvals::OutboxDelivery;
use waypoint::config::Config;
use waypoint::errors::NotReady;
use waypoint::orchestrator::{JsonFileStore, Orchestrator, OrchestratorBuilder};

/// Builder wired to the project's state file and notification outbox.
pub fn builder(config: &Config) -> OrchestratorBuilder {
    Orchestrator::builder(config.toml().clone())
        .with_project_name(config.project_name())
        .with_store(Arc::new(JsonFileStore::new(&config.state_file)))
        .with_delivery(Arc::new(OutboxDelivery::new(&config.outbox_file)))
}

/// Resume the project persisted under `.waypoint/`.
pub async fn open(config: &Config) -> Result<Orchestrator> {
    if !config.is_initialized() {
        anyhow::bail!("No waypoint.toml found. Run 'waypoint init' first.");
    }
    Ok(builder(config).resume().await?)
}

/// Log everything the command set in motion.
pub fn flush_events(orchestrator: &Orchestrator) {
    for record in orchestrator.drain_events() {
        match serde_json::to_string(&record.event) {
            Ok(event) => info!(at = %record.at, "{}", event),
            Err(e) => info!("Unserializable event {:?}: {}", record.event, e),
        }
    }
}

/// Turn a refused operation into a CLI error.
pub fn ready<T>(outcome: Result<T, NotReady>) -> Result<T> {
    outcome.map_err(|reason| anyhow::anyhow!("Not ready: {}", reason))
}
