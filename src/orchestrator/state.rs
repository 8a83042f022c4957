//! Persisted orchestrator state and the stores that hold it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use waypoint_common::GateId;

use crate::approvals::ApprovalBook;
use crate::backlog::BacklogStore;
use crate::gates::GateState;
use crate::metrics::MetricsState;
use crate::milestones::MilestoneBook;
use crate::phase::PhaseContext;
use crate::planner::SprintBook;
use crate::snapshot::FactSheet;
use crate::workers::WorkerRegistry;

/// Bumped whenever the layout changes incompatibly.
pub const STATE_VERSION: u32 = 1;

/// Everything needed to resume a project exactly where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub project: String,
    pub phase: PhaseContext,
    pub backlog: BacklogStore,
    pub workers: WorkerRegistry,
    pub sprints: SprintBook,
    pub approvals: ApprovalBook,
    pub milestones: MilestoneBook,
    pub gates: BTreeMap<GateId, GateState>,
    pub metrics: MetricsState,
    pub facts: FactSheet,
}

/// Durable storage for [`PersistedState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedState>>;
    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Keeps the state in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

/// Pretty-printed JSON file, replaced atomically through a temporary sibling.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let state: PersistedState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        if state.version != STATE_VERSION {
            anyhow::bail!(
                "State file {} has version {}, expected {}",
                self.path.display(),
                state.version,
                STATE_VERSION
            );
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create state directory")?;
        }
        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseDefinition;
    use tempfile::tempdir;
    use waypoint_common::PhaseKind;

    fn state() -> PersistedState {
        let now = Utc::now();
        PersistedState {
            version: STATE_VERSION,
            saved_at: now,
            project: "demo".into(),
            phase: PhaseContext::enter(&PhaseDefinition::empty(PhaseKind::Design), 10, now),
            backlog: BacklogStore::default(),
            workers: WorkerRegistry::default(),
            sprints: SprintBook::default(),
            approvals: ApprovalBook::default(),
            milestones: MilestoneBook::default(),
            gates: BTreeMap::new(),
            metrics: MetricsState::default(),
            facts: FactSheet::default(),
        }
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        assert!(store.load().await.unwrap().is_none());
        let saved = state();
        store.save(&saved).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(saved));
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_other_versions() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let mut saved = state();
        saved.version = STATE_VERSION + 1;
        store.save(&saved).await.unwrap();
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&state()).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().project, "demo");
    }
}
