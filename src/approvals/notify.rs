//! Notification delivery.
//!
//! Concrete channels (email, chat) live outside this crate behind the
//! [`NotificationDelivery`] trait. Every send goes through a [`Notifier`],
//! which bounds it with a timeout; failures are logged and never propagate
//! into orchestrator operations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;
use waypoint_common::StakeholderId;

use super::Stakeholder;
use crate::errors::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequested,
    RevisionRequested,
    PhaseTransitioned,
    ProjectCompleted,
    AlertTriggered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Sends a payload to one stakeholder over one channel.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn send(
        &self,
        stakeholder: &StakeholderId,
        channel: &str,
        payload: &Notification,
    ) -> Result<()>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl NotificationDelivery for LogDelivery {
    async fn send(
        &self,
        stakeholder: &StakeholderId,
        channel: &str,
        payload: &Notification,
    ) -> Result<()> {
        info!(
            stakeholder = %stakeholder,
            channel,
            kind = ?payload.kind,
            "Notification: {}",
            payload.subject
        );
        Ok(())
    }
}

/// One line of the outbox file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub stakeholder: StakeholderId,
    pub channel: String,
    pub notification: Notification,
}

/// Appends notifications as JSON lines for an external relay to pick up.
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    path: PathBuf,
}

impl OutboxDelivery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read every entry written so far.
    pub async fn read_all(&self) -> Result<Vec<OutboxEntry>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read outbox: {}", self.path.display()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Failed to parse outbox entry"))
            .collect()
    }
}

#[async_trait]
impl NotificationDelivery for OutboxDelivery {
    async fn send(
        &self,
        stakeholder: &StakeholderId,
        channel: &str,
        payload: &Notification,
    ) -> Result<()> {
        let entry = OutboxEntry {
            stakeholder: stakeholder.clone(),
            channel: channel.to_string(),
            notification: payload.clone(),
        };
        let mut line = serde_json::to_string(&entry).context("Failed to serialize notification")?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create outbox directory")?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open outbox: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to write outbox entry")?;
        file.flush().await.context("Failed to flush outbox")?;
        Ok(())
    }
}

/// Timeout-bounded dispatch to a [`NotificationDelivery`].
#[derive(Clone)]
pub struct Notifier {
    delivery: Arc<dyn NotificationDelivery>,
    timeout: Duration,
    default_channel: String,
}

impl Notifier {
    pub fn new(
        delivery: Arc<dyn NotificationDelivery>,
        timeout: Duration,
        default_channel: impl Into<String>,
    ) -> Self {
        Self {
            delivery,
            timeout,
            default_channel: default_channel.into(),
        }
    }

    /// Send via the stakeholder's first preferred channel.
    pub async fn notify(
        &self,
        stakeholder: &Stakeholder,
        payload: &Notification,
    ) -> Result<(), DeliveryError> {
        let channel = stakeholder.preferred_channel(&self.default_channel);
        let send = self.delivery.send(&stakeholder.id, channel, payload);
        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DeliveryError::Failed {
                stakeholder: stakeholder.id.clone(),
                channel: channel.to_string(),
                source,
            }),
            Err(_) => Err(DeliveryError::TimedOut {
                stakeholder: stakeholder.id.clone(),
                channel: channel.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Like [`Self::notify`], but failures are logged instead of returned.
    pub async fn notify_logged(&self, stakeholder: &Stakeholder, payload: &Notification) -> bool {
        match self.notify(stakeholder, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Notification '{}' not delivered: {}", payload.subject, e);
                false
            }
        }
    }

    /// Notify several stakeholders concurrently. Returns how many deliveries succeeded.
    pub async fn broadcast<'a>(
        &self,
        stakeholders: impl IntoIterator<Item = &'a Stakeholder>,
        payload: &Notification,
    ) -> usize {
        join_all(
            stakeholders
                .into_iter()
                .map(|stakeholder| self.notify_logged(stakeholder, payload)),
        )
        .await
        .into_iter()
        .filter(|delivered| *delivered)
        .count()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("timeout", &self.timeout)
            .field("default_channel", &self.default_channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(StakeholderId, String)>>,
    }

    #[async_trait]
    impl NotificationDelivery for Recording {
        async fn send(
            &self,
            stakeholder: &StakeholderId,
            channel: &str,
            _: &Notification,
        ) -> Result<()> {
            self.sent
                .lock()
                .await
                .push((stakeholder.clone(), channel.to_string()));
            Ok(())
        }
    }

    struct Hanging;

    #[async_trait]
    impl NotificationDelivery for Hanging {
        async fn send(&self, _: &StakeholderId, _: &str, _: &Notification) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl NotificationDelivery for Failing {
        async fn send(&self, _: &StakeholderId, _: &str, _: &Notification) -> Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    fn payload() -> Notification {
        Notification::new(NotificationKind::ApprovalRequested, "Approve gate", "Please review")
    }

    #[tokio::test]
    async fn test_notify_uses_preferred_channel() {
        let recording = Arc::new(Recording::default());
        let notifier = Notifier::new(recording.clone(), Duration::from_secs(1), "log");
        let cto = Stakeholder::new("cto", "CTO").with_channel("chat").with_channel("email");
        notifier.notify(&cto, &payload()).await.unwrap();
        notifier
            .notify(&Stakeholder::new("cfo", "CFO"), &payload())
            .await
            .unwrap();
        let sent = recording.sent.lock().await;
        assert_eq!(sent[0], (StakeholderId::from("cto"), "chat".to_string()));
        assert_eq!(sent[1], (StakeholderId::from("cfo"), "log".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_times_out() {
        let notifier = Notifier::new(Arc::new(Hanging), Duration::from_secs(10), "log");
        let err = notifier
            .notify(&Stakeholder::new("cto", "CTO"), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::TimedOut { timeout_secs: 10, .. }));
    }

    #[tokio::test]
    async fn test_broadcast_counts_successes_and_swallows_failures() {
        let notifier = Notifier::new(Arc::new(Failing), Duration::from_secs(1), "log");
        let people = vec![Stakeholder::new("a", "A"), Stakeholder::new("b", "B")];
        assert_eq!(notifier.broadcast(&people, &payload()).await, 0);

        let notifier = Notifier::new(Arc::new(LogDelivery), Duration::from_secs(1), "log");
        assert_eq!(notifier.broadcast(&people, &payload()).await, 2);
    }

    #[tokio::test]
    async fn test_outbox_appends_json_lines() {
        let dir = tempdir().unwrap();
        let outbox = OutboxDelivery::new(dir.path().join("nested/outbox.jsonl"));
        assert!(outbox.read_all().await.unwrap().is_empty());
        let first = payload();
        outbox
            .send(&StakeholderId::from("cto"), "email", &first)
            .await
            .unwrap();
        outbox
            .send(&StakeholderId::from("cfo"), "log", &payload())
            .await
            .unwrap();
        let entries = outbox.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].notification.id, first.id);
        assert_eq!(entries[1].channel, "log");
    }
}
