//! Stakeholder approvals and notifications.
//!
//! - `Stakeholder`: who can be asked and over which channels
//! - `ApprovalBook`: approval records; a decision is final once recorded
//! - `notify`: the injected delivery interface plus a timeout-bounded notifier

pub mod notify;

pub use notify::{
    LogDelivery, Notification, NotificationDelivery, NotificationKind, Notifier, OutboxDelivery,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use waypoint_common::{ApprovalId, Decision, GateId, StakeholderId};

use crate::errors::{OrchestratorError, UnauthorizedError, ValidationError};

/// Stakeholder entry in `waypoint.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub id: StakeholderId,
    pub name: String,
    #[serde(default)]
    pub role: String,
    /// Preferred channels, most preferred first
    #[serde(default)]
    pub channels: Vec<String>,
    /// Approval types this stakeholder may decide; `*` covers every type
    #[serde(default)]
    pub authority: Vec<String>,
}

impl Stakeholder {
    pub fn new(id: impl Into<StakeholderId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            channels: Vec::new(),
            authority: Vec::new(),
        }
    }

    pub fn with_authority(mut self, approval_type: impl Into<String>) -> Self {
        self.authority.push(approval_type.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    pub fn has_authority(&self, approval_type: &str) -> bool {
        self.authority.iter().any(|a| a == "*" || a == approval_type)
    }

    pub fn preferred_channel<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.channels.first().map(String::as_str).unwrap_or(fallback)
    }
}

/// What an approval is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ApprovalSubject {
    /// A quality gate's required approval
    Gate(GateId),
    /// A free-standing decision that pauses a workflow
    Decision(String),
}

impl fmt::Display for ApprovalSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalSubject::Gate(gate) => write!(f, "gate:{}", gate),
            ApprovalSubject::Decision(id) => write!(f, "decision:{}", id),
        }
    }
}

impl FromStr for ApprovalSubject {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("gate", id)) if !id.is_empty() => Ok(ApprovalSubject::Gate(GateId::from(id))),
            Some(("decision", id)) if !id.is_empty() => {
                Ok(ApprovalSubject::Decision(id.to_string()))
            }
            _ => anyhow::bail!(
                "Invalid approval subject '{}'. Expected gate:<id> or decision:<id>",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalComment {
    pub by: StakeholderId,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub sequence: u64,
    pub subject: ApprovalSubject,
    pub approval_type: String,
    pub requested_from: StakeholderId,
    pub decision: Decision,
    #[serde(default)]
    pub decided_by: Option<StakeholderId>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<ApprovalComment>,
}

impl Approval {
    pub fn is_pending(&self) -> bool {
        !self.decision.is_decided()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalBook {
    approvals: Vec<Approval>,
    next_sequence: u64,
}

impl ApprovalBook {
    /// Open a pending approval addressed to `stakeholder`.
    pub fn request(
        &mut self,
        subject: ApprovalSubject,
        approval_type: impl Into<String>,
        stakeholder: &Stakeholder,
        now: DateTime<Utc>,
    ) -> &Approval {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        self.approvals.push(Approval {
            id: ApprovalId::new(format!("APR-{}", sequence)),
            sequence,
            subject,
            approval_type: approval_type.into(),
            requested_from: stakeholder.id.clone(),
            decision: Decision::Pending,
            decided_by: None,
            decided_at: None,
            requested_at: now,
            comments: Vec::new(),
        });
        &self.approvals[self.approvals.len() - 1]
    }

    pub fn get(&self, id: &ApprovalId) -> Option<&Approval> {
        self.approvals.iter().find(|a| &a.id == id)
    }

    pub fn all(&self) -> &[Approval] {
        &self.approvals
    }

    pub fn pending(&self) -> impl Iterator<Item = &Approval> {
        self.approvals.iter().filter(|a| a.is_pending())
    }

    /// Record a decision. Only the requested stakeholder, or one whose
    /// authority covers the approval type, may decide; the approval is left
    /// untouched otherwise.
    pub fn decide(
        &mut self,
        id: &ApprovalId,
        decision: Decision,
        by: &Stakeholder,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&Approval, OrchestratorError> {
        if decision == Decision::Pending {
            return Err(ValidationError::PendingIsNotADecision.into());
        }
        let approval = self
            .approvals
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| ValidationError::UnknownApproval(id.clone()))?;
        if approval.decision.is_decided() {
            return Err(ValidationError::AlreadyDecided(id.clone()).into());
        }
        if approval.requested_from != by.id && !by.has_authority(&approval.approval_type) {
            return Err(UnauthorizedError {
                approval: id.clone(),
                stakeholder: by.id.clone(),
            }
            .into());
        }
        approval.decision = decision;
        approval.decided_by = Some(by.id.clone());
        approval.decided_at = Some(now);
        if let Some(text) = comment.filter(|t| !t.trim().is_empty()) {
            approval.comments.push(ApprovalComment {
                by: by.id.clone(),
                text,
                at: now,
            });
        }
        Ok(&*approval)
    }

    /// Append to the comment log. Allowed at any time, decided or not.
    pub fn comment(
        &mut self,
        id: &ApprovalId,
        by: StakeholderId,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<usize, ValidationError> {
        let approval = self
            .approvals
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| ValidationError::UnknownApproval(id.clone()))?;
        approval.comments.push(ApprovalComment {
            by,
            text: text.into(),
            at: now,
        });
        Ok(approval.comments.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cto() -> Stakeholder {
        Stakeholder::new("cto", "Chief Technology Officer").with_authority("architecture")
    }

    fn book_with_request() -> (ApprovalBook, ApprovalId) {
        let mut book = ApprovalBook::default();
        let id = book
            .request(
                ApprovalSubject::Gate(GateId::from("arch-exit")),
                "architecture",
                &Stakeholder::new("lead", "Tech lead"),
                Utc::now(),
            )
            .id
            .clone();
        (book, id)
    }

    #[test]
    fn test_request_assigns_ids() {
        let (mut book, id) = book_with_request();
        assert_eq!(id.as_str(), "APR-1");
        let second = book
            .request(
                ApprovalSubject::Decision("vendor".into()),
                "budget",
                &cto(),
                Utc::now(),
            )
            .id
            .clone();
        assert_eq!(second.as_str(), "APR-2");
        assert_eq!(book.pending().count(), 2);
    }

    #[test]
    fn test_requested_stakeholder_or_authority_may_decide() {
        let (mut book, id) = book_with_request();
        let intern = Stakeholder::new("intern", "Intern");
        let err = book
            .decide(&id, Decision::Approved, &intern, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized(_)));
        assert!(book.get(&id).unwrap().is_pending());

        let approval = book
            .decide(&id, Decision::Approved, &cto(), Some("ship it".into()), Utc::now())
            .unwrap();
        assert_eq!(approval.decision, Decision::Approved);
        assert_eq!(approval.decided_by, Some(StakeholderId::from("cto")));
        assert_eq!(approval.comments.len(), 1);
    }

    #[test]
    fn test_decisions_are_final() {
        let (mut book, id) = book_with_request();
        let lead = Stakeholder::new("lead", "Tech lead");
        book.decide(&id, Decision::Rejected, &lead, None, Utc::now())
            .unwrap();
        let err = book
            .decide(&id, Decision::Approved, &lead, None, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Validation(ValidationError::AlreadyDecided(_))
        ));
        assert_eq!(book.get(&id).unwrap().decision, Decision::Rejected);

        let count = book
            .comment(&id, StakeholderId::from("lead"), "see notes", Utc::now())
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_pending_is_not_a_decision() {
        let (mut book, id) = book_with_request();
        let err = book
            .decide(&id, Decision::Pending, &cto(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Validation(ValidationError::PendingIsNotADecision)
        ));
    }

    #[test]
    fn test_subject_parsing() {
        assert_eq!(
            "gate:arch-exit".parse::<ApprovalSubject>().unwrap(),
            ApprovalSubject::Gate(GateId::from("arch-exit"))
        );
        assert_eq!(
            ApprovalSubject::Decision("vendor".into()).to_string(),
            "decision:vendor"
        );
        assert!("gate:".parse::<ApprovalSubject>().is_err());
        assert!("milestone:x".parse::<ApprovalSubject>().is_err());
    }

    #[test]
    fn test_wildcard_authority_and_channels() {
        let ceo = Stakeholder::new("ceo", "CEO")
            .with_authority("*")
            .with_channel("email");
        assert!(ceo.has_authority("anything"));
        assert_eq!(ceo.preferred_channel("log"), "email");
        assert_eq!(cto().preferred_channel("log"), "log");
    }
}
