//! Risk flag lifecycle.
//!
//!   ACTIVE ──► UNDER_REVIEW ──► { RESOLVED, FALSE_POSITIVE }
//!      └───────────────────────►
//!
//! Terminal states have no outgoing transition. The transitions here are pure;
//! the engine wraps them in a storage transaction and enqueues the cascade.

use crate::{
    error::{TrustError, TrustResult},
    types::{ActorId, FlagId, SubjectId, Timestamp},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Active,
    UnderReview,
    Resolved,
    FalsePositive,
}

impl FlagStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active        => "active",
            Self::UnderReview   => "under_review",
            Self::Resolved      => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active"         => Some(Self::Active),
            "under_review"   => Some(Self::UnderReview),
            "resolved"       => Some(Self::Resolved),
            "false_positive" => Some(Self::FalsePositive),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }

    /// Open flags still weigh on the subject.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low      => "low",
            Self::Medium   => "medium",
            Self::High     => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low"      => Some(Self::Low),
            "medium"   => Some(Self::Medium),
            "high"     => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// How a reviewer closes a flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlagOutcome {
    Resolved,
    FalsePositive,
}

impl FlagOutcome {
    fn status(self) -> FlagStatus {
        match self {
            Self::Resolved      => FlagStatus::Resolved,
            Self::FalsePositive => FlagStatus::FalsePositive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFlag {
    pub id:           FlagId,
    pub subject_id:   SubjectId,
    pub status:       FlagStatus,
    pub severity:     Severity,
    /// Detector or rule family, e.g. "velocity" or "chargeback".
    pub category:     String,
    pub description:  String,
    pub raised_by:    ActorId,
    pub raised_at:    Timestamp,
    pub resolved_at:  Option<Timestamp>,
    pub review_notes: Option<String>,
    pub reviewer_id:  Option<ActorId>,
}

impl RiskFlag {
    /// ACTIVE → UNDER_REVIEW.
    pub fn begin_review(&mut self, reviewer_id: &str) -> TrustResult<()> {
        match self.status {
            FlagStatus::Active => {
                self.status = FlagStatus::UnderReview;
                self.reviewer_id = Some(reviewer_id.to_string());
                Ok(())
            }
            FlagStatus::UnderReview => Err(TrustError::InvalidFlagTransition {
                flag_id: self.id.clone(),
                from:    self.status.as_str(),
                to:      FlagStatus::UnderReview.as_str(),
            }),
            FlagStatus::Resolved | FlagStatus::FalsePositive => {
                Err(TrustError::FlagAlreadyResolved { flag_id: self.id.clone() })
            }
        }
    }

    /// ACTIVE | UNDER_REVIEW → RESOLVED | FALSE_POSITIVE.
    pub fn resolve(
        &mut self,
        outcome:     FlagOutcome,
        reviewer_id: &str,
        notes:       Option<&str>,
        now:         Timestamp,
    ) -> TrustResult<()> {
        if self.status.is_terminal() {
            return Err(TrustError::FlagAlreadyResolved { flag_id: self.id.clone() });
        }
        self.status = outcome.status();
        self.resolved_at = Some(now);
        self.reviewer_id = Some(reviewer_id.to_string());
        self.review_notes = notes.map(str::to_string);
        Ok(())
    }
}
