//! Trust records, score history and the read-side projections built from them.

use crate::{
    aggregation::SubScores,
    types::{ActorId, EntryId, SubjectId, Timestamp},
};
use serde::{Deserialize, Serialize};

// ── Enumerations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
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

/// Which class of subject is being scored. Selects the weighting table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Buyer,
    Counterparty,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buyer        => "buyer",
            Self::Counterparty => "counterparty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buyer"        => Some(Self::Buyer),
            "counterparty" => Some(Self::Counterparty),
            _ => None,
        }
    }
}

/// The event class that caused a recalculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    Transaction,
    FlagResolved,
    FlagRaised,
    AppealDecision,
    Manual,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transaction    => "TRANSACTION",
            Self::FlagResolved   => "FLAG_RESOLVED",
            Self::FlagRaised     => "FLAG_RAISED",
            Self::AppealDecision => "APPEAL_DECISION",
            Self::Manual         => "MANUAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TRANSACTION"     => Some(Self::Transaction),
            "FLAG_RESOLVED"   => Some(Self::FlagResolved),
            "FLAG_RAISED"     => Some(Self::FlagRaised),
            "APPEAL_DECISION" => Some(Self::AppealDecision),
            "MANUAL"          => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Completed,
    Disputed,
    Refunded,
}

impl TransactionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Disputed  => "disputed",
            Self::Refunded  => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "disputed"  => Some(Self::Disputed),
            "refunded"  => Some(Self::Refunded),
            _ => None,
        }
    }
}

// ── Live record ──────────────────────────────────────────────────────────────

/// The live trust record of one subject.
///
/// Written only by a full recalculation pass. `sub_scores` holds the effective
/// per-dimension values of the last pass, which is the risk sub-profile for
/// counterparties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustRecord {
    pub subject_id:            SubjectId,
    pub kind:                  SubjectKind,
    pub overall_score:         u8,
    pub risk_level:            RiskLevel,
    pub risk_category:         Option<String>,
    pub sub_scores:            SubScores,
    pub last_transaction_at:   Option<Timestamp>,
    pub last_flag_at:          Option<Timestamp>,
    pub score_last_updated_at: Option<Timestamp>,
    /// Bumped on every committed recalculation; the commit is a compare-and-swap on it.
    pub version:               i64,
}

impl TrustRecord {
    /// The documented default for a subject that has never been scored.
    pub fn neutral(subject_id: &str, kind: SubjectKind, score: u8, level: RiskLevel) -> Self {
        Self {
            subject_id:            subject_id.to_string(),
            kind,
            overall_score:         score,
            risk_level:            level,
            risk_category:         None,
            sub_scores:            SubScores::new(),
            last_transaction_at:   None,
            last_flag_at:          None,
            score_last_updated_at: None,
            version:               0,
        }
    }

    pub fn last_activity(&self) -> Option<Timestamp> {
        [self.last_transaction_at, self.last_flag_at, self.score_last_updated_at]
            .into_iter()
            .flatten()
            .max()
    }
}

/// One immutable row of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreHistoryEntry {
    pub id:                 Option<i64>,
    pub subject_id:         SubjectId,
    pub previous_score:     u8,
    pub new_score:          u8,
    pub risk_level_before:  RiskLevel,
    pub risk_level_after:   RiskLevel,
    pub trigger_reason:     TriggerReason,
    /// Effective sub-scores used for `new_score`; the fallback when every provider fails.
    pub sub_scores:         SubScores,
    pub created_at:         Timestamp,
}

impl ScoreHistoryEntry {
    pub fn changed(&self) -> bool {
        self.previous_score != self.new_score || self.risk_level_before != self.risk_level_after
    }
}

/// A recalculation obligation recorded in the same commit as the transition that caused it.
/// Consumed (deleted) by the recalculation that reflects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTrigger {
    pub id:          i64,
    pub subject_id:  SubjectId,
    pub reason:      TriggerReason,
    pub enqueued_at: Timestamp,
}

/// Advisory annotation. Never read by scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SellerNote {
    pub id:         String,
    pub subject_id: SubjectId,
    pub author_id:  ActorId,
    pub body:       String,
    pub created_at: Timestamp,
}

// ── Read-side projections ────────────────────────────────────────────────────

/// Cheap projection returned by `get_summary`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustSummary {
    pub subject_id:        SubjectId,
    pub overall_score:     u8,
    pub risk_level:        RiskLevel,
    pub risk_category:     Option<String>,
    pub active_flag_count: i64,
    pub is_blacklisted:    bool,
    pub last_activity:     Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    Blacklisted { entry_id: EntryId },
    RiskLevel { level: RiskLevel },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capability {
    pub subject_id: SubjectId,
    pub allowed:    bool,
    pub reason:     Option<DenialReason>,
}
