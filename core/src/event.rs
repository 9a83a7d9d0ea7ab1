//! Engine events: everything the engine tells the outside world.
//!
//! RULE: an event is written to the `event_log` outbox in the same commit as the
//! state change it describes, and only handed to the notification sink after
//! that commit succeeds. A rolled-back change never produces an event.

use crate::{
    blacklist::AppealStatus,
    flag::{FlagStatus, Severity},
    model::{RiskLevel, TriggerReason},
    types::{AppealId, EntryId, FlagId, SubjectId, Timestamp},
};
use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrustEvent {
    ScoreRecalculated {
        subject_id:        SubjectId,
        previous_score:    u8,
        new_score:         u8,
        risk_level_before: RiskLevel,
        risk_level_after:  RiskLevel,
        trigger_reason:    TriggerReason,
        at:                Timestamp,
    },
    /// Admin channel only: a subject moved into CRITICAL.
    CriticalRiskAlert {
        subject_id:     SubjectId,
        new_score:      u8,
        trigger_reason: TriggerReason,
        at:             Timestamp,
    },
    FlagRaised {
        subject_id: SubjectId,
        flag_id:    FlagId,
        severity:   Severity,
        category:   String,
        at:         Timestamp,
    },
    FlagResolved {
        subject_id:  SubjectId,
        flag_id:     FlagId,
        status:      FlagStatus,
        reviewer_id: String,
        at:          Timestamp,
    },
    BlacklistLifted {
        subject_id: SubjectId,
        entry_id:   EntryId,
        lifted_by:  String,
        at:         Timestamp,
    },
    AppealDecided {
        subject_id: SubjectId,
        appeal_id:  AppealId,
        entry_id:   EntryId,
        status:     AppealStatus,
        at:         Timestamp,
    },
}

impl TrustEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ScoreRecalculated { .. } => "score_recalculated",
            Self::CriticalRiskAlert { .. } => "critical_risk_alert",
            Self::FlagRaised { .. }        => "flag_raised",
            Self::FlagResolved { .. }      => "flag_resolved",
            Self::BlacklistLifted { .. }   => "blacklist_lifted",
            Self::AppealDecided { .. }     => "appeal_decided",
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            Self::ScoreRecalculated { subject_id, .. }
            | Self::CriticalRiskAlert { subject_id, .. }
            | Self::FlagRaised { subject_id, .. }
            | Self::FlagResolved { subject_id, .. }
            | Self::BlacklistLifted { subject_id, .. }
            | Self::AppealDecided { subject_id, .. } => subject_id,
        }
    }
}

/// Delivery channel of an outbox row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Subject,
    Admin,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Admin   => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subject" => Some(Self::Subject),
            "admin"   => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub subject_id: SubjectId,
    pub channel:    Channel,
    pub event_type: String,
    pub payload:    String, // JSON-serialized TrustEvent
    pub created_at: Timestamp,
}

impl EventLogEntry {
    pub fn new(channel: Channel, event: &TrustEvent, at: Timestamp) -> serde_json::Result<Self> {
        Ok(Self {
            id:         None,
            subject_id: event.subject_id().to_string(),
            channel,
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
            created_at: at,
        })
    }

    pub fn event(&self) -> serde_json::Result<TrustEvent> {
        serde_json::from_str(&self.payload)
    }
}
