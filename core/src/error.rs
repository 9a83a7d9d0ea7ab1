use thiserror::Error;

use crate::types::{AppealId, EntryId, FlagId, SubjectId};

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Recalculation for subject '{subject_id}' is already in flight")]
    EngineBusy { subject_id: SubjectId },

    #[error("Flag '{flag_id}' is already resolved")]
    FlagAlreadyResolved { flag_id: FlagId },

    #[error("Flag '{flag_id}' cannot move from {from} to {to}")]
    InvalidFlagTransition {
        flag_id: FlagId,
        from:    &'static str,
        to:      &'static str,
    },

    #[error("Subject '{subject_id}' already has an active blacklist entry '{entry_id}'")]
    DuplicateBlacklistEntry { subject_id: SubjectId, entry_id: EntryId },

    #[error("Blacklist entry '{entry_id}' is not active")]
    BlacklistNotActive { entry_id: EntryId },

    #[error("Appeal '{appeal_id}' is not pending")]
    AppealNotPending { appeal_id: AppealId },

    #[error("Blacklist entry '{entry_id}' already has pending appeal '{appeal_id}'")]
    AppealAlreadyPending { entry_id: EntryId, appeal_id: AppealId },

    #[error("Flag '{flag_id}' not found")]
    FlagNotFound { flag_id: FlagId },

    #[error("Blacklist entry '{entry_id}' not found")]
    BlacklistEntryNotFound { entry_id: EntryId },

    #[error("Appeal '{appeal_id}' not found")]
    AppealNotFound { appeal_id: AppealId },

    #[error("Subject '{subject_id}' is scored as {existing}, not {requested}")]
    SubjectKindMismatch {
        subject_id: SubjectId,
        existing:   &'static str,
        requested:  &'static str,
    },

    #[error("Trust record for '{subject_id}' changed underneath recalculation")]
    ConcurrentModification { subject_id: SubjectId },

    #[error("Trigger {trigger_id} was already consumed by another pass")]
    TriggerAlreadyConsumed { trigger_id: i64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrustError {
    /// Stable taxonomy code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EngineBusy { .. }              => "ENGINE_BUSY",
            Self::FlagAlreadyResolved { .. }     => "FLAG_ALREADY_RESOLVED",
            Self::InvalidFlagTransition { .. }   => "INVALID_FLAG_TRANSITION",
            Self::DuplicateBlacklistEntry { .. } => "DUPLICATE_BLACKLIST_ENTRY",
            Self::BlacklistNotActive { .. }      => "BLACKLIST_NOT_ACTIVE",
            Self::AppealNotPending { .. }        => "APPEAL_NOT_PENDING",
            Self::AppealAlreadyPending { .. }    => "APPEAL_ALREADY_PENDING",
            Self::FlagNotFound { .. }
            | Self::BlacklistEntryNotFound { .. }
            | Self::AppealNotFound { .. }        => "NOT_FOUND",
            Self::SubjectKindMismatch { .. }     => "SUBJECT_KIND_MISMATCH",
            Self::ConcurrentModification { .. }  => "CONCURRENT_MODIFICATION",
            Self::TriggerAlreadyConsumed { .. }  => "TRIGGER_CONSUMED",
            Self::InvalidRequest(_)              => "INVALID_REQUEST",
            Self::InvalidConfig(_)               => "INVALID_CONFIG",
            Self::Persistence(_)
            | Self::Serialization(_)
            | Self::Other(_)                     => "PERSISTENCE_FAILURE",
        }
    }

    /// True when the caller should retry the whole trigger later.
    /// State-machine violations are caller logic errors and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EngineBusy { .. }
                | Self::ConcurrentModification { .. }
                | Self::Persistence(_)
                | Self::Serialization(_)
                | Self::Other(_)
        )
    }
}

pub type TrustResult<T> = Result<T, TrustError>;

/// Why a sub-score provider produced no value. Never escapes the engine:
/// the coordinator degrades every variant to "missing".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider '{provider}' unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("provider '{provider}' timed out")]
    TimedOut { provider: String },

    #[error("provider '{provider}' returned out-of-range score {value}")]
    OutOfRange { provider: String, value: f64 },
}
