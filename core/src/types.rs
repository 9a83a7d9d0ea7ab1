//! Shared primitive types used across the engine.

use chrono::{DateTime, Utc};

/// A buyer or counterparty profile identifier, owned by the surrounding application.
pub type SubjectId = String;

/// Identifier of a risk flag (uuid v4 string).
pub type FlagId = String;

/// Identifier of a blacklist entry (uuid v4 string).
pub type EntryId = String;

/// Identifier of an appeal (uuid v4 string).
pub type AppealId = String;

/// Identifier of the reviewer, admin or detector acting on the engine.
pub type ActorId = String;

/// Wall-clock instant. Stored as RFC 3339 text.
pub type Timestamp = DateTime<Utc>;

/// Fresh random identifier for flags, entries, appeals and notes.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
