//! Blacklist entries and appeals.
//!
//! Entry:  ACTIVE ──► EXPIRED   (expires_at passed, swept automatically)
//!            └─────► LIFTED    (appeal approved, or manual override)
//! Appeal: PENDING ──► { APPROVED, DENIED }
//!
//! At most one ACTIVE entry per subject; the store enforces it with a partial
//! unique index, the engine reports it as DUPLICATE_BLACKLIST_ENTRY.

use crate::{
    error::{TrustError, TrustResult},
    flag::Severity,
    types::{ActorId, AppealId, EntryId, SubjectId, Timestamp},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistStatus {
    Active,
    Expired,
    Lifted,
}

impl BlacklistStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active  => "active",
            Self::Expired => "expired",
            Self::Lifted  => "lifted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active"  => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "lifted"  => Some(Self::Lifted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlacklistEntry {
    pub id:             EntryId,
    pub subject_id:     SubjectId,
    pub status:         BlacklistStatus,
    pub reason:         String,
    pub severity:       Severity,
    pub blacklisted_by: ActorId,
    pub blacklisted_at: Timestamp,
    /// None means permanent.
    pub expires_at:     Option<Timestamp>,
    pub lifted_at:      Option<Timestamp>,
    pub lifted_by:      Option<ActorId>,
}

impl BlacklistEntry {
    /// True while the entry actually restricts the subject at `now`.
    /// An ACTIVE entry past its expiry stops restricting before the sweep runs.
    pub fn is_enforced_at(&self, now: Timestamp) -> bool {
        self.status == BlacklistStatus::Active && !self.is_due_to_expire(now)
    }

    pub fn is_due_to_expire(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// ACTIVE → EXPIRED. Only once `expires_at` has passed.
    pub fn expire(&mut self, now: Timestamp) -> TrustResult<()> {
        if self.status != BlacklistStatus::Active || !self.is_due_to_expire(now) {
            return Err(TrustError::BlacklistNotActive { entry_id: self.id.clone() });
        }
        self.status = BlacklistStatus::Expired;
        Ok(())
    }

    /// ACTIVE → LIFTED by manual override.
    pub fn lift(&mut self, admin_id: &str, now: Timestamp) -> TrustResult<()> {
        if self.status != BlacklistStatus::Active {
            return Err(TrustError::BlacklistNotActive { entry_id: self.id.clone() });
        }
        self.status = BlacklistStatus::Lifted;
        self.lifted_at = Some(now);
        self.lifted_by = Some(admin_id.to_string());
        Ok(())
    }

    /// Update severity/reason of the active entry instead of opening a duplicate.
    pub fn amend(&mut self, severity: Option<Severity>, reason: Option<&str>) -> TrustResult<()> {
        if self.status != BlacklistStatus::Active {
            return Err(TrustError::BlacklistNotActive { entry_id: self.id.clone() });
        }
        if let Some(severity) = severity {
            self.severity = severity;
        }
        if let Some(reason) = reason {
            self.reason = reason.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    Pending,
    Approved,
    Denied,
}

impl AppealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending  => "pending",
            Self::Approved => "approved",
            Self::Denied   => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending"  => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied"   => Some(Self::Denied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppealDecision {
    Approve,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appeal {
    pub id:          AppealId,
    pub entry_id:    EntryId,
    pub subject_id:  SubjectId,
    pub status:      AppealStatus,
    pub statement:   String,
    pub filed_at:    Timestamp,
    pub decided_at:  Option<Timestamp>,
    pub decided_by:  Option<ActorId>,
    pub admin_notes: Option<String>,
}

impl Appeal {
    /// PENDING → APPROVED | DENIED, applying the consequence to the linked entry.
    /// Returns true when the decision obligates a recalculation.
    ///
    /// The entry must still be enforced. Once it is lifted, expired or past its
    /// expiry there is nothing left to overturn, and neither record is touched.
    pub fn decide(
        &mut self,
        entry:    &mut BlacklistEntry,
        decision: AppealDecision,
        admin_id: &str,
        notes:    Option<&str>,
        now:      Timestamp,
    ) -> TrustResult<bool> {
        if self.status != AppealStatus::Pending {
            return Err(TrustError::AppealNotPending { appeal_id: self.id.clone() });
        }
        if !entry.is_enforced_at(now) {
            return Err(TrustError::BlacklistNotActive { entry_id: entry.id.clone() });
        }
        self.decided_at = Some(now);
        self.decided_by = Some(admin_id.to_string());
        self.admin_notes = notes.map(str::to_string);
        match decision {
            AppealDecision::Approve => {
                entry.lift(admin_id, now)?;
                self.status = AppealStatus::Approved;
                Ok(true)
            }
            AppealDecision::Deny => {
                self.status = AppealStatus::Denied;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn entry(expires_at: Option<Timestamp>) -> BlacklistEntry {
        BlacklistEntry {
            id:             "bl-1".into(),
            subject_id:     "s-1".into(),
            status:         BlacklistStatus::Active,
            reason:         "chargeback ring".into(),
            severity:       Severity::High,
            blacklisted_by: "admin".into(),
            blacklisted_at: t0(),
            expires_at,
            lifted_at:      None,
            lifted_by:      None,
        }
    }

    fn appeal() -> Appeal {
        Appeal {
            id:          "ap-1".into(),
            entry_id:    "bl-1".into(),
            subject_id:  "s-1".into(),
            status:      AppealStatus::Pending,
            statement:   "mistaken identity".into(),
            filed_at:    t0(),
            decided_at:  None,
            decided_by:  None,
            admin_notes: None,
        }
    }

    #[test]
    fn expiry_only_after_deadline() {
        let mut e = entry(Some(t0() + Duration::days(30)));
        assert!(e.is_enforced_at(t0() + Duration::days(29)));
        assert!(e.expire(t0() + Duration::days(29)).is_err());
        assert!(!e.is_enforced_at(t0() + Duration::days(30)));
        e.expire(t0() + Duration::days(30)).unwrap();
        assert_eq!(e.status, BlacklistStatus::Expired);
    }

    #[test]
    fn permanent_entries_never_expire() {
        let mut e = entry(None);
        assert!(e.is_enforced_at(t0() + Duration::days(10_000)));
        assert!(e.expire(t0() + Duration::days(10_000)).is_err());
    }

    #[test]
    fn approval_lifts_and_requests_recalculation() {
        let mut e = entry(None);
        let mut a = appeal();
        let recalc = a.decide(&mut e, AppealDecision::Approve, "admin-2", Some("ok"), t0()).unwrap();
        assert!(recalc);
        assert_eq!(a.status, AppealStatus::Approved);
        assert_eq!(e.status, BlacklistStatus::Lifted);
        assert_eq!(e.lifted_by.as_deref(), Some("admin-2"));
    }

    #[test]
    fn denial_keeps_entry_active() {
        let mut e = entry(None);
        let mut a = appeal();
        let recalc = a.decide(&mut e, AppealDecision::Deny, "admin-2", None, t0()).unwrap();
        assert!(!recalc);
        assert_eq!(a.status, AppealStatus::Denied);
        assert_eq!(e.status, BlacklistStatus::Active);

        let err = a.decide(&mut e, AppealDecision::Approve, "admin-3", None, t0()).unwrap_err();
        assert_eq!(err.code(), "APPEAL_NOT_PENDING");
        assert_eq!(e.status, BlacklistStatus::Active);
    }

    #[test]
    fn decision_on_a_closed_entry_changes_nothing() {
        let mut lifted = entry(None);
        lifted.lift("admin-a", t0()).unwrap();
        let before = lifted.clone();
        let mut a = appeal();
        let err = a
            .decide(&mut lifted, AppealDecision::Approve, "admin-b", None, t0() + Duration::hours(1))
            .unwrap_err();
        assert_eq!(err.code(), "BLACKLIST_NOT_ACTIVE");
        assert_eq!(lifted, before);
        assert_eq!(a, appeal());

        let mut lapsed = entry(Some(t0() + Duration::days(1)));
        let err = a
            .decide(&mut lapsed, AppealDecision::Approve, "admin-b", None, t0() + Duration::days(2))
            .unwrap_err();
        assert_eq!(err.code(), "BLACKLIST_NOT_ACTIVE");
        assert_eq!(lapsed.status, BlacklistStatus::Active);
        assert_eq!(a.status, AppealStatus::Pending);
    }

    #[test]
    fn amend_requires_active_entry() {
        let mut e = entry(None);
        e.amend(Some(Severity::Critical), Some("escalated")).unwrap();
        assert_eq!(e.severity, Severity::Critical);
        assert_eq!(e.reason, "escalated");
        e.lift("admin", t0()).unwrap();
        assert!(e.amend(None, Some("again")).is_err());
        assert!(e.lift("admin", t0()).is_err());
    }
}
