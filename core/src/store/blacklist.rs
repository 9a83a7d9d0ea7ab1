//! Blacklist registry and appeal queries.

use super::{get_enum, get_opt_ts, get_ts, opt_ts, ts, Db};
use crate::{
    blacklist::{Appeal, AppealStatus, BlacklistEntry, BlacklistStatus},
    error::TrustResult,
    flag::Severity,
    types::Timestamp,
};
use rusqlite::{params, OptionalExtension, Row};

const ENTRY_COLUMNS: &str = "id, subject_id, status, reason, severity, blacklisted_by,
     blacklisted_at, expires_at, lifted_at, lifted_by";

const APPEAL_COLUMNS: &str = "id, entry_id, subject_id, status, statement, filed_at,
     decided_at, decided_by, admin_notes";

fn entry_row(row: &Row<'_>) -> rusqlite::Result<BlacklistEntry> {
    Ok(BlacklistEntry {
        id:             row.get(0)?,
        subject_id:     row.get(1)?,
        status:         get_enum(row, 2, BlacklistStatus::parse)?,
        reason:         row.get(3)?,
        severity:       get_enum(row, 4, Severity::parse)?,
        blacklisted_by: row.get(5)?,
        blacklisted_at: get_ts(row, 6)?,
        expires_at:     get_opt_ts(row, 7)?,
        lifted_at:      get_opt_ts(row, 8)?,
        lifted_by:      row.get(9)?,
    })
}

fn appeal_row(row: &Row<'_>) -> rusqlite::Result<Appeal> {
    Ok(Appeal {
        id:          row.get(0)?,
        entry_id:    row.get(1)?,
        subject_id:  row.get(2)?,
        status:      get_enum(row, 3, AppealStatus::parse)?,
        statement:   row.get(4)?,
        filed_at:    get_ts(row, 5)?,
        decided_at:  get_opt_ts(row, 6)?,
        decided_by:  row.get(7)?,
        admin_notes: row.get(8)?,
    })
}

impl Db<'_> {
    // ── Entries ────────────────────────────────────────────────

    /// Insert a new entry. The partial unique index rejects a second ACTIVE
    /// entry for the same subject with a constraint violation.
    pub fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> TrustResult<()> {
        self.conn.execute(
            "INSERT INTO blacklist_entry (id, subject_id, status, reason, severity,
                 blacklisted_by, blacklisted_at, expires_at, lifted_at, lifted_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id,
                entry.subject_id,
                entry.status.as_str(),
                entry.reason,
                entry.severity.as_str(),
                entry.blacklisted_by,
                ts(entry.blacklisted_at),
                opt_ts(entry.expires_at),
                opt_ts(entry.lifted_at),
                entry.lifted_by,
            ],
        )?;
        Ok(())
    }

    pub fn get_blacklist_entry(&self, entry_id: &str) -> TrustResult<Option<BlacklistEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM blacklist_entry WHERE id = ?1"),
                params![entry_id],
                entry_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn update_blacklist_entry(&self, entry: &BlacklistEntry) -> TrustResult<()> {
        self.conn.execute(
            "UPDATE blacklist_entry
             SET status = ?2, reason = ?3, severity = ?4, lifted_at = ?5, lifted_by = ?6
             WHERE id = ?1",
            params![
                entry.id,
                entry.status.as_str(),
                entry.reason,
                entry.severity.as_str(),
                opt_ts(entry.lifted_at),
                entry.lifted_by,
            ],
        )?;
        Ok(())
    }

    /// The subject's ACTIVE entry, if any. Does not look at `expires_at`.
    pub fn active_blacklist_entry(&self, subject_id: &str) -> TrustResult<Option<BlacklistEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM blacklist_entry
                     WHERE subject_id = ?1 AND status = 'active'"
                ),
                params![subject_id],
                entry_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// ACTIVE entries whose expiry is at or before `now`.
    pub fn blacklist_entries_due(&self, now: Timestamp) -> TrustResult<Vec<BlacklistEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM blacklist_entry
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?1
             ORDER BY expires_at, id"
        ))?;
        let entries = stmt
            .query_map(params![ts(now)], entry_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn blacklist_entries_for(&self, subject_id: &str) -> TrustResult<Vec<BlacklistEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM blacklist_entry
             WHERE subject_id = ?1 ORDER BY blacklisted_at, rowid"
        ))?;
        let entries = stmt
            .query_map(params![subject_id], entry_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn blacklist_count_by_status(&self, status: BlacklistStatus) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM blacklist_entry WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Appeals ────────────────────────────────────────────────

    pub fn insert_appeal(&self, appeal: &Appeal) -> TrustResult<()> {
        self.conn.execute(
            "INSERT INTO appeal (id, entry_id, subject_id, status, statement, filed_at,
                 decided_at, decided_by, admin_notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                appeal.id,
                appeal.entry_id,
                appeal.subject_id,
                appeal.status.as_str(),
                appeal.statement,
                ts(appeal.filed_at),
                opt_ts(appeal.decided_at),
                appeal.decided_by,
                appeal.admin_notes,
            ],
        )?;
        Ok(())
    }

    pub fn get_appeal(&self, appeal_id: &str) -> TrustResult<Option<Appeal>> {
        let appeal = self
            .conn
            .query_row(
                &format!("SELECT {APPEAL_COLUMNS} FROM appeal WHERE id = ?1"),
                params![appeal_id],
                appeal_row,
            )
            .optional()?;
        Ok(appeal)
    }

    pub fn update_appeal(&self, appeal: &Appeal) -> TrustResult<()> {
        self.conn.execute(
            "UPDATE appeal SET status = ?2, decided_at = ?3, decided_by = ?4, admin_notes = ?5
             WHERE id = ?1",
            params![
                appeal.id,
                appeal.status.as_str(),
                opt_ts(appeal.decided_at),
                appeal.decided_by,
                appeal.admin_notes,
            ],
        )?;
        Ok(())
    }

    pub fn pending_appeal_for_entry(&self, entry_id: &str) -> TrustResult<Option<Appeal>> {
        let appeal = self
            .conn
            .query_row(
                &format!(
                    "SELECT {APPEAL_COLUMNS} FROM appeal WHERE entry_id = ?1 AND status = 'pending'"
                ),
                params![entry_id],
                appeal_row,
            )
            .optional()?;
        Ok(appeal)
    }

    pub fn appeals_for_entry(&self, entry_id: &str) -> TrustResult<Vec<Appeal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {APPEAL_COLUMNS} FROM appeal WHERE entry_id = ?1 ORDER BY filed_at, rowid"
        ))?;
        let appeals = stmt
            .query_map(params![entry_id], appeal_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(appeals)
    }
}
