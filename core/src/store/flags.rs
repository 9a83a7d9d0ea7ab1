//! Flag registry queries.

use super::{get_enum, get_opt_ts, get_ts, opt_ts, ts, Db};
use crate::{
    error::TrustResult,
    flag::{FlagStatus, RiskFlag, Severity},
    types::Timestamp,
};
use rusqlite::{params, OptionalExtension, Row};

const FLAG_COLUMNS: &str = "id, subject_id, status, severity, category, description, raised_by,
     raised_at, resolved_at, review_notes, reviewer_id";

// Open = neither resolved nor false positive.
const OPEN_STATUSES: &str = "('active', 'under_review')";

fn flag_row(row: &Row<'_>) -> rusqlite::Result<RiskFlag> {
    Ok(RiskFlag {
        id:           row.get(0)?,
        subject_id:   row.get(1)?,
        status:       get_enum(row, 2, FlagStatus::parse)?,
        severity:     get_enum(row, 3, Severity::parse)?,
        category:     row.get(4)?,
        description:  row.get(5)?,
        raised_by:    row.get(6)?,
        raised_at:    get_ts(row, 7)?,
        resolved_at:  get_opt_ts(row, 8)?,
        review_notes: row.get(9)?,
        reviewer_id:  row.get(10)?,
    })
}

impl Db<'_> {
    pub fn insert_flag(&self, flag: &RiskFlag) -> TrustResult<()> {
        self.conn.execute(
            "INSERT INTO risk_flag (id, subject_id, status, severity, category, description,
                 raised_by, raised_at, resolved_at, review_notes, reviewer_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                flag.id,
                flag.subject_id,
                flag.status.as_str(),
                flag.severity.as_str(),
                flag.category,
                flag.description,
                flag.raised_by,
                ts(flag.raised_at),
                opt_ts(flag.resolved_at),
                flag.review_notes,
                flag.reviewer_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_flag(&self, flag_id: &str) -> TrustResult<Option<RiskFlag>> {
        let flag = self
            .conn
            .query_row(
                &format!("SELECT {FLAG_COLUMNS} FROM risk_flag WHERE id = ?1"),
                params![flag_id],
                flag_row,
            )
            .optional()?;
        Ok(flag)
    }

    /// Persist the mutable lifecycle columns of a flag.
    pub fn update_flag(&self, flag: &RiskFlag) -> TrustResult<()> {
        self.conn.execute(
            "UPDATE risk_flag
             SET status = ?2, resolved_at = ?3, review_notes = ?4, reviewer_id = ?5
             WHERE id = ?1",
            params![
                flag.id,
                flag.status.as_str(),
                opt_ts(flag.resolved_at),
                flag.review_notes,
                flag.reviewer_id,
            ],
        )?;
        Ok(())
    }

    /// Every flag of a subject, oldest first.
    pub fn flags_for_subject(&self, subject_id: &str) -> TrustResult<Vec<RiskFlag>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FLAG_COLUMNS} FROM risk_flag WHERE subject_id = ?1 ORDER BY raised_at, rowid"
        ))?;
        let flags = stmt
            .query_map(params![subject_id], flag_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(flags)
    }

    pub fn open_flag_count(&self, subject_id: &str) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM risk_flag WHERE subject_id = ?1 AND status IN {OPEN_STATUSES}"
            ),
            params![subject_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn open_flag_severities(&self, subject_id: &str) -> TrustResult<Vec<Severity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT severity FROM risk_flag WHERE subject_id = ?1 AND status IN {OPEN_STATUSES}"
        ))?;
        let severities = stmt
            .query_map(params![subject_id], |row| get_enum(row, 0, Severity::parse))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(severities)
    }

    /// Flags ever raised against the subject, whatever their state.
    pub fn flag_count(&self, subject_id: &str) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM risk_flag WHERE subject_id = ?1",
            params![subject_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn last_flag_raised_at(&self, subject_id: &str) -> TrustResult<Option<Timestamp>> {
        let latest = self
            .conn
            .query_row(
                "SELECT raised_at FROM risk_flag WHERE subject_id = ?1
                 ORDER BY raised_at DESC LIMIT 1",
                params![subject_id],
                |row| get_ts(row, 0),
            )
            .optional()?;
        Ok(latest)
    }

    pub fn flag_count_by_status(&self, status: FlagStatus) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM risk_flag WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
