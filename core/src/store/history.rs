//! Append-only score history. There is no update or delete method, and the
//! schema aborts any attempt made behind the store's back.

use super::{get_enum, get_json, get_ts, ts, Db};
use crate::{
    error::TrustResult,
    model::{RiskLevel, ScoreHistoryEntry, TriggerReason},
};
use rusqlite::{params, Row};

const HISTORY_COLUMNS: &str = "id, subject_id, previous_score, new_score, risk_level_before,
     risk_level_after, trigger_reason, sub_scores, created_at";

fn history_row(row: &Row<'_>) -> rusqlite::Result<ScoreHistoryEntry> {
    Ok(ScoreHistoryEntry {
        id:                Some(row.get(0)?),
        subject_id:        row.get(1)?,
        previous_score:    row.get(2)?,
        new_score:         row.get(3)?,
        risk_level_before: get_enum(row, 4, RiskLevel::parse)?,
        risk_level_after:  get_enum(row, 5, RiskLevel::parse)?,
        trigger_reason:    get_enum(row, 6, TriggerReason::parse)?,
        sub_scores:        get_json(row, 7)?,
        created_at:        get_ts(row, 8)?,
    })
}

impl Db<'_> {
    /// Append one snapshot. Returns its row id.
    pub fn append_history(&self, entry: &ScoreHistoryEntry) -> TrustResult<i64> {
        self.conn.execute(
            "INSERT INTO score_history (subject_id, previous_score, new_score, risk_level_before,
                 risk_level_after, trigger_reason, sub_scores, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.subject_id,
                entry.previous_score,
                entry.new_score,
                entry.risk_level_before.as_str(),
                entry.risk_level_after.as_str(),
                entry.trigger_reason.as_str(),
                serde_json::to_string(&entry.sub_scores)?,
                ts(entry.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Full history of one subject, oldest first.
    pub fn score_history(&self, subject_id: &str) -> TrustResult<Vec<ScoreHistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM score_history WHERE subject_id = ?1 ORDER BY id ASC"
        ))?;
        let entries = stmt
            .query_map(params![subject_id], history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn history_count(&self, subject_id: &str) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM score_history WHERE subject_id = ?1",
            params![subject_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn history_count_total(&self) -> TrustResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM score_history", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn history_count_for_reason(&self, subject_id: &str, reason: TriggerReason) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM score_history WHERE subject_id = ?1 AND trigger_reason = ?2",
            params![subject_id, reason.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
