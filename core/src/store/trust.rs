//! Live trust record queries.

use super::{get_enum, get_json, get_opt_ts, opt_ts, Db};
use crate::{
    error::{TrustError, TrustResult},
    model::{RiskLevel, SubjectKind, TrustRecord},
};
use rusqlite::{params, OptionalExtension};

impl Db<'_> {
    pub fn get_trust_record(&self, subject_id: &str) -> TrustResult<Option<TrustRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT subject_id, kind, overall_score, risk_level, risk_category, sub_scores,
                        last_transaction_at, last_flag_at, score_last_updated_at, version
                 FROM trust_record WHERE subject_id = ?1",
                params![subject_id],
                |row| {
                    Ok(TrustRecord {
                        subject_id:            row.get(0)?,
                        kind:                  get_enum(row, 1, SubjectKind::parse)?,
                        overall_score:         row.get(2)?,
                        risk_level:            get_enum(row, 3, RiskLevel::parse)?,
                        risk_category:         row.get(4)?,
                        sub_scores:            get_json(row, 5)?,
                        last_transaction_at:   get_opt_ts(row, 6)?,
                        last_flag_at:          get_opt_ts(row, 7)?,
                        score_last_updated_at: get_opt_ts(row, 8)?,
                        version:               row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Compare-and-swap write of the live record.
    ///
    /// `expected_version` is the version the caller read (0 when the record did not
    /// exist). Fails with `ConcurrentModification` if anyone committed in between.
    pub fn save_trust_record(&self, record: &TrustRecord, expected_version: i64) -> TrustResult<()> {
        let sub_scores = serde_json::to_string(&record.sub_scores)?;
        let changed = if expected_version == 0 {
            self.conn.execute(
                "INSERT INTO trust_record (subject_id, kind, overall_score, risk_level, risk_category,
                     sub_scores, last_transaction_at, last_flag_at, score_last_updated_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (subject_id) DO NOTHING",
                params![
                    record.subject_id,
                    record.kind.as_str(),
                    record.overall_score,
                    record.risk_level.as_str(),
                    record.risk_category,
                    sub_scores,
                    opt_ts(record.last_transaction_at),
                    opt_ts(record.last_flag_at),
                    opt_ts(record.score_last_updated_at),
                    record.version,
                ],
            )?
        } else {
            self.conn.execute(
                "UPDATE trust_record
                 SET overall_score = ?2, risk_level = ?3, risk_category = ?4, sub_scores = ?5,
                     last_transaction_at = ?6, last_flag_at = ?7, score_last_updated_at = ?8,
                     version = ?9
                 WHERE subject_id = ?1 AND version = ?10",
                params![
                    record.subject_id,
                    record.overall_score,
                    record.risk_level.as_str(),
                    record.risk_category,
                    sub_scores,
                    opt_ts(record.last_transaction_at),
                    opt_ts(record.last_flag_at),
                    opt_ts(record.score_last_updated_at),
                    record.version,
                    expected_version,
                ],
            )?
        };
        if changed == 0 {
            return Err(TrustError::ConcurrentModification {
                subject_id: record.subject_id.clone(),
            });
        }
        Ok(())
    }

    pub fn trust_record_count(&self) -> TrustResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM trust_record", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of records currently at `level` (runner summaries).
    pub fn trust_record_count_at(&self, level: RiskLevel) -> TrustResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trust_record WHERE risk_level = ?1",
            params![level.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
