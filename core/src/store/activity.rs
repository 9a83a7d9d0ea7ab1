//! Transaction outcomes recorded against a subject.

use super::{get_ts, ts, Db};
use crate::{error::TrustResult, model::TransactionOutcome, types::Timestamp};
use rusqlite::{params, OptionalExtension};

/// Outcome counts feeding the transaction sub-score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionCounts {
    pub completed: i64,
    pub disputed:  i64,
    pub refunded:  i64,
}

impl TransactionCounts {
    pub fn total(&self) -> i64 {
        self.completed + self.disputed + self.refunded
    }
}

impl Db<'_> {
    pub fn insert_transaction_outcome(
        &self,
        subject_id: &str,
        outcome:    TransactionOutcome,
        at:         Timestamp,
    ) -> TrustResult<()> {
        self.conn.execute(
            "INSERT INTO transaction_outcome (subject_id, outcome, recorded_at) VALUES (?1, ?2, ?3)",
            params![subject_id, outcome.as_str(), ts(at)],
        )?;
        Ok(())
    }

    pub fn transaction_counts(&self, subject_id: &str) -> TrustResult<TransactionCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT outcome, COUNT(*) FROM transaction_outcome
             WHERE subject_id = ?1 GROUP BY outcome",
        )?;
        let mut counts = TransactionCounts::default();
        let rows = stmt.query_map(params![subject_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (outcome, n) = row?;
            match TransactionOutcome::parse(&outcome) {
                Some(TransactionOutcome::Completed) => counts.completed = n,
                Some(TransactionOutcome::Disputed)  => counts.disputed = n,
                Some(TransactionOutcome::Refunded)  => counts.refunded = n,
                None => log::warn!("subject={subject_id} unknown transaction outcome '{outcome}'"),
            }
        }
        Ok(counts)
    }

    pub fn last_transaction_at(&self, subject_id: &str) -> TrustResult<Option<Timestamp>> {
        let latest = self
            .conn
            .query_row(
                "SELECT recorded_at FROM transaction_outcome WHERE subject_id = ?1
                 ORDER BY recorded_at DESC LIMIT 1",
                params![subject_id],
                |row| get_ts(row, 0),
            )
            .optional()?;
        Ok(latest)
    }
}
