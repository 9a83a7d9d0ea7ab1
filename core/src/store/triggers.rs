//! Durable recalculation triggers and the event outbox.

use super::{get_enum, get_ts, ts, Db};
use crate::{
    error::TrustResult,
    event::{Channel, EventLogEntry},
    model::{PendingTrigger, TriggerReason},
    types::Timestamp,
};
use rusqlite::{params, Row};

fn trigger_row(row: &Row<'_>) -> rusqlite::Result<PendingTrigger> {
    Ok(PendingTrigger {
        id:          row.get(0)?,
        subject_id:  row.get(1)?,
        reason:      get_enum(row, 2, TriggerReason::parse)?,
        enqueued_at: get_ts(row, 3)?,
    })
}

impl Db<'_> {
    // ── Pending triggers ───────────────────────────────────────

    pub fn enqueue_trigger(
        &self,
        subject_id: &str,
        reason:     TriggerReason,
        at:         Timestamp,
    ) -> TrustResult<PendingTrigger> {
        self.conn.execute(
            "INSERT INTO pending_trigger (subject_id, reason, enqueued_at) VALUES (?1, ?2, ?3)",
            params![subject_id, reason.as_str(), ts(at)],
        )?;
        Ok(PendingTrigger {
            id: self.conn.last_insert_rowid(),
            subject_id: subject_id.to_string(),
            reason,
            enqueued_at: at,
        })
    }

    /// Remove a consumed trigger. Returns false if it was already consumed.
    pub fn delete_trigger(&self, trigger_id: i64) -> TrustResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM pending_trigger WHERE id = ?1", params![trigger_id])?;
        Ok(n > 0)
    }

    pub fn trigger_pending(&self, trigger_id: i64) -> TrustResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_trigger WHERE id = ?1",
            params![trigger_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Every queued trigger, oldest first.
    pub fn pending_triggers(&self) -> TrustResult<Vec<PendingTrigger>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_id, reason, enqueued_at FROM pending_trigger ORDER BY id ASC",
        )?;
        let triggers = stmt
            .query_map([], trigger_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(triggers)
    }

    // ── Event outbox ───────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> TrustResult<i64> {
        self.conn.execute(
            "INSERT INTO event_log (subject_id, channel, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.subject_id,
                entry.channel.as_str(),
                entry.event_type,
                entry.payload,
                ts(entry.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn events_for_subject(&self, subject_id: &str) -> TrustResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_id, channel, event_type, payload, created_at
             FROM event_log WHERE subject_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![subject_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    subject_id: row.get(1)?,
                    channel:    get_enum(row, 2, Channel::parse)?,
                    event_type: row.get(3)?,
                    payload:    row.get(4)?,
                    created_at: get_ts(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
