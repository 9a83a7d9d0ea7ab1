//! Seller notes. Advisory only; scoring never reads this table.

use super::{get_ts, ts, Db};
use crate::{error::TrustResult, model::SellerNote};
use rusqlite::params;

impl Db<'_> {
    pub fn insert_seller_note(&self, note: &SellerNote) -> TrustResult<()> {
        self.conn.execute(
            "INSERT INTO seller_note (id, subject_id, author_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![note.id, note.subject_id, note.author_id, note.body, ts(note.created_at)],
        )?;
        Ok(())
    }

    pub fn seller_notes(&self, subject_id: &str) -> TrustResult<Vec<SellerNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_id, author_id, body, created_at FROM seller_note
             WHERE subject_id = ?1 ORDER BY created_at, rowid",
        )?;
        let notes = stmt
            .query_map(params![subject_id], |row| {
                Ok(SellerNote {
                    id:         row.get(0)?,
                    subject_id: row.get(1)?,
                    author_id:  row.get(2)?,
                    body:       row.get(3)?,
                    created_at: get_ts(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }
}
