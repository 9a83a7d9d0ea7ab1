//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine calls `Db` methods inside `read` / `write`; it never executes SQL directly.
//!
//! `write` runs its closure inside one IMMEDIATE transaction: either every row the
//! closure touched is committed, or none is.

use crate::{
    error::{TrustError, TrustResult},
    types::Timestamp,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{types::Type, Connection, Row, TransactionBehavior};

mod activity;
mod blacklist;
mod flags;
mod history;
mod notes;
mod triggers;
mod trust;

pub use activity::TransactionCounts;

pub struct TrustStore {
    conn: Mutex<Connection>,
}

/// A borrowed connection or open transaction. All queries live on `Db`.
pub struct Db<'c> {
    conn: &'c Connection,
}

impl TrustStore {
    pub fn open(path: &str) -> TrustResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> TrustResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> TrustResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../../migrations/001_trust_foundation.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_flags_blacklist.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/003_activity_notes.sql"))?;
        Ok(())
    }

    /// Run read-only queries against the current committed state.
    pub fn read<T>(&self, f: impl FnOnce(&Db<'_>) -> TrustResult<T>) -> TrustResult<T> {
        let conn = self.conn.lock();
        f(&Db { conn: &conn })
    }

    /// Run `f` inside a single transaction. An `Err` from `f` rolls everything back.
    pub fn write<T>(&self, f: impl FnOnce(&Db<'_>) -> TrustResult<T>) -> TrustResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&Db { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }

    /// Raw SQL escape hatch for tooling and fault-injection tests.
    pub fn execute_batch(&self, sql: &str) -> TrustResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

/// True when `err` is a UNIQUE / CHECK constraint rejection rather than an I/O failure.
pub(crate) fn is_constraint_violation(err: &TrustError) -> bool {
    matches!(
        err,
        TrustError::Persistence(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ── Column helpers ─────────────────────────────────────────────

/// Fixed-width RFC 3339 so that text order equals time order in SQL comparisons.
pub(crate) fn ts(at: Timestamp) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_ts(at: Option<Timestamp>) -> Option<String> {
    at.map(ts)
}

fn invalid_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| invalid_column(idx, format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| invalid_column(idx, format!("bad timestamp '{r}': {e}")))
    })
    .transpose()
}

pub(crate) fn get_enum<T>(
    row:   &Row<'_>,
    idx:   usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| invalid_column(idx, format!("unrecognised value '{raw}'")))
}

pub(crate) fn get_json<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
