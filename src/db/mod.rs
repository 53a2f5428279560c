//! SQLite-backed reference store implementing the portal data contract.
//!
//! The database lives at `~/.patina/patina.db`. In production the portal
//! runs against the managed backend; this store implements the same
//! contract — entity CRUD returning joined row shapes, column filters,
//! ordering, and a change feed emitting partial-row events after every
//! committed mutation — so the core is exercisable end-to-end without it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::types::{ChangeEvent, ChangeKind, PartialRow, Table};

mod comms;
mod customers;
mod pipeline;
mod stains;

pub use customers::CustomerInput;

pub struct PortalDb {
    conn: Connection,
    feed: Arc<ChangeFeed>,
}

impl PortalDb {
    /// Open (or create) the database at `~/.patina/patina.db` and apply the
    /// schema.
    pub fn open(feed: Arc<ChangeFeed>) -> Result<Self, StoreError> {
        let path = Self::db_path()?;
        Self::open_at(path, feed)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf, feed: Arc<ChangeFeed>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read behaviour
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(StoreError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn, feed })
    }

    /// Open an in-memory database. Test-only convenience.
    pub fn open_in_memory(feed: Arc<ChangeFeed>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        crate::migrations::run_migrations(&conn).map_err(StoreError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, feed })
    }

    fn db_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::NoHomeDir)?;
        Ok(home.join(".patina").join("patina.db"))
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// The change feed mutations are published to.
    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Publish a change event after a committed mutation.
    pub(crate) fn emit(
        &self,
        table: Table,
        kind: ChangeKind,
        new: Option<PartialRow>,
        old: Option<PartialRow>,
    ) {
        self.feed.emit(ChangeEvent {
            table,
            kind,
            new,
            old,
        });
    }
}

/// Canonical timestamp text written to the store: RFC 3339 UTC with
/// millisecond precision, so lexicographic order equals chronological order.
pub(crate) fn ts_text(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_text() -> String {
    ts_text(Utc::now())
}

/// Read an RFC 3339 timestamp column.
pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s, idx)
}

/// Read an optional RFC 3339 timestamp column.
pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(&s, idx)).transpose()
}

fn parse_ts(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Read a closed-enum text column via its `parse` function.
pub(crate) fn enum_col<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized enum value: {s}").into(),
        )
    })
}
