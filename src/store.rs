//! # Store Adapters
//!
//! Serialized access to the on-disk message database, split the same way
//! the threads are:
//!
//! ```text
//! publish thread                      writer thread
//! ┌──────────────────┐               ┌──────────────────┐
//! │   TopicReader    │               │      Store       │
//! │  (read-only WAL  │               │  (writer conn,   │
//! │   connection)    │               │   batches+purge) │
//! └────────┬─────────┘               └────────┬─────────┘
//!          │          ┌───────────┐           │
//!          └─────────►│  SQLite   │◄──────────┘
//!                     │   (WAL)   │
//!                     └───────────┘
//! ```
//!
//! [`Store`] owns the single writer connection; every mutation in the
//! process goes through it, on the writer thread. [`TopicReader`] is a
//! read-only connection used synchronously by the event handler to
//! resolve delete targets; WAL journaling is what lets it read a
//! consistent snapshot while a batch commits.
//!
//! ## Prepared Statements
//!
//! Each adapter prepares its statements through the connection's statement
//! cache, warmed at construction. A statement is therefore compiled once,
//! reset after every use, owned by exactly one adapter, and finalized when
//! that adapter's connection drops.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, error};

use crate::error::Result;
use crate::schema::Database;
use crate::types::QueueEntry;
use crate::ulid::Ulid;

// =============================================================================
// SQL
// =============================================================================

const SQL_INSERT: &str =
    "INSERT INTO msg (id, topic, payload, retain, qos, headers) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Deletes require both topic and id to match, so an id addressed at the
/// wrong topic removes nothing.
const SQL_DELETE: &str = "DELETE FROM msg WHERE topic = ?1 AND id = ?2";

/// Backed by the `(topic, id DESC)` index: one probe, no sort.
const SQL_LATEST: &str = "SELECT id FROM msg WHERE topic = ?1 ORDER BY id DESC LIMIT 1";

/// Ids sort by time, so the retention sweep is a primary-key range scan.
const SQL_PURGE: &str = "DELETE FROM msg WHERE id < ?1";

// =============================================================================
// Batch Outcome
// =============================================================================

/// What happened to one batch.
///
/// Per-row failures do not abort a batch and commit failures do not stop
/// the writer; this struct carries the counts for the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entries handed to the batch.
    pub attempted: usize,

    /// Entries whose statement step failed; logged and skipped.
    pub failed_rows: usize,

    /// False when the transaction itself failed to begin or commit; the
    /// whole batch is then lost (at-most-once persistence).
    pub committed: bool,
}

// =============================================================================
// Store (write side)
// =============================================================================

/// The write-side adapter. Owns the writer connection; lives on the
/// writer thread.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Takes over an initialized database and warms the statement cache,
    /// so statement compilation errors surface at init instead of on the
    /// first batch.
    pub fn new(db: Database) -> Result<Self> {
        let conn = db.into_connection();
        for sql in [SQL_INSERT, SQL_DELETE, SQL_PURGE] {
            conn.prepare_cached(sql)?;
        }
        Ok(Self { conn })
    }

    /// Executes one batch of queue entries inside a single transaction.
    ///
    /// Entries run strictly in the order given, so a delete enqueued after
    /// an insert of the same id observes it within the same batch. A row
    /// that fails to step is logged and skipped; the rest of the batch
    /// proceeds. A failed BEGIN or COMMIT loses the batch: entries are
    /// never requeued, because the broker owns delivery guarantees and
    /// this store is a telemetry sink.
    pub fn apply_batch(&mut self, entries: &[QueueEntry]) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            attempted: entries.len(),
            failed_rows: 0,
            committed: false,
        };

        if entries.is_empty() {
            outcome.committed = true;
            return outcome;
        }

        if let Err(e) = self.conn.execute_batch("BEGIN IMMEDIATE") {
            error!(error = %e, "failed to begin batch transaction");
            return outcome;
        }

        for entry in entries {
            if let Err(e) = self.step_entry(entry) {
                outcome.failed_rows += 1;
                match entry {
                    QueueEntry::Insert(record) => {
                        error!(topic = %record.topic, error = %e, "batch insert failed");
                    }
                    QueueEntry::Delete { topic, id } => {
                        error!(topic = %topic, id = %id, error = %e, "batch delete failed");
                    }
                }
            }
        }

        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                outcome.committed = true;
                debug!(
                    committed = outcome.attempted - outcome.failed_rows,
                    attempted = outcome.attempted,
                    "batch committed"
                );
            }
            Err(e) => {
                error!(error = %e, "failed to commit batch, dropping it");
                let _ = self.conn.execute_batch("ROLLBACK");
            }
        }

        outcome
    }

    /// Binds and steps the statement for one entry.
    fn step_entry(&mut self, entry: &QueueEntry) -> Result<()> {
        match entry {
            QueueEntry::Insert(record) => {
                let mut stmt = self.conn.prepare_cached(SQL_INSERT)?;
                // The payload binds as raw bytes: the column's TEXT
                // affinity never rewrites blobs, so every payload byte
                // survives.
                stmt.execute(params![
                    record.id.as_str(),
                    record.topic,
                    record.payload,
                    record.retain,
                    record.qos as i64,
                    record.headers,
                ])?;
            }
            QueueEntry::Delete { topic, id } => {
                let mut stmt = self.conn.prepare_cached(SQL_DELETE)?;
                let changes = stmt.execute(params![topic, id.as_str()])?;
                debug!(topic = %topic, id = %id, changes, "deleted stored message");
            }
        }
        Ok(())
    }

    /// Deletes all rows older than the given id.
    ///
    /// Returns the number of rows removed.
    pub fn purge_older_than(&mut self, cutoff: &Ulid) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(SQL_PURGE)?;
        let removed = stmt.execute(params![cutoff.as_str()])?;
        Ok(removed)
    }
}

// =============================================================================
// TopicReader (read side)
// =============================================================================

/// Read-only adapter resolving the most recent id stored for a topic.
///
/// Owned by the event handler on the broker's publish thread; used only
/// for the delete-intent fallback, which is rare. Opened with
/// `SQLITE_OPEN_READ_ONLY`, so it cannot contend for the write lock.
#[derive(Debug)]
pub struct TopicReader {
    conn: Connection,
}

impl TopicReader {
    /// Opens a read-only connection to an already-initialized database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.prepare_cached(SQL_LATEST)?;
        Ok(Self { conn })
    }

    /// Returns the latest (greatest) id stored for a topic, if any.
    pub fn latest_id(&self, topic: &str) -> Result<Option<Ulid>> {
        let mut stmt = self.conn.prepare_cached(SQL_LATEST)?;
        let id: Option<String> = stmt
            .query_row(params![topic], |row| row.get(0))
            .optional()?;

        match id {
            Some(s) => Ok(Some(Ulid::parse(&s)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
