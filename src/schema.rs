//! # SQLite Schema
//!
//! Defines the message table and handles database initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  msg                                                         │
//! │  ┌─────────────────────────────┐                             │
//! │  │ id       TEXT PRIMARY KEY   │ ◄── 26-char ULID; string    │
//! │  │ topic    TEXT NOT NULL      │     order = publish order   │
//! │  │ payload  TEXT NOT NULL      │                             │
//! │  │ retain   INT                │   indexes:                  │
//! │  │ qos      INT                │     msg_topic(topic)        │
//! │  │ headers  TEXT NULL          │     msg_topic_id(topic,     │
//! │  └─────────────────────────────┘                  id DESC)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Index Design
//!
//! The primary key is the ULID, so a plain B-tree range scan over `id`
//! is a scan over time: the retention sweeper deletes with a single
//! `id < ?` predicate. The compound `(topic, id DESC)` index serves the
//! "latest row for this topic" lookup that backs retained-message
//! deletion; the plain `topic` index serves the external query engine
//! reading this file.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment on breaking schema changes.
///
/// There is no migration path: a version mismatch fails initialization,
/// and the deployment decides what to do with the old file.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The single message table.
///
/// # Columns
///
/// - `id`: 26-character Crockford base-32 ULID; the timestamp prefix makes
///   lexicographic order equal chronological order
/// - `topic`: the MQTT topic as delivered by the broker
/// - `payload`: the application payload; declared TEXT, but written as raw
///   bytes so arbitrary payloads survive unmodified
/// - `retain`: retain flag of the source publish (0/1)
/// - `qos`: QoS of the source publish (0..=2)
/// - `headers`: serialized surviving user properties, NULL when none were
///   stored
const CREATE_MSG: &str = r#"
CREATE TABLE IF NOT EXISTS msg (
    id      TEXT PRIMARY KEY,
    topic   TEXT NOT NULL,
    payload TEXT NOT NULL,
    retain  INT,
    qos     INT,
    headers TEXT NULL
)
"#;

/// Plain topic index for the external query engine.
const CREATE_TOPIC_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS msg_topic ON msg(topic)
"#;

/// Compound index serving "latest id for this topic" as a single
/// backwards index probe.
const CREATE_TOPIC_ID_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS msg_topic_id ON msg(topic, id DESC)
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS mqvault_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the mqvault schema applied.
///
/// # Ownership
///
/// `Database` owns its `Connection`; dropping it closes the file. The
/// store adapters take the connection over via [`Database::into_connection`]
/// once initialization succeeded.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - [`Error::Sqlite`] if the file cannot be opened or created; fatal
    ///   to plugin initialization
    /// - [`Error::Schema`] if the file carries a different schema version
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Applies pragmas, DDL and the version check. Idempotent.
    fn initialize(&mut self) -> Result<()> {
        // WAL keeps concurrent readers (the latest-id lookup on the
        // publish thread, the external query engine) off the writer's
        // back: readers see a consistent snapshot while batches commit.
        // This pragma reports the resulting mode as a row, so it goes
        // through query_row.
        let _mode: String =
            self.conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        // Sync the WAL on commit only. A power cut can cost the last
        // batch, which is within this sink's at-most-once contract.
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_MSG)?;
        self.conn.execute_batch(CREATE_TOPIC_INDEX)?;
        self.conn.execute_batch(CREATE_TOPIC_ID_INDEX)?;

        self.verify_or_set_version()?;

        Ok(())
    }

    /// Verifies the schema version, or records it on a fresh database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<i32> = self
            .conn
            .query_row(
                "SELECT value FROM mqvault_metadata WHERE key = 'schema_version'",
                [],
                |row| {
                    let s: String = row.get(0)?;
                    Ok(s.parse().unwrap_or(0))
                },
            )
            .ok();

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO mqvault_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Releases the underlying connection to a store adapter.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
