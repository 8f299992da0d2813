//! # mqvault - Message Persistence for MQTT v5 Brokers
//!
//! mqvault is the in-process persistence core loaded by a standards-
//! compliant MQTT v5 broker. Every application message the broker accepts
//! is durably recorded into an embedded SQLite file, keyed by a
//! time-sortable ULID that is also attached to the outbound publish so
//! subscribers can reference the stored row.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Host Broker                              │
//! │            (publish thread, one callback per message)           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ on_message
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Event Handler                             │
//! │   mint id ─ exclusion filter ─ delete intent ─ compose row      │
//! └────────────┬──────────────────────────────────────┬─────────────┘
//!              │ enqueue                              │ latest-id lookup
//!              ▼                                      ▼
//! ┌───────────────────────────┐          ┌───────────────────────────┐
//! │        Write Queue        │          │    TopicReader (WAL,      │
//! │  (bounded FIFO, condvar)  │          │       read-only)          │
//! └────────────┬──────────────┘          └────────────┬──────────────┘
//!              │ drain                                │
//!              ▼                                      │
//! ┌───────────────────────────┐                       │
//! │  Batch Writer (thread)    │                       │
//! │  transactional batches,   │                       │
//! │  hourly retention sweep   │                       │
//! └────────────┬──────────────┘                       │
//!              ▼                                      ▼
//!        ┌─────────────────────────────────────────────────┐
//!        │                SQLite (WAL)                     │
//!        └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. Ids minted by one instance are strictly increasing byte strings.
//! 2. A delete request (retained publish, empty payload) never produces
//!    an insert row.
//! 3. The write queue never exceeds its hard cap; overflow drops the
//!    oldest entry, never crashes or corrupts state.
//! 4. Every prepared statement has exactly one owner.
//! 5. Shutdown drains the queue completely before the store closes.
//!
//! ## Entry Points
//!
//! The host calls four things: [`negotiate_version`] during discovery,
//! [`Plugin::init`] with its option list, [`Plugin::on_message`] once per
//! accepted publish, and [`Plugin::shutdown`] at unload.

/// Error types for all failure modes.
pub mod error;

/// ULID generation, encoding and decoding.
pub mod ulid;

/// MQTT topic filter matching and pattern-list parsing.
pub mod matcher;

/// Domain types: events, records, queue entries.
pub mod types;

/// Option parsing into the immutable plugin configuration.
pub mod config;

/// SQLite DDL and database initialization.
pub mod schema;

/// Store adapters: batched writes, retention purge, latest-id lookup.
pub mod store;

/// The bounded producer/consumer write queue.
pub mod queue;

/// The batch writer thread and retention sweeper.
pub mod writer;

/// The per-message policy.
mod handler;

/// Lifecycle: version negotiation, init, callback, shutdown.
pub mod plugin;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::PluginConfig;
pub use error::{Error, Result};
pub use plugin::{negotiate_version, Plugin, BROKER_INTERFACE_VERSION};
pub use schema::Database;
pub use types::{MessageEvent, MessageRecord, QueueEntry, UserProperty, HEADER_SEPARATOR, ID_PROPERTY};
pub use ulid::{GeneratorOptions, Ulid, UlidGenerator};
