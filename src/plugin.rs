//! # Plugin Lifecycle
//!
//! The broker-facing surface: version negotiation, initialization, the
//! message callback, and cleanup.
//!
//! ## States
//!
//! ```text
//! Unloaded ──init()──► Initializing ──ok──► Running
//!     ▲                      │                 │
//!     │                  any failure       shutdown()
//!     │                      │                 ▼
//!     └──────────────────────┴───────────── Draining
//! ```
//!
//! Initializing acquires resources in dependency order: configuration,
//! database (schema applied), store adapters, id generator, queue, writer
//! thread. A failure at any step drops everything acquired so far and
//! returns the error; the host then declines to register the plugin.
//!
//! Draining happens in [`Plugin::shutdown`] or on drop: the writer's stop
//! flag is set, the condvar woken, and the thread joined after its final
//! untimed drain. Only then do the adapters drop, finalizing their
//! statements and closing the file.
//!
//! ## One Context, No Globals
//!
//! All state lives in the [`Plugin`] value the host threads through its
//! user-data slot. Nothing is process-global, so tests (and brokers with
//! several listeners) can run multiple instances side by side, each with
//! its own database.

use std::sync::Arc;

use tracing::info;

use crate::config::PluginConfig;
use crate::error::Result;
use crate::handler::MessageHandler;
use crate::queue::WriteQueue;
use crate::schema::Database;
use crate::store::{Store, TopicReader};
use crate::types::MessageEvent;
use crate::ulid::{GeneratorOptions, UlidGenerator};
use crate::writer::{spawn_writer, WriterHandle};

// =============================================================================
// Version Negotiation
// =============================================================================

/// The only broker plugin-interface version this crate speaks.
pub const BROKER_INTERFACE_VERSION: i32 = 5;

/// Picks the supported interface version from the broker's offer.
///
/// Returns `Some(5)` iff version 5 is offered, `None` otherwise; the
/// host treats `None` as "do not load".
pub fn negotiate_version(supported_versions: &[i32]) -> Option<i32> {
    supported_versions
        .iter()
        .find(|&&v| v == BROKER_INTERFACE_VERSION)
        .copied()
}

// =============================================================================
// Plugin
// =============================================================================

/// A fully-wired plugin instance.
///
/// Owns every resource the plugin holds: the handler (with generator and
/// read connection) on the publish-thread side, and the writer thread
/// (with the write connection) on the background side.
#[derive(Debug)]
pub struct Plugin {
    handler: MessageHandler,

    /// `None` only after shutdown has run. The handle's own drop joins
    /// the thread, so an instance dropped without an explicit shutdown
    /// still drains.
    writer: Option<WriterHandle>,
}

impl Plugin {
    /// Initializes the plugin from the broker's option list.
    ///
    /// # Errors
    ///
    /// Any failure (database open, schema mismatch, statement
    /// preparation, entropy in secure mode, thread spawn) is fatal:
    /// resources acquired before the failure are dropped, and the error
    /// is returned for the host to report. Configuration values never
    /// cause an error; out-of-range options fall back to defaults.
    pub fn init<'a>(options: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let config = Arc::new(PluginConfig::from_options(options));

        let db = Database::open(&config.db_path)?;
        info!(path = %config.db_path.display(), "opened message database");

        let store = Store::new(db)?;
        let reader = TopicReader::open(&config.db_path)?;
        let generator = UlidGenerator::new(GeneratorOptions::default())?;

        let queue = Arc::new(WriteQueue::new(config.batch_size));
        let writer = spawn_writer(store, Arc::clone(&queue), Arc::clone(&config))?;

        Ok(Self {
            handler: MessageHandler::new(generator, config, queue, reader),
            writer: Some(writer),
        })
    }

    /// The message callback. Invoked by the broker once per accepted
    /// publish, on its publish thread.
    ///
    /// Never fails toward the broker: persistence problems are logged and
    /// the message flows on to subscribers, carrying its `ulid` property.
    pub fn on_message(&mut self, event: &mut MessageEvent) {
        self.handler.handle(event);
    }

    /// Drains and stops the plugin.
    ///
    /// Blocks until the writer has flushed every queued entry and exited;
    /// afterwards the database file is closed. The broker stops invoking
    /// the callback before calling this, so no new entries race the final
    /// drain.
    pub fn shutdown(mut self) {
        if let Some(writer) = self.writer.take() {
            writer.shutdown();
        }
        info!("plugin stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
