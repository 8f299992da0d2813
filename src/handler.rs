//! # Event Handler
//!
//! The per-message policy, run once for every publish the broker accepts:
//!
//! 1. Mint a fresh id.
//! 2. Skip persistence when the topic matches an exclusion pattern.
//! 3. Treat a retained publish with an empty payload as a delete request
//!    and resolve its target.
//! 4. Otherwise compose the row (including serialized headers) and
//!    enqueue it for the batch writer.
//! 5. Attach the minted id to the outbound event as a `ulid` user
//!    property. This step runs on every path, so subscribers can always
//!    correlate a publish with its stored row (or its absence).
//!
//! ## The Delete Convention
//!
//! MQTT already has a wire-level "forget this" operation: publishing a
//! retained message with an empty payload clears the broker's retained
//! slot. This handler extends the same packet to the store. The rule is
//! exactly `retain && payload.is_empty()`; a non-retained empty payload
//! is stored like any other message. Targeted deletion rides on the
//! `ulid` user property; without one, the most recent row for the topic
//! is the target.
//!
//! ## Failure Policy
//!
//! Nothing here returns an error to the broker. A message that cannot be
//! persisted is logged and dropped; delivery to subscribers is the
//! broker's business and continues regardless.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::PluginConfig;
use crate::matcher;
use crate::queue::WriteQueue;
use crate::store::TopicReader;
use crate::types::{
    MessageEvent, MessageRecord, QueueEntry, UserProperty, HEADER_SEPARATOR, ID_PROPERTY,
};
use crate::ulid::{Ulid, UlidGenerator};

// =============================================================================
// MessageHandler
// =============================================================================

/// Per-message policy state, owned by the broker's publish thread.
///
/// Holds the only mutable reference to the id generator and the read-only
/// store connection for delete-target lookups. The queue is the single
/// point of contact with the writer thread.
#[derive(Debug)]
pub(crate) struct MessageHandler {
    generator: UlidGenerator,
    config: Arc<PluginConfig>,
    queue: Arc<WriteQueue>,
    reader: TopicReader,
}

impl MessageHandler {
    pub fn new(
        generator: UlidGenerator,
        config: Arc<PluginConfig>,
        queue: Arc<WriteQueue>,
        reader: TopicReader,
    ) -> Self {
        Self {
            generator,
            config,
            queue,
            reader,
        }
    }

    /// Processes one publish. Infallible toward the broker; the `ulid`
    /// property is attached on every path.
    pub fn handle(&mut self, event: &mut MessageEvent) {
        let id = self.generator.next();

        if matcher::matches_any(&self.config.exclude_topics, &event.topic) {
            debug!(topic = %event.topic, "topic excluded from persistence");
            attach_id(event, &id);
            return;
        }

        if event.retain && event.payload.is_empty() {
            self.handle_delete_intent(event);
            attach_id(event, &id);
            return;
        }

        let headers = self.compose_headers(&event.properties);
        let record = MessageRecord {
            id: id.clone(),
            topic: event.topic.clone(),
            payload: event.payload.clone(),
            retain: event.retain,
            qos: event.qos,
            headers,
        };
        self.queue.push(QueueEntry::Insert(record));
        debug!(topic = %event.topic, retain = event.retain, qos = event.qos, "message enqueued");

        attach_id(event, &id);
    }

    /// Resolves and enqueues a retained-empty delete request.
    fn handle_delete_intent(&mut self, event: &MessageEvent) {
        let Some(target) = self.resolve_delete_target(event) else {
            warn!(topic = %event.topic, "no stored message to delete");
            return;
        };

        self.queue.push(QueueEntry::Delete {
            topic: event.topic.clone(),
            id: target,
        });
    }

    /// Finds the id of the row a delete request addresses.
    ///
    /// A `ulid` user property wins; otherwise the most recent row for the
    /// topic is looked up synchronously. A malformed `ulid` value resolves
    /// to no target rather than falling through to the lookup, so a
    /// corrupt request cannot delete an unrelated row.
    fn resolve_delete_target(&self, event: &MessageEvent) -> Option<Ulid> {
        if let Some(value) = event.user_property(ID_PROPERTY) {
            match Ulid::parse(value) {
                Ok(target) => {
                    debug!(topic = %event.topic, id = %target, "delete target from properties");
                    return Some(target);
                }
                Err(e) => {
                    warn!(topic = %event.topic, value, error = %e, "malformed ulid property on delete request");
                    return None;
                }
            }
        }

        match self.reader.latest_id(&event.topic) {
            Ok(Some(target)) => {
                debug!(topic = %event.topic, id = %target, "delete target from latest row");
                Some(target)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(topic = %event.topic, error = %e, "delete target lookup failed");
                None
            }
        }
    }

    /// Serializes the user properties that survive the exclusion set.
    ///
    /// Returns `None` when header storage is disabled or nothing
    /// survives; the stored column is NULL in both cases.
    fn compose_headers(&self, properties: &[UserProperty]) -> Option<String> {
        if !self.config.store_headers {
            return None;
        }

        let mut serialized = String::new();
        for property in properties {
            if self.config.exclude_headers.contains(&property.name) {
                continue;
            }
            if !serialized.is_empty() {
                serialized.push(HEADER_SEPARATOR);
            }
            serialized.push_str(&property.name);
            serialized.push('=');
            serialized.push_str(&property.value);
        }

        if serialized.is_empty() {
            None
        } else {
            Some(serialized)
        }
    }
}

/// Appends the minted id to the outbound property list. Existing
/// properties are never touched.
fn attach_id(event: &mut MessageEvent, id: &Ulid) {
    event
        .properties
        .push(UserProperty::new(ID_PROPERTY, id.as_str()));
}

// =============================================================================
// Tests
// =============================================================================
