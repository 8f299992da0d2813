//! # Plugin Configuration
//!
//! Parses the `(key, value)` option pairs the host broker passes at
//! initialization into an immutable [`PluginConfig`].
//!
//! ## Recognized Options
//!
//! | Option | Semantic | Default |
//! |---|---|---|
//! | `db_path` | Filesystem path of the SQLite database. | `/mosquitto/data/dbs/default/data` |
//! | `exclude_topics` | Comma-separated MQTT filters; matching topics are not persisted. | empty |
//! | `batch_size` | Queue-size threshold that triggers an early drain (1..=15000). | 100 |
//! | `flush_interval` | Writer wakeup timeout in milliseconds (1..=10000). | 50 |
//! | `retention_days` | Delete rows older than N days; 0 disables the sweeper. | 0 |
//! | `exclude_headers` | Comma-separated property names to drop; a lone `#` disables header storage. | empty |
//!
//! Out-of-range or unparsable values log a warning and fall back to the
//! default; configuration problems never fail initialization.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::matcher;
use crate::queue::QUEUE_HARD_CAP;

// =============================================================================
// Defaults and Bounds
// =============================================================================

/// Where the broker deployment mounts the message database.
pub const DEFAULT_DB_PATH: &str = "/mosquitto/data/dbs/default/data";

/// Queue-size threshold that wakes the writer early.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Writer wakeup timeout.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 50;

/// Upper bound on `flush_interval`.
const MAX_FLUSH_INTERVAL_MS: u64 = 10_000;

/// The sentinel pattern in `exclude_headers` that disables header storage
/// altogether.
const HEADERS_DISABLED_SENTINEL: &str = "#";

// =============================================================================
// PluginConfig
// =============================================================================

/// Fully-resolved plugin configuration.
///
/// Built once at initialization, shared read-only (via `Arc`) between the
/// publish-thread handler and the writer thread, and dropped at cleanup.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,

    /// Topics matching any of these filters are not persisted.
    pub exclude_topics: Vec<String>,

    /// User-property names dropped from the stored headers.
    pub exclude_headers: HashSet<String>,

    /// False when `exclude_headers` contained the `#` sentinel; the
    /// headers column is then always NULL.
    pub store_headers: bool,

    /// Queue length that triggers an early drain. Always `<=` the queue
    /// hard cap.
    pub batch_size: usize,

    /// Maximum time the writer sleeps between drains.
    pub flush_interval: Duration,

    /// Retention horizon in days; 0 disables the sweeper.
    pub retention_days: u32,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            exclude_topics: Vec::new(),
            exclude_headers: HashSet::new(),
            store_headers: true,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            retention_days: 0,
        }
    }
}

impl PluginConfig {
    /// Builds a configuration from the broker's option list.
    ///
    /// Later occurrences of a key override earlier ones. Unrecognized keys
    /// are warned about and ignored, so a typo in the broker configuration
    /// is visible in the log instead of silently doing nothing.
    pub fn from_options<'a>(options: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut config = Self::default();

        for (key, value) in options {
            match key {
                "db_path" => {
                    config.db_path = PathBuf::from(value);
                }
                "exclude_topics" => {
                    config.exclude_topics = matcher::parse_patterns(value);
                }
                "exclude_headers" => {
                    config.parse_exclude_headers(value);
                }
                "batch_size" => {
                    match value.parse::<usize>() {
                        Ok(n) if (1..=QUEUE_HARD_CAP).contains(&n) => {
                            info!(batch_size = n, "batch size set");
                            config.batch_size = n;
                        }
                        _ => warn!(
                            value,
                            default = DEFAULT_BATCH_SIZE,
                            "batch_size out of range (1..={QUEUE_HARD_CAP}), using default"
                        ),
                    }
                }
                "flush_interval" => {
                    match value.parse::<u64>() {
                        Ok(ms) if (1..=MAX_FLUSH_INTERVAL_MS).contains(&ms) => {
                            info!(flush_interval_ms = ms, "flush interval set");
                            config.flush_interval = Duration::from_millis(ms);
                        }
                        _ => warn!(
                            value,
                            default = DEFAULT_FLUSH_INTERVAL_MS,
                            "flush_interval out of range (1..={MAX_FLUSH_INTERVAL_MS} ms), using default"
                        ),
                    }
                }
                "retention_days" => {
                    match value.parse::<u32>() {
                        Ok(days) => {
                            if days > 0 {
                                info!(retention_days = days, "retention enabled");
                            }
                            config.retention_days = days;
                        }
                        Err(_) => warn!(value, "retention_days not a number, retention disabled"),
                    }
                }
                other => {
                    warn!(key = other, "unrecognized plugin option");
                }
            }
        }

        config
    }

    /// Parses the `exclude_headers` option value.
    fn parse_exclude_headers(&mut self, value: &str) {
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if token == HEADERS_DISABLED_SENTINEL {
                info!("header storage disabled");
                self.store_headers = false;
                continue;
            }
            info!(header = token, "excluding header");
            self.exclude_headers.insert(token.to_string());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
