//! # Batch Writer
//!
//! The background thread that drains the write queue into the store in
//! transactional batches, and runs the retention sweeper.
//!
//! ## Loop
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  wait on queue condvar, timeout = flush_interval           │
//! │        │ (size signal, shutdown, or timeout)               │
//! │        ▼                                                   │
//! │  drain queue ──► Store::apply_batch (one transaction)      │
//! │        │                                                   │
//! │        ▼                                                   │
//! │  retention sweep if the hourly deadline passed             │
//! │        │                                                   │
//! │        ▼                                                   │
//! │  loop, until shutdown ──► final untimed drain, exit        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sweeper shares this thread: store access stays single-threaded
//! and a sweep can at most delay a flush by one DELETE range scan.
//!
//! ## Shutdown
//!
//! [`WriterHandle::shutdown`] sets the queue's stop flag, wakes the
//! condvar and joins the thread. The final drain runs to completion with
//! no timeout, so every entry accepted before shutdown reaches the store
//! before the file closes.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info};

use crate::config::PluginConfig;
use crate::error::{Error, Result};
use crate::queue::WriteQueue;
use crate::store::Store;
use crate::ulid::Ulid;

/// How often the retention sweeper runs. The first sweep happens at
/// writer startup so a broker that was down for a while trims its backlog
/// immediately.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

const MS_PER_DAY: u64 = 86_400_000;

// =============================================================================
// Spawning
// =============================================================================

/// Handle to the writer thread. Dropping it (or calling
/// [`WriterHandle::shutdown`]) drains the queue and joins the thread.
#[derive(Debug)]
pub struct WriterHandle {
    thread: Option<JoinHandle<()>>,
    queue: Arc<WriteQueue>,
}

/// Spawns the batch writer on a dedicated thread.
///
/// Takes ownership of the store: from here on, all mutation happens on
/// the writer thread.
///
/// # Errors
///
/// Returns [`Error::Init`] if the OS refuses to spawn the thread; the
/// store is dropped (closing its connection) before the error is
/// returned.
pub fn spawn_writer(
    store: Store,
    queue: Arc<WriteQueue>,
    config: Arc<PluginConfig>,
) -> Result<WriterHandle> {
    let loop_queue = Arc::clone(&queue);

    let thread = std::thread::Builder::new()
        .name("mqvault-writer".to_string())
        .spawn(move || run_writer(store, loop_queue, config))
        .map_err(|e| Error::Init(format!("failed to spawn writer thread: {e}")))?;

    Ok(WriterHandle {
        thread: Some(thread),
        queue,
    })
}

impl WriterHandle {
    /// Stops the writer: sets the stop flag, wakes it, and joins. The
    /// writer performs one final untimed drain before exiting.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.queue.shutdown();
            if thread.join().is_err() {
                error!("writer thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

// =============================================================================
// Writer Loop
// =============================================================================

fn run_writer(mut store: Store, queue: Arc<WriteQueue>, config: Arc<PluginConfig>) {
    info!(
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        "batch writer started"
    );

    let mut next_sweep = Instant::now();

    loop {
        let (entries, shutdown) = queue.wait_drain(config.flush_interval);

        if !entries.is_empty() {
            let batch: Vec<_> = entries.into_iter().collect();
            store.apply_batch(&batch);
        }

        if config.retention_days > 0 && Instant::now() >= next_sweep {
            sweep(&mut store, config.retention_days);
            next_sweep = Instant::now() + SWEEP_INTERVAL;
        }

        if shutdown {
            break;
        }
    }

    // Final drain: everything accepted before shutdown is persisted.
    let remaining: Vec<_> = queue.drain().into_iter().collect();
    if !remaining.is_empty() {
        store.apply_batch(&remaining);
    }

    info!("batch writer stopped");
}

/// One retention pass: delete every row older than the horizon.
fn sweep(store: &mut Store, retention_days: u32) {
    let cutoff = retention_cutoff(retention_days, unix_time_ms());
    match store.purge_older_than(&cutoff) {
        Ok(0) => {}
        Ok(removed) => info!(removed, retention_days, "retention sweep removed rows"),
        Err(e) => error!(error = %e, "retention sweep failed"),
    }
}

/// The smallest id that survives the retention horizon: the cutoff
/// timestamp with an all-zero random tail. Every id below it is older
/// than `days` days.
fn retention_cutoff(days: u32, now_ms: u64) -> Ulid {
    let cutoff_ms = now_ms.saturating_sub(days as u64 * MS_PER_DAY);
    let mut bytes = [0u8; 16];
    bytes[0] = (cutoff_ms >> 40) as u8;
    bytes[1] = (cutoff_ms >> 32) as u8;
    bytes[2] = (cutoff_ms >> 24) as u8;
    bytes[3] = (cutoff_ms >> 16) as u8;
    bytes[4] = (cutoff_ms >> 8) as u8;
    bytes[5] = cutoff_ms as u8;
    Ulid::from_bytes(&bytes)
}

fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WriteQueue;
    use crate::schema::Database;
    use crate::types::{MessageRecord, QueueEntry};
    use crate::ulid::{GeneratorOptions, UlidGenerator};
    use rusqlite::Connection;

    fn setup() -> (tempfile::TempDir, Store, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("msg.db");
        let db = Database::open(&path).expect("open database");
        let store = Store::new(db).expect("create store");
        (dir, store, path)
    }

    fn insert_entry(gen: &mut UlidGenerator, topic: &str) -> QueueEntry {
        QueueEntry::Insert(MessageRecord {
            id: gen.next(),
            topic: topic.to_string(),
            payload: b"p".to_vec(),
            retain: false,
            qos: 0,
            headers: None,
        })
    }

    fn row_count(path: &std::path::Path) -> i64 {
        Connection::open(path)
            .expect("open probe connection")
            .query_row("SELECT COUNT(*) FROM msg", [], |row| row.get(0))
            .expect("count rows")
    }

    #[test]
    fn test_retention_cutoff_encodes_horizon() {
        let now_ms = 1_700_000_000_000;
        let cutoff = retention_cutoff(7, now_ms);
        assert_eq!(cutoff.timestamp_ms(), now_ms - 7 * MS_PER_DAY);
        // The tail is all zeros, so the cutoff sorts below every id minted
        // in its own millisecond.
        assert_eq!(cutoff.to_bytes()[6..], [0u8; 10]);
    }

    #[test]
    fn test_retention_cutoff_saturates_at_epoch() {
        let cutoff = retention_cutoff(u32::MAX, 1000);
        assert_eq!(cutoff.timestamp_ms(), 0);
    }

    /// Pushed entries reach the store within a flush interval, without a
    /// size trigger.
    #[test]
    fn test_writer_flushes_on_timeout() {
        let (_dir, store, path) = setup();
        let mut gen = UlidGenerator::new(GeneratorOptions::default()).unwrap();

        let config = Arc::new(PluginConfig {
            flush_interval: Duration::from_millis(10),
            ..PluginConfig::default()
        });
        let queue = Arc::new(WriteQueue::new(config.batch_size));
        let writer = spawn_writer(store, Arc::clone(&queue), config).expect("spawn writer");

        for i in 0..3 {
            queue.push(insert_entry(&mut gen, &format!("t/{i}")));
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while row_count(&path) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(row_count(&path), 3);

        writer.shutdown();
    }

    /// Entries still queued at shutdown are flushed by the final drain.
    #[test]
    fn test_shutdown_drains_queue() {
        let (_dir, store, path) = setup();
        let mut gen = UlidGenerator::new(GeneratorOptions::default()).unwrap();

        // A long flush interval so nothing flushes before shutdown.
        let config = Arc::new(PluginConfig {
            flush_interval: Duration::from_secs(5),
            ..PluginConfig::default()
        });
        let queue = Arc::new(WriteQueue::new(config.batch_size));
        let writer = spawn_writer(store, Arc::clone(&queue), config).expect("spawn writer");

        for i in 0..10 {
            queue.push(insert_entry(&mut gen, &format!("t/{i}")));
        }
        writer.shutdown();

        assert_eq!(row_count(&path), 10);
    }

    /// With a retention horizon set, the startup sweep removes rows older
    /// than the horizon and keeps the rest.
    #[test]
    fn test_startup_sweep_purges_old_rows() {
        let (_dir, mut store, path) = setup();
        let mut gen = UlidGenerator::new(GeneratorOptions::default()).unwrap();

        // Two rows aged two days, one current.
        let two_days_ago = unix_time_ms() - 2 * MS_PER_DAY;
        let old_id = |ms: u64, tail: u8| {
            let mut bytes = [0u8; 16];
            bytes[0] = (ms >> 40) as u8;
            bytes[1] = (ms >> 32) as u8;
            bytes[2] = (ms >> 24) as u8;
            bytes[3] = (ms >> 16) as u8;
            bytes[4] = (ms >> 8) as u8;
            bytes[5] = ms as u8;
            bytes[15] = tail;
            Ulid::from_bytes(&bytes)
        };
        let old_rows = vec![
            QueueEntry::Insert(MessageRecord {
                id: old_id(two_days_ago, 1),
                topic: "old/1".to_string(),
                payload: b"a".to_vec(),
                retain: false,
                qos: 0,
                headers: None,
            }),
            QueueEntry::Insert(MessageRecord {
                id: old_id(two_days_ago, 2),
                topic: "old/2".to_string(),
                payload: b"b".to_vec(),
                retain: false,
                qos: 0,
                headers: None,
            }),
            insert_entry(&mut gen, "fresh"),
        ];
        store.apply_batch(&old_rows);
        assert_eq!(row_count(&path), 3);

        let config = Arc::new(PluginConfig {
            retention_days: 1,
            flush_interval: Duration::from_millis(10),
            ..PluginConfig::default()
        });
        let queue = Arc::new(WriteQueue::new(config.batch_size));
        let writer = spawn_writer(store, Arc::clone(&queue), config).expect("spawn writer");

        let deadline = Instant::now() + Duration::from_secs(2);
        while row_count(&path) > 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        writer.shutdown();

        assert_eq!(row_count(&path), 1);
    }

    /// A zero horizon leaves everything in place.
    #[test]
    fn test_zero_retention_is_inert() {
        let (_dir, mut store, path) = setup();

        let ancient = {
            let mut bytes = [0u8; 16];
            bytes[15] = 1;
            Ulid::from_bytes(&bytes)
        };
        store.apply_batch(&[QueueEntry::Insert(MessageRecord {
            id: ancient,
            topic: "ancient".to_string(),
            payload: b"a".to_vec(),
            retain: false,
            qos: 0,
            headers: None,
        })]);

        let config = Arc::new(PluginConfig {
            retention_days: 0,
            flush_interval: Duration::from_millis(10),
            ..PluginConfig::default()
        });
        let queue = Arc::new(WriteQueue::new(config.batch_size));
        let writer = spawn_writer(store, Arc::clone(&queue), config).expect("spawn writer");

        std::thread::sleep(Duration::from_millis(100));
        writer.shutdown();

        assert_eq!(row_count(&path), 1);
    }
}
