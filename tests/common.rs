#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags};
use mqvault::{MessageEvent, Plugin, ID_PROPERTY};

static TRACING: Once = Once::new();

/// Installs a test subscriber once per process; `RUST_LOG` filters it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn temp_db(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Initializes a plugin against `path` with a fast flush interval plus
/// any extra options.
pub fn init_plugin(path: &Path, extra: &[(&str, &str)]) -> Plugin {
    init_tracing();
    let path = path.to_str().expect("utf-8 path").to_string();
    let mut options: Vec<(&str, &str)> = vec![("db_path", path.as_str()), ("flush_interval", "10")];
    options.extend_from_slice(extra);
    Plugin::init(options).expect("initialize plugin")
}

/// Runs one publish through the plugin and returns the event, properties
/// included, as the broker would see it afterwards.
pub fn publish(plugin: &mut Plugin, topic: &str, payload: &[u8], retain: bool, qos: u8) -> MessageEvent {
    let mut event = MessageEvent::new(topic, payload.to_vec(), retain, qos);
    plugin.on_message(&mut event);
    event
}

/// The `ulid` property the handler attached to an event.
pub fn attached_ulid(event: &MessageEvent) -> String {
    event
        .user_property(ID_PROPERTY)
        .expect("ulid property attached")
        .to_string()
}

/// Opens a read-only probe connection for assertions while the plugin is
/// still running.
pub fn open_probe(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open probe connection")
}

pub fn row_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM msg", [], |row| row.get(0))
        .expect("count rows")
}

/// One stored row, as read back for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: i64,
    pub qos: i64,
    pub headers: Option<String>,
}

/// All rows in id (= chronological) order.
pub fn fetch_rows(conn: &Connection) -> Vec<StoredRow> {
    let mut stmt = conn
        .prepare("SELECT id, topic, payload, retain, qos, headers FROM msg ORDER BY id")
        .expect("prepare row fetch");
    stmt.query_map([], |row| {
        Ok(StoredRow {
            id: row.get(0)?,
            topic: row.get(1)?,
            payload: row.get(2)?,
            retain: row.get(3)?,
            qos: row.get(4)?,
            headers: row.get(5)?,
        })
    })
    .expect("query rows")
    .collect::<Result<Vec<_>, _>>()
    .expect("collect rows")
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    loop {
        if condition() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
