//! Retention Sweeper Tests
//!
//! With `retention_days > 0`, rows whose id timestamp falls behind the
//! horizon are deleted. Ids sort by time, so the sweep is a range scan on
//! the primary key; the first pass runs at writer startup.

mod common;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mqvault::{Database, Ulid};

const MS_PER_DAY: u64 = 86_400_000;

fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// An id whose timestamp lies `age_ms` in the past, with a fixed tail so
/// several can coexist.
fn aged_id(age_ms: u64, tail: u8) -> Ulid {
    let ts = unix_time_ms() - age_ms;
    let mut bytes = [0u8; 16];
    bytes[0] = (ts >> 40) as u8;
    bytes[1] = (ts >> 32) as u8;
    bytes[2] = (ts >> 24) as u8;
    bytes[3] = (ts >> 16) as u8;
    bytes[4] = (ts >> 8) as u8;
    bytes[5] = ts as u8;
    bytes[15] = tail;
    Ulid::from_bytes(&bytes)
}

/// Seeds rows directly, bypassing the plugin, so tests control row age.
fn seed_rows(path: &std::path::Path, ids: &[(Ulid, &str)]) {
    let conn = Database::open(path).expect("open database").into_connection();
    for (id, topic) in ids {
        conn.execute(
            "INSERT INTO msg (id, topic, payload, retain, qos, headers) VALUES (?1, ?2, ?3, 0, 0, NULL)",
            rusqlite::params![id.as_str(), topic, b"p".to_vec()],
        )
        .expect("seed row");
    }
}

/// The startup sweep removes rows older than the horizon and keeps newer
/// ones.
#[test]
fn sweep_purges_rows_behind_horizon() {
    let (_dir, path) = common::temp_db("retention.db");
    seed_rows(
        &path,
        &[
            (aged_id(3 * MS_PER_DAY, 1), "old/1"),
            (aged_id(2 * MS_PER_DAY, 2), "old/2"),
            (aged_id(0, 3), "fresh"),
        ],
    );

    let plugin = common::init_plugin(&path, &[("retention_days", "1")]);

    let probe = common::open_probe(&path);
    common::eventually(Duration::from_secs(2), || common::row_count(&probe) == 1);
    let rows = common::fetch_rows(&probe);
    assert_eq!(rows[0].topic, "fresh");

    plugin.shutdown();
}

/// `retention_days = 0` leaves arbitrarily old rows untouched.
#[test]
fn zero_horizon_is_inert() {
    let (_dir, path) = common::temp_db("inert.db");
    seed_rows(&path, &[(aged_id(365 * MS_PER_DAY, 1), "ancient")]);

    let plugin = common::init_plugin(&path, &[("retention_days", "0")]);
    std::thread::sleep(Duration::from_millis(200));
    plugin.shutdown();

    let probe = common::open_probe(&path);
    assert_eq!(common::row_count(&probe), 1);
}

/// The sweeper and the ingest path coexist: fresh publishes survive the
/// startup sweep that removes the backlog.
#[test]
fn sweep_and_ingest_coexist() {
    let (_dir, path) = common::temp_db("coexist.db");
    seed_rows(&path, &[(aged_id(10 * MS_PER_DAY, 1), "stale")]);

    let mut plugin = common::init_plugin(&path, &[("retention_days", "7")]);
    common::publish(&mut plugin, "live", b"now", false, 0);
    plugin.shutdown();

    let probe = common::open_probe(&path);
    let rows = common::fetch_rows(&probe);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].topic, "live");
}
