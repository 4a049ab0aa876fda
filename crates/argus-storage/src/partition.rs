use crate::error::{Result, StorageError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing;

const TELEMETRY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS system_metrics (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    name TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_metrics_name_time
    ON system_metrics(name, timestamp);
CREATE INDEX IF NOT EXISTS idx_metrics_service_time
    ON system_metrics(service, timestamp);

CREATE TABLE IF NOT EXISTS log_index (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    file TEXT NOT NULL,
    line_offset INTEGER NOT NULL DEFAULT 0,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_log_time_level
    ON log_index(timestamp, level);

CREATE TABLE IF NOT EXISTS sdk_events (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    event_type TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_sdk_events_service_type_time
    ON sdk_events(service, event_type, timestamp);

CREATE TABLE IF NOT EXISTS spans (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    parent_span_id TEXT,
    name TEXT NOT NULL,
    span_kind TEXT NOT NULL,
    duration_ms REAL,
    status TEXT NOT NULL,
    error_type TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_spans_service_time ON spans(service, timestamp);

CREATE TABLE IF NOT EXISTS dependency_calls (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    dep_type TEXT NOT NULL,
    target TEXT NOT NULL,
    operation TEXT NOT NULL DEFAULT '',
    duration_ms REAL,
    status TEXT NOT NULL,
    status_code INTEGER,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_deps_service_time
    ON dependency_calls(service, timestamp);

CREATE TABLE IF NOT EXISTS sdk_metrics (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    name TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_sdk_metrics_service_name_time
    ON sdk_metrics(service, name, timestamp);

CREATE TABLE IF NOT EXISTS deploy_events (
    timestamp INTEGER NOT NULL,
    service TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '',
    git_sha TEXT NOT NULL DEFAULT '',
    environment TEXT NOT NULL DEFAULT '',
    previous_version TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_deploys_service_time
    ON deploy_events(service, timestamp);
";

/// Manages one SQLite database file per UTC day. Connections are opened
/// lazily and cached; writes serialize on the connection map.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.partition_path(&key);
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(TELEMETRY_SCHEMA)?;
            tracing::info!(partition = %key, "Created new partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| StorageError::Other(format!("partition {key} not found")))?;
        f(conn)
    }

    /// Partition keys overlapping the given window, oldest first. Loads
    /// existing partition files on demand.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let from_date = from.date_naive();
        let to_date = to.date_naive();
        let mut keys = Vec::new();
        let mut date = from_date;
        while date <= to_date {
            let key = date.format("%Y-%m-%d").to_string();
            let path = self.partition_path(&key);
            if path.exists() {
                let mut conns = self.lock_connections();
                if !conns.contains_key(&key) {
                    let conn = Connection::open(&path)?;
                    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                    conn.execute_batch(TELEMETRY_SCHEMA)?;
                    conns.insert(key.clone(), conn);
                }
                keys.push(key);
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(keys)
    }

    /// Deletes partition files older than the retention horizon.
    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_date = cutoff.date_naive();
        let mut removed = 0u32;

        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        let mut conns = self.lock_connections();
        for (key, path) in expired {
            conns.remove(&key);
            if std::fs::remove_file(&path).is_ok() {
                // WAL sidecar files go with the partition.
                let _ = std::fs::remove_file(path.with_extension("db-wal"));
                let _ = std::fs::remove_file(path.with_extension("db-shm"));
                tracing::info!(partition = %key, "Removed expired partition");
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn list_partitions(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
                    keys.push(date_str.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
