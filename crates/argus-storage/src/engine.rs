use crate::error::{Result, StorageError};
use crate::partition::PartitionManager;
use crate::{
    Aggregate, AggregateQuery, AggregateRow, DependencyRow, DeployRow, LogRow, MetricRow,
    QueryResult, SdkEventRow, SpanRow, TableKind, TelemetryQuery, TelemetryRow, TimeSeriesStore,
};
use chrono::DateTime;
use rusqlite::{params_from_iter, Connection, ToSql};
use std::collections::HashMap;
use std::path::Path;

/// Time-series engine over daily-partitioned SQLite files.
pub struct SqliteTimeSeriesEngine {
    partitions: PartitionManager,
}

impl SqliteTimeSeriesEngine {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }

    pub fn list_partitions(&self) -> Result<Vec<String>> {
        self.partitions.list_partitions()
    }

    fn insert_row(conn: &Connection, row: &TelemetryRow) -> Result<()> {
        match row {
            TelemetryRow::Metric(m) | TelemetryRow::SdkMetric(m) => {
                let table = row.table().table_name();
                let labels = serde_json::to_string(&m.labels)?;
                let mut stmt = conn.prepare_cached(&format!(
                    "INSERT INTO {table} (timestamp, service, name, value, labels) \
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ))?;
                stmt.execute(rusqlite::params![
                    m.timestamp.timestamp_millis(),
                    &m.service,
                    &m.name,
                    m.value,
                    labels,
                ])?;
            }
            TelemetryRow::Log(l) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO log_index (timestamp, service, file, line_offset, level, message) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                stmt.execute(rusqlite::params![
                    l.timestamp.timestamp_millis(),
                    &l.service,
                    &l.file,
                    l.line_offset,
                    &l.level,
                    &l.message,
                ])?;
            }
            TelemetryRow::SdkEvent(e) => {
                let data = serde_json::to_string(&e.data)?;
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO sdk_events (timestamp, service, event_type, data) \
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                stmt.execute(rusqlite::params![
                    e.timestamp.timestamp_millis(),
                    &e.service,
                    &e.event_type,
                    data,
                ])?;
            }
            TelemetryRow::Span(s) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO spans (timestamp, service, trace_id, span_id, parent_span_id, \
                     name, span_kind, duration_ms, status, error_type, error_message) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                stmt.execute(rusqlite::params![
                    s.timestamp.timestamp_millis(),
                    &s.service,
                    &s.trace_id,
                    &s.span_id,
                    &s.parent_span_id,
                    &s.name,
                    &s.span_kind,
                    s.duration_ms,
                    &s.status,
                    &s.error_type,
                    &s.error_message,
                ])?;
            }
            TelemetryRow::Dependency(d) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO dependency_calls (timestamp, service, dep_type, target, \
                     operation, duration_ms, status, status_code, error_message) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                stmt.execute(rusqlite::params![
                    d.timestamp.timestamp_millis(),
                    &d.service,
                    &d.dep_type,
                    &d.target,
                    &d.operation,
                    d.duration_ms,
                    &d.status,
                    d.status_code,
                    &d.error_message,
                ])?;
            }
            TelemetryRow::Deploy(d) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO deploy_events (timestamp, service, version, git_sha, \
                     environment, previous_version) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                stmt.execute(rusqlite::params![
                    d.timestamp.timestamp_millis(),
                    &d.service,
                    &d.version,
                    &d.git_sha,
                    &d.environment,
                    &d.previous_version,
                ])?;
            }
        }
        Ok(())
    }

    fn select_columns(kind: TableKind) -> &'static str {
        match kind {
            TableKind::SystemMetrics | TableKind::SdkMetrics => {
                "timestamp, service, name, value, labels"
            }
            TableKind::LogIndex => "timestamp, service, file, line_offset, level, message",
            TableKind::SdkEvents => "timestamp, service, event_type, data",
            TableKind::Spans => {
                "timestamp, service, trace_id, span_id, parent_span_id, name, span_kind, \
                 duration_ms, status, error_type, error_message"
            }
            TableKind::DependencyCalls => {
                "timestamp, service, dep_type, target, operation, duration_ms, status, \
                 status_code, error_message"
            }
            TableKind::DeployEvents => {
                "timestamp, service, version, git_sha, environment, previous_version"
            }
        }
    }

    fn row_from_sql(kind: TableKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<TelemetryRow> {
        let ts_ms: i64 = row.get(0)?;
        let timestamp = DateTime::from_timestamp_millis(ts_ms).unwrap_or_default();
        let service: String = row.get(1)?;
        Ok(match kind {
            TableKind::SystemMetrics | TableKind::SdkMetrics => {
                let labels_str: String = row.get(4)?;
                let labels: HashMap<String, String> =
                    serde_json::from_str(&labels_str).unwrap_or_default();
                let metric = MetricRow {
                    timestamp,
                    service,
                    name: row.get(2)?,
                    value: row.get(3)?,
                    labels,
                };
                if kind == TableKind::SystemMetrics {
                    TelemetryRow::Metric(metric)
                } else {
                    TelemetryRow::SdkMetric(metric)
                }
            }
            TableKind::LogIndex => TelemetryRow::Log(LogRow {
                timestamp,
                service,
                file: row.get(2)?,
                line_offset: row.get(3)?,
                level: row.get(4)?,
                message: row.get(5)?,
            }),
            TableKind::SdkEvents => {
                let data_str: String = row.get(3)?;
                TelemetryRow::SdkEvent(SdkEventRow {
                    timestamp,
                    service,
                    event_type: row.get(2)?,
                    data: serde_json::from_str(&data_str).unwrap_or_default(),
                })
            }
            TableKind::Spans => TelemetryRow::Span(SpanRow {
                timestamp,
                service,
                trace_id: row.get(2)?,
                span_id: row.get(3)?,
                parent_span_id: row.get(4)?,
                name: row.get(5)?,
                span_kind: row.get(6)?,
                duration_ms: row.get(7)?,
                status: row.get(8)?,
                error_type: row.get(9)?,
                error_message: row.get(10)?,
            }),
            TableKind::DependencyCalls => TelemetryRow::Dependency(DependencyRow {
                timestamp,
                service,
                dep_type: row.get(2)?,
                target: row.get(3)?,
                operation: row.get(4)?,
                duration_ms: row.get(5)?,
                status: row.get(6)?,
                status_code: row.get(7)?,
                error_message: row.get(8)?,
            }),
            TableKind::DeployEvents => TelemetryRow::Deploy(DeployRow {
                timestamp,
                service,
                version: row.get(2)?,
                git_sha: row.get(3)?,
                environment: row.get(4)?,
                previous_version: row.get(5)?,
            }),
        })
    }

    /// Column the filter's `name`/`level`/`text_contains` map to, per table.
    fn filter_sql(query: &TelemetryQuery, sql: &mut String, params: &mut Vec<Box<dyn ToSql>>) {
        if let Some(service) = &query.service {
            sql.push_str(" AND service = ?");
            params.push(Box::new(service.clone()));
        }
        if let Some(name) = &query.name {
            let column = match query.kind {
                TableKind::SystemMetrics | TableKind::SdkMetrics => "name",
                TableKind::Spans => "name",
                TableKind::SdkEvents => "event_type",
                TableKind::DependencyCalls => "target",
                TableKind::LogIndex => "file",
                TableKind::DeployEvents => "version",
            };
            sql.push_str(&format!(" AND {column} = ?"));
            params.push(Box::new(name.clone()));
        }
        if let Some(level) = &query.level {
            let column = match query.kind {
                TableKind::LogIndex => "level",
                TableKind::Spans | TableKind::DependencyCalls => "status",
                _ => "service",
            };
            sql.push_str(&format!(" AND {column} = ?"));
            params.push(Box::new(level.clone()));
        }
        if let Some(text) = &query.text_contains {
            let column = match query.kind {
                TableKind::LogIndex => "message",
                TableKind::SdkEvents => "data",
                _ => "service",
            };
            sql.push_str(&format!(" AND {column} LIKE ?"));
            params.push(Box::new(format!("%{text}%")));
        }
        if let Some(trace_id) = &query.trace_id {
            if matches!(query.kind, TableKind::Spans | TableKind::DependencyCalls) {
                sql.push_str(" AND trace_id = ?");
                params.push(Box::new(trace_id.clone()));
            }
        }
    }

    /// Numeric column for aggregation, if the table has one.
    fn value_column(kind: TableKind) -> Option<&'static str> {
        match kind {
            TableKind::SystemMetrics | TableKind::SdkMetrics => Some("value"),
            TableKind::Spans | TableKind::DependencyCalls => Some("duration_ms"),
            _ => None,
        }
    }
}

impl TimeSeriesStore for SqliteTimeSeriesEngine {
    fn append(&self, rows: &[TelemetryRow]) -> Result<()> {
        // Group rows by partition day so each partition gets one transaction.
        let mut by_partition: HashMap<String, Vec<&TelemetryRow>> = HashMap::new();
        for row in rows {
            let key = self.partitions.get_or_create(row.timestamp())?;
            by_partition.entry(key).or_default().push(row);
        }

        for (key, rows) in by_partition {
            self.partitions.with_partition(&key, |conn| {
                let tx = conn.unchecked_transaction()?;
                for row in &rows {
                    Self::insert_row(&tx, row)?;
                }
                tx.commit()?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn query(&self, query: &TelemetryQuery) -> Result<QueryResult> {
        if query.to < query.from {
            return Err(StorageError::InvalidQuery(
                "window end precedes window start".to_string(),
            ));
        }
        let limit = query.limit.max(1);
        let mut keys = self.partitions.partitions_in_range(query.from, query.to)?;
        if query.order_desc {
            keys.reverse();
        }

        let columns = Self::select_columns(query.kind);
        let table = query.kind.table_name();
        let order = if query.order_desc { "DESC" } else { "ASC" };
        let mut results: Vec<TelemetryRow> = Vec::new();
        let mut truncated = false;

        for key in keys {
            if results.len() > limit {
                break;
            }
            let remaining = limit + 1 - results.len();
            let mut sql = format!(
                "SELECT {columns} FROM {table} WHERE timestamp >= ? AND timestamp <= ?"
            );
            let mut params: Vec<Box<dyn ToSql>> = vec![
                Box::new(query.from.timestamp_millis()),
                Box::new(query.to.timestamp_millis()),
            ];
            Self::filter_sql(query, &mut sql, &mut params);
            sql.push_str(&format!(" ORDER BY timestamp {order} LIMIT {remaining}"));

            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(
                    params_from_iter(params.iter().map(|p| p.as_ref())),
                    |row| Self::row_from_sql(query.kind, row),
                )?;
                for row in rows {
                    results.push(row?);
                }
                Ok(())
            })?;
        }

        if results.len() > limit {
            results.truncate(limit);
            truncated = true;
        }
        Ok(QueryResult {
            rows: results,
            truncated,
        })
    }

    fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<AggregateRow>> {
        if query.bucket_secs == 0 {
            return Err(StorageError::InvalidQuery("bucket_secs must be > 0".into()));
        }
        let keys = self.partitions.partitions_in_range(query.from, query.to)?;
        let table = query.kind.table_name();
        let value_col = Self::value_column(query.kind);

        // Collect (bucket, group, value) samples across partitions, then
        // fold in memory; SQLite has no percentile builtin.
        let mut samples: HashMap<(i64, Option<String>), Vec<f64>> = HashMap::new();
        let bucket_ms = (query.bucket_secs * 1000) as i64;

        for key in keys {
            let mut sql = match value_col {
                Some(col) => format!(
                    "SELECT timestamp, service, {col} FROM {table} \
                     WHERE timestamp >= ? AND timestamp <= ?"
                ),
                None => format!(
                    "SELECT timestamp, service, 1.0 FROM {table} \
                     WHERE timestamp >= ? AND timestamp <= ?"
                ),
            };
            let mut params: Vec<Box<dyn ToSql>> = vec![
                Box::new(query.from.timestamp_millis()),
                Box::new(query.to.timestamp_millis()),
            ];
            if let Some(service) = &query.service {
                sql.push_str(" AND service = ?");
                params.push(Box::new(service.clone()));
            }
            if let Some(name) = &query.name {
                if matches!(
                    query.kind,
                    TableKind::SystemMetrics | TableKind::SdkMetrics | TableKind::Spans
                ) {
                    sql.push_str(" AND name = ?");
                    params.push(Box::new(name.clone()));
                }
            }

            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(
                    params_from_iter(params.iter().map(|p| p.as_ref())),
                    |row| {
                        let ts: i64 = row.get(0)?;
                        let service: String = row.get(1)?;
                        let value: Option<f64> = row.get(2)?;
                        Ok((ts, service, value))
                    },
                )?;
                for row in rows {
                    let (ts, service, value) = row?;
                    let Some(value) = value else { continue };
                    let bucket = ts - ts.rem_euclid(bucket_ms);
                    let group = query.group_by_service.then_some(service);
                    samples.entry((bucket, group)).or_default().push(value);
                }
                Ok(())
            })?;
        }

        let mut out: Vec<AggregateRow> = samples
            .into_iter()
            .map(|((bucket_ms, group), mut values)| {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mut agg = HashMap::new();
                for a in &query.aggregates {
                    let v = match a {
                        Aggregate::Count => values.len() as f64,
                        Aggregate::Avg => values.iter().sum::<f64>() / values.len() as f64,
                        Aggregate::Min => *values.first().unwrap_or(&0.0),
                        Aggregate::Max => *values.last().unwrap_or(&0.0),
                        Aggregate::P50 => percentile(&values, 0.50),
                        Aggregate::P95 => percentile(&values, 0.95),
                        Aggregate::P99 => percentile(&values, 0.99),
                    };
                    agg.insert(a.as_str(), v);
                }
                AggregateRow {
                    bucket: DateTime::from_timestamp_millis(bucket_ms).unwrap_or_default(),
                    group,
                    values: agg,
                }
            })
            .collect();
        out.sort_by(|a, b| (a.bucket, a.group.clone()).cmp(&(b.bucket, b.group.clone())));
        Ok(out)
    }

    fn purge(&self, retention_days: u32) -> Result<u32> {
        self.partitions.cleanup_older_than(retention_days)
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
