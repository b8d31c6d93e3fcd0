//! SQLite database store implementation.

use super::buckets::{fill_buckets, BucketRow};
use super::models::*;
use crate::probe::Trace;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Connection lock poisoned")]
    Poisoned,
}

/// Read/write contract between the scheduler, the API and storage.
///
/// Implementations must be safe to share between probe tasks.
pub trait ResultStore: Send + Sync {
    /// Append one result.
    fn save(&self, result: &CheckResult) -> Result<(), DbError>;

    /// Append many results; implementations may batch.
    fn save_all(&self, results: &[CheckResult]) -> Result<(), DbError> {
        results.iter().try_for_each(|r| self.save(r))
    }

    /// Raw results of one service within `[start, end)`, oldest first.
    fn results(
        &self,
        monitor_id: &str,
        service_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, DbError>;

    /// One metric per qualifying monitor/service per bucket, gaps included.
    fn read(&self, filter: &ReadFilter) -> Result<Vec<Metric>, DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let mut conn = Connection::open(path)?;
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Every monitor/service pair that has at least one stored result.
    pub fn known_pairs(&self) -> Result<Vec<(String, String)>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT monitor_id, service_id FROM check_results ORDER BY monitor_id, service_id",
        )?;

        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(pairs)
    }

    fn bucket_rows(&self, filter: &ReadFilter) -> Result<Vec<BucketRow>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT monitor_id, service_id, (at_ms - ?1) / ?2 AS bucket,
                    SUM(success), SUM(1 - success),
                    AVG(json_extract(details, '$.trace.dns_lookup')),
                    AVG(json_extract(details, '$.trace.tcp_connection')),
                    AVG(json_extract(details, '$.trace.tls_handshake')),
                    AVG(json_extract(details, '$.trace.server_processing')),
                    AVG(json_extract(details, '$.trace.content_transfer')),
                    AVG(json_extract(details, '$.trace.total'))
             FROM check_results
             WHERE at_ms >= ?1 AND at_ms < ?3
             GROUP BY monitor_id, service_id, bucket
             ORDER BY monitor_id, service_id, bucket",
        )?;

        let rows = stmt
            .query_map(
                params![
                    filter.since.timestamp_millis(),
                    filter.bucket().num_milliseconds(),
                    filter.until().timestamp_millis(),
                ],
                |row| {
                    let averages = [
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                        row.get::<_, Option<f64>>(7)?,
                        row.get::<_, Option<f64>>(8)?,
                        row.get::<_, Option<f64>>(9)?,
                        row.get::<_, Option<f64>>(10)?,
                    ];
                    Ok(BucketRow {
                        monitor_id: row.get(0)?,
                        service_id: row.get(1)?,
                        index: row.get(2)?,
                        passed: row.get(3)?,
                        failed: row.get(4)?,
                        trace: average_trace(averages),
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }
}

impl ResultStore for Store {
    fn save(&self, result: &CheckResult) -> Result<(), DbError> {
        self.save_all(std::slice::from_ref(result))
    }

    fn save_all(&self, results: &[CheckResult]) -> Result<(), DbError> {
        if results.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO check_results (monitor_id, service_id, at_ms, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for r in results {
                stmt.execute(params![
                    r.monitor_id,
                    r.service_id,
                    r.at.timestamp_millis(),
                    r.success,
                    serde_json::to_string(&r.details())?,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn results(
        &self,
        monitor_id: &str,
        service_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT monitor_id, service_id, at_ms, success, details FROM check_results
             WHERE monitor_id = ?1 AND service_id = ?2 AND at_ms >= ?3 AND at_ms < ?4
             ORDER BY at_ms ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(
                params![
                    monitor_id,
                    service_id,
                    start.timestamp_millis(),
                    end.timestamp_millis()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for (monitor_id, service_id, at_ms, success, details) in rows {
            let details: Details = serde_json::from_str(&details)?;
            results.push(CheckResult {
                monitor_id,
                service_id,
                at: DateTime::from_timestamp_millis(at_ms).unwrap_or_default(),
                success,
                trace: details.trace,
                status_code: details.response.map(|r| r.status_code),
                error: details.error.map(|e| e.message),
            });
        }

        Ok(results)
    }

    fn read(&self, filter: &ReadFilter) -> Result<Vec<Metric>, DbError> {
        filter.validate().map_err(DbError::InvalidFilter)?;

        let known = self.known_pairs()?;
        let rows = self.bucket_rows(filter)?;

        Ok(fill_buckets(filter, &known, rows))
    }
}

/// Build a trace from per-phase microsecond averages.
fn average_trace(averages: [Option<f64>; 6]) -> Option<Trace> {
    if averages.iter().all(Option::is_none) {
        return None;
    }

    let [dns, tcp, tls, server, transfer, total] =
        averages.map(|v| Duration::from_micros(v.unwrap_or(0.0).max(0.0).round() as u64));

    Some(Trace {
        dns_lookup: dns,
        tcp_connection: tcp,
        tls_handshake: tls,
        server_processing: server,
        content_transfer: transfer,
        total,
    })
}
