//! Shared helpers for unit tests: fixture HTTP servers and an in-memory store.

use crate::db::{fill_buckets, BucketRow, CheckResult, DbError, Metric, ReadFilter, ResultStore};
use crate::monitor::{CheckOwner, Expectation, HttpCheck};

use axum::{http::StatusCode, response::Redirect, routing::get, Router};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

/// Serve `/` (200), `/missing` (404) and `/redirect` (307 to `/`) on an ephemeral port.
pub async fn serve_fixture() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "missing") }),
        )
        .route("/redirect", get(|| async { Redirect::temporary("/") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Accept connections and never answer.
pub async fn silent_listener() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn http_check(addr: &str, expectations: Vec<Expectation>, timeout_secs: u64) -> HttpCheck {
    HttpCheck {
        owner: CheckOwner {
            monitor_id: "m".to_string(),
            service_id: "s".to_string(),
        },
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(timeout_secs),
        addr: addr.to_string(),
        expectations,
    }
}

/// Keeps results in memory; reads go through the same gap-fill path as the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    results: Mutex<Vec<CheckResult>>,
}

impl MemoryStore {
    pub fn saved(&self) -> Vec<CheckResult> {
        self.results.lock().unwrap().clone()
    }
}

impl ResultStore for MemoryStore {
    fn save(&self, result: &CheckResult) -> Result<(), DbError> {
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    fn results(
        &self,
        monitor_id: &str,
        service_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, DbError> {
        let mut results: Vec<CheckResult> = self
            .results
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.monitor_id == monitor_id && r.service_id == service_id)
            .filter(|r| r.at >= start && r.at < end)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.at);
        Ok(results)
    }

    fn read(&self, filter: &ReadFilter) -> Result<Vec<Metric>, DbError> {
        filter.validate().map_err(DbError::InvalidFilter)?;

        let results = self.results.lock().unwrap();
        let bucket_ms = filter.bucket().num_milliseconds();

        let mut known: Vec<(String, String)> = results
            .iter()
            .map(|r| (r.monitor_id.clone(), r.service_id.clone()))
            .collect();
        known.sort();
        known.dedup();

        let rows = results
            .iter()
            .filter(|r| r.at >= filter.since && r.at < filter.until())
            .map(|r| BucketRow {
                monitor_id: r.monitor_id.clone(),
                service_id: r.service_id.clone(),
                index: (r.at - filter.since).num_milliseconds() / bucket_ms,
                passed: i64::from(r.success),
                failed: i64::from(!r.success),
                trace: Some(r.trace),
            })
            .fold(Vec::<BucketRow>::new(), |mut acc, row| {
                match acc.iter_mut().find(|a| {
                    a.monitor_id == row.monitor_id
                        && a.service_id == row.service_id
                        && a.index == row.index
                }) {
                    Some(a) => {
                        a.passed += row.passed;
                        a.failed += row.failed;
                    }
                    None => acc.push(row),
                }
                acc
            });

        Ok(fill_buckets(filter, &known, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TimeUnit;

    #[test]
    fn test_memory_store_rejects_invalid_filters() {
        let store = MemoryStore::default();
        let filter = ReadFilter {
            since: Utc::now(),
            bucket_width: 0,
            bucket_unit: TimeUnit::Hour,
            interval: 1,
            interval_unit: TimeUnit::Day,
            active_services: None,
        };

        assert!(matches!(store.read(&filter), Err(DbError::InvalidFilter(_))));
    }
}
