//! Probe executor.
//!
//! Runs one check: a single instrumented request bounded by the check's
//! timeout, followed by expectation evaluation. Never retries.

mod http;
mod trace;

pub use http::*;
pub use trace::*;

use crate::db::CheckResult;
use crate::monitor::{Check, Expectation, HttpCheck, Subject};

use chrono::Utc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Probe error types. All of them are transport-level: no expectation is
/// evaluated when one occurs.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("dns lookup failed: {0}")]
    Dns(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("http error: {0}")]
    Http(String),
}

impl Check {
    /// Execute the check once and produce its result record.
    pub async fn execute(&self) -> CheckResult {
        match self {
            Check::Http(h) => h.execute().await,
        }
    }
}

impl HttpCheck {
    pub async fn execute(&self) -> CheckResult {
        let at = Utc::now();
        let mut times = PhaseTimes {
            request_start: Some(Instant::now()),
            ..Default::default()
        };

        let outcome = match tokio::time::timeout(self.timeout, http_get(&self.addr, &mut times)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };
        times.request_done = Some(Instant::now());

        let mut result = CheckResult::new(&self.owner, at, times.trace());
        match outcome {
            Ok(status) => {
                result.status_code = Some(status);
                result.success = evaluate(&self.expectations, status);
            }
            Err(e) => {
                tracing::debug!("Probe of {} for {} failed: {}", self.addr, self.owner, e);
                result.error = Some(e.to_string());
            }
        }

        result
    }
}

/// All expectations must hold for the response to count as a success.
pub fn evaluate(expectations: &[Expectation], status: u16) -> bool {
    expectations.iter().all(|e| match e.subject {
        Subject::Status => e.admits_status(status),
    })
}
