//! Database model types.

use crate::monitor::CheckOwner;
use crate::probe::Trace;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Health value of a bucket without any observations.
pub const NO_DATA: f64 = -1.0;

/// Most buckets a single read may request per monitor/service.
pub const MAX_BUCKETS: usize = 100_000;

/// The outcome of one executed probe. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub monitor_id: String,
    pub service_id: String,
    pub at: DateTime<Utc>,
    pub success: bool,
    pub trace: Trace,
    /// Status code of the response, when one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Transport error message, when no response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    /// Start a failed result for `owner`; the executor fills in the rest.
    pub fn new(owner: &CheckOwner, at: DateTime<Utc>, trace: Trace) -> Self {
        Self {
            monitor_id: owner.monitor_id.clone(),
            service_id: owner.service_id.clone(),
            at,
            success: false,
            trace,
            status_code: None,
            error: None,
        }
    }

    pub fn details(&self) -> Details {
        Details {
            trace: self.trace,
            response: self
                .status_code
                .map(|status_code| ResponseDetails { status_code }),
            error: self.error.clone().map(|message| ErrorDetails { message }),
        }
    }
}

/// Serialized detail column of a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Details {
    pub trace: Trace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDetails {
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
}

/// Aggregated health of one (monitor, service, bucket).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub monitor_id: String,
    pub service_id: String,
    pub bucket: DateTime<Utc>,
    /// passed / (passed + failed), or [`NO_DATA`].
    pub health: f64,
    pub passed_checks: i64,
    pub failed_checks: i64,
    /// Average phase timings of the bucket's observations.
    pub trace: Option<Trace>,
}

/// Calendar-free time unit used by read filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub const fn as_secs(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
            Self::Day => 86400,
            Self::Week => 604800,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('s') {
            "second" => Ok(Self::Second),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            _ => Err(format!("unknown time unit: {}", s)),
        }
    }
}

/// Restricts a read to one monitor, and optionally some of its services.
///
/// An empty `service_ids` selects every service of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelector {
    pub monitor_id: String,
    pub service_ids: Vec<String>,
}

impl ServiceSelector {
    pub fn single(monitor_id: &str, service_id: &str) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            service_ids: vec![service_id.to_string()],
        }
    }
}

/// Parameters of a health-over-time query.
#[derive(Debug, Clone)]
pub struct ReadFilter {
    pub since: DateTime<Utc>,
    pub bucket_width: u32,
    pub bucket_unit: TimeUnit,
    pub interval: u32,
    pub interval_unit: TimeUnit,
    /// `None` selects every monitor/service the store has seen.
    pub active_services: Option<Vec<ServiceSelector>>,
}

impl ReadFilter {
    // Neither product can overflow: u32 times at most a week in seconds.
    fn bucket_secs(&self) -> i64 {
        i64::from(self.bucket_width) * self.bucket_unit.as_secs()
    }

    fn span_secs(&self) -> i64 {
        i64::from(self.interval) * self.interval_unit.as_secs()
    }

    pub fn bucket(&self) -> Duration {
        Duration::seconds(self.bucket_secs())
    }

    pub fn span(&self) -> Duration {
        Duration::seconds(self.span_secs())
    }

    /// End of the window. Only meaningful for a filter that passed [`validate`](Self::validate).
    pub fn until(&self) -> DateTime<Utc> {
        self.since
            .checked_add_signed(self.span())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Number of buckets covering `[since, until)`; a trailing partial bucket counts.
    pub fn bucket_count(&self) -> usize {
        let bucket = self.bucket_secs();
        if bucket <= 0 {
            return 0;
        }
        let span = self.span_secs();
        ((span + bucket - 1) / bucket) as usize
    }

    pub fn bucket_start(&self, index: usize) -> DateTime<Utc> {
        let offset = i64::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(self.bucket_secs()))
            .and_then(Duration::try_seconds);

        offset
            .and_then(|offset| self.since.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_width == 0 {
            return Err("bucket width must be > 0".to_string());
        }
        if self.interval == 0 {
            return Err("interval must be > 0".to_string());
        }
        if self.since.checked_add_signed(self.span()).is_none() {
            return Err("window ends outside the supported time range".to_string());
        }
        if self.bucket_count() > MAX_BUCKETS {
            return Err(format!(
                "window holds {} buckets, at most {} allowed",
                self.bucket_count(),
                MAX_BUCKETS
            ));
        }
        Ok(())
    }
}

/// Percentage of passed checks across all buckets, `None` without data.
pub fn uptime(metrics: &[Metric]) -> Option<f64> {
    let passed: i64 = metrics.iter().map(|m| m.passed_checks).sum();
    let total: i64 = metrics
        .iter()
        .map(|m| m.passed_checks + m.failed_checks)
        .sum();

    if total == 0 {
        None
    } else {
        Some(passed as f64 * 100.0 / total as f64)
    }
}

pub fn format_uptime(metrics: &[Metric]) -> String {
    match uptime(metrics) {
        Some(pct) => format!("{:.2}%", pct),
        None => "no data".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metric(passed: i64, failed: i64) -> Metric {
        Metric {
            monitor_id: "m".to_string(),
            service_id: "s".to_string(),
            bucket: Utc::now(),
            health: NO_DATA,
            passed_checks: passed,
            failed_checks: failed,
            trace: None,
        }
    }

    fn filter(width: u32, unit: TimeUnit, interval: u32, interval_unit: TimeUnit) -> ReadFilter {
        ReadFilter {
            since: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            bucket_width: width,
            bucket_unit: unit,
            interval,
            interval_unit,
            active_services: None,
        }
    }

    #[test]
    fn test_uptime() {
        assert_eq!(uptime(&[]), None);
        assert_eq!(format_uptime(&[metric(0, 0), metric(0, 0)]), "no data");

        let metrics = vec![metric(3, 1), metric(0, 0), metric(196, 0)];
        assert_eq!(uptime(&metrics), Some(99.5));
        assert_eq!(format_uptime(&metrics), "99.50%");
    }

    #[test]
    fn test_bucket_count() {
        assert_eq!(filter(1, TimeUnit::Hour, 1, TimeUnit::Day).bucket_count(), 24);
        assert_eq!(filter(1, TimeUnit::Day, 89, TimeUnit::Day).bucket_count(), 89);
        assert_eq!(filter(7, TimeUnit::Minute, 1, TimeUnit::Hour).bucket_count(), 9);
        assert_eq!(filter(0, TimeUnit::Hour, 1, TimeUnit::Day).bucket_count(), 0);
    }

    #[test]
    fn test_filter_bounds() {
        let f = filter(1, TimeUnit::Hour, 1, TimeUnit::Day);
        assert_eq!(f.until(), Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(
            f.bucket_start(3),
            Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
        );
        assert!(f.validate().is_ok());
        assert!(filter(1, TimeUnit::Hour, 0, TimeUnit::Day).validate().is_err());
    }

    #[test]
    fn test_oversized_windows_are_rejected() {
        let huge = filter(1, TimeUnit::Week, u32::MAX, TimeUnit::Week);
        assert!(huge.validate().is_err());
        assert_eq!(huge.until(), DateTime::<Utc>::MAX_UTC);

        let dense = filter(1, TimeUnit::Second, 1000, TimeUnit::Week);
        assert!(dense.validate().unwrap_err().contains("buckets"));

        let edge = filter(1, TimeUnit::Second, MAX_BUCKETS as u32, TimeUnit::Second);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_time_unit_parse() {
        assert_eq!("day".parse::<TimeUnit>(), Ok(TimeUnit::Day));
        assert_eq!("hours".parse::<TimeUnit>(), Ok(TimeUnit::Hour));
        assert!("fortnight".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_details_shape() {
        let owner = CheckOwner {
            monitor_id: "m".to_string(),
            service_id: "s".to_string(),
        };
        let mut result = CheckResult::new(&owner, Utc::now(), Trace::default());
        result.status_code = Some(503);

        let json = serde_json::to_value(result.details()).unwrap();
        assert_eq!(json["response"]["status_code"], 503);
        assert!(json.get("error").is_none());
        assert_eq!(json["trace"]["total"], 0);
    }
}
