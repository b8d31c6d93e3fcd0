//! Monitor document loading and validation.
//!
//! The document is deserialized into loose `Raw*` shapes first, then validated
//! in a single depth-first pass. The first violation aborts the whole load.

use super::model::*;

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse monitor config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("monitor #{0} cannot have empty ID")]
    EmptyMonitorId(usize),
    #[error("monitor {0} is defined more than once")]
    DuplicateMonitorId(String),
    #[error("monitor {0} cannot have empty name")]
    EmptyMonitorName(String),
    #[error("service in monitor {0} cannot have empty ID")]
    EmptyServiceId(String),
    #[error("service {service} is defined more than once in monitor {monitor}")]
    DuplicateServiceId { monitor: String, service: String },
    #[error("service {service} in monitor {monitor} cannot have empty name")]
    EmptyServiceName { monitor: String, service: String },
    #[error("http check #{index} of {monitor}/{service}: {source}")]
    InvalidCheck {
        monitor: String,
        service: String,
        index: usize,
        #[source]
        source: CheckError,
    },
}

/// Check-level validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("timeout must be > 0")]
    NonPositiveTimeout,
    #[error("interval must be > 0")]
    NonPositiveInterval,
    #[error("addr cannot be empty")]
    EmptyAddr,
    #[error("at least one expectation is required")]
    MissingExpectation,
    #[error("invalid expectation subject {0:?}")]
    UnknownSubject(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default, rename = "monitor")]
    monitors: Vec<RawMonitor>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMonitor {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "service")]
    services: Vec<RawService>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "http")]
    http_checks: Vec<RawHttpCheck>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHttpCheck {
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    timeout: i64,
    #[serde(default)]
    addr: String,
    #[serde(default, rename = "expect")]
    expectations: Vec<RawExpectation>,
}

#[derive(Debug, Default, Deserialize)]
struct RawExpectation {
    #[serde(default)]
    subject: String,
    #[serde(default, rename = "in")]
    inclusion: Vec<i64>,
}

impl MonitorConfig {
    /// Read and validate the monitor document at `path`.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&src)
    }

    /// Parse and validate a monitor document.
    pub fn parse(src: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = toml::from_str(src)?;
        validate(raw)
    }
}

fn validate(raw: RawDocument) -> Result<MonitorConfig, ConfigError> {
    let mut monitor_ids = HashSet::new();
    let mut monitors = Vec::with_capacity(raw.monitors.len());

    for (mi, m) in raw.monitors.into_iter().enumerate() {
        if m.id.is_empty() {
            return Err(ConfigError::EmptyMonitorId(mi + 1));
        }
        if !monitor_ids.insert(m.id.clone()) {
            return Err(ConfigError::DuplicateMonitorId(m.id));
        }
        if m.name.is_empty() {
            return Err(ConfigError::EmptyMonitorName(m.id));
        }

        let mut service_ids = HashSet::new();
        let mut services = Vec::with_capacity(m.services.len());

        for s in m.services {
            if s.id.is_empty() {
                return Err(ConfigError::EmptyServiceId(m.id));
            }
            if !service_ids.insert(s.id.clone()) {
                return Err(ConfigError::DuplicateServiceId {
                    monitor: m.id,
                    service: s.id,
                });
            }
            if s.name.is_empty() {
                return Err(ConfigError::EmptyServiceName {
                    monitor: m.id,
                    service: s.id,
                });
            }

            let owner = CheckOwner {
                monitor_id: m.id.clone(),
                service_id: s.id.clone(),
            };

            let mut checks = Vec::with_capacity(s.http_checks.len());
            for (ci, h) in s.http_checks.into_iter().enumerate() {
                let check = validate_http_check(owner.clone(), h).map_err(|source| {
                    ConfigError::InvalidCheck {
                        monitor: owner.monitor_id.clone(),
                        service: owner.service_id.clone(),
                        index: ci + 1,
                        source,
                    }
                })?;
                checks.push(Check::Http(check));
            }

            services.push(Service {
                id: s.id,
                name: s.name,
                checks,
            });
        }

        monitors.push(Monitor {
            id: m.id,
            name: m.name,
            services,
        });
    }

    Ok(MonitorConfig { monitors })
}

fn validate_http_check(owner: CheckOwner, raw: RawHttpCheck) -> Result<HttpCheck, CheckError> {
    if raw.timeout <= 0 {
        return Err(CheckError::NonPositiveTimeout);
    }
    if raw.interval <= 0 {
        return Err(CheckError::NonPositiveInterval);
    }
    if raw.addr.is_empty() {
        return Err(CheckError::EmptyAddr);
    }
    if raw.expectations.is_empty() {
        return Err(CheckError::MissingExpectation);
    }

    let expectations = raw
        .expectations
        .into_iter()
        .map(|e| match Subject::parse(&e.subject) {
            Some(subject) => Ok(Expectation {
                subject,
                inclusion: e.inclusion,
            }),
            None => Err(CheckError::UnknownSubject(e.subject)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if raw.timeout > raw.interval {
        tracing::warn!(
            "Check {} for {} has timeout {}s longer than its interval {}s",
            raw.addr,
            owner,
            raw.timeout,
            raw.interval
        );
    }

    Ok(HttpCheck {
        owner,
        interval: Duration::from_secs(raw.interval as u64),
        timeout: Duration::from_secs(raw.timeout as u64),
        addr: raw.addr,
        expectations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [[monitor]]
        id = "aws:eu-west-1"
        name = "AWS Europe"

        [[monitor.service]]
        id = "core-api"
        name = "Core API"

        [[monitor.service.http]]
        interval = 100
        timeout = 10
        addr = "http://a.local"

        [[monitor.service.http.expect]]
        subject = "status"
        in = [200]

        [[monitor.service]]
        id = "auth"
        name = "Auth"

        [[monitor]]
        id = "gcp:us-east1"
        name = "GCP US"

        [[monitor.service]]
        id = "billing"
        name = "Billing"
    "#;

    fn check_doc(interval: i64, timeout: i64, addr: &str, expect: &str) -> String {
        format!(
            r#"
            [[monitor]]
            id = "a"
            name = "a"
            [[monitor.service]]
            id = "b"
            name = "b"
            [[monitor.service.http]]
            interval = {interval}
            timeout = {timeout}
            addr = "{addr}"
            {expect}
            "#
        )
    }

    const STATUS_200: &str = r#"
        [[monitor.service.http.expect]]
        subject = "status"
        in = [200]
    "#;

    fn check_error(src: &str) -> CheckError {
        match MonitorConfig::parse(src) {
            Err(ConfigError::InvalidCheck {
                monitor,
                service,
                index,
                source,
            }) => {
                assert_eq!(monitor, "a");
                assert_eq!(service, "b");
                assert_eq!(index, 1);
                source
            }
            other => panic!("expected check error, got {:?}", other),
        }
    }

    #[test]
    fn test_parses_valid_document() {
        let cfg = MonitorConfig::parse(VALID).unwrap();
        assert_eq!(cfg.monitors.len(), 2);

        let m = &cfg.monitors[0];
        assert_eq!(m.id, "aws:eu-west-1");
        assert_eq!(m.name, "AWS Europe");
        assert_eq!(m.services.len(), 2);
        assert_eq!(m.services[0].id, "core-api");
        assert_eq!(m.services[0].name, "Core API");

        let Check::Http(http) = &m.services[0].checks[0];
        assert_eq!(http.addr, "http://a.local");
        assert_eq!(http.interval, Duration::from_secs(100));
        assert_eq!(http.timeout, Duration::from_secs(10));
        assert_eq!(http.expectations[0].subject, Subject::Status);
        assert_eq!(http.expectations[0].inclusion, vec![200]);
        assert_eq!(http.owner.monitor_id, "aws:eu-west-1");
        assert_eq!(http.owner.service_id, "core-api");
    }

    #[test]
    fn test_active_services_preserve_document_order() {
        let cfg = MonitorConfig::parse(VALID).unwrap();
        let active = cfg.active_services();

        assert_eq!(active.len(), 2);
        assert_eq!(active[0].monitor_id, "aws:eu-west-1");
        assert_eq!(active[0].service_ids, vec!["core-api", "auth"]);
        assert_eq!(active[1].monitor_id, "gcp:us-east1");
        assert_eq!(active[1].service_ids, vec!["billing"]);
        assert_eq!(cfg.checks().count(), 1);
    }

    #[test]
    fn test_empty_document_is_valid() {
        let cfg = MonitorConfig::parse("").unwrap();
        assert!(cfg.monitors.is_empty());
        assert!(cfg.active_services().is_empty());
    }

    #[test]
    fn test_missing_monitor_id() {
        let err = MonitorConfig::parse("[[monitor]]\nid = \"\"\nname = \"a\"").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyMonitorId(1)));
        assert_eq!(err.to_string(), "monitor #1 cannot have empty ID");
    }

    #[test]
    fn test_missing_monitor_name() {
        let err = MonitorConfig::parse("[[monitor]]\nid = \"a\"\nname = \"\"").unwrap_err();
        assert_eq!(err.to_string(), "monitor a cannot have empty name");
    }

    #[test]
    fn test_missing_service_id() {
        let src = r#"
            [[monitor]]
            id = "a"
            name = "a"
            [[monitor.service]]
            id = ""
            name = "b"
        "#;
        let err = MonitorConfig::parse(src).unwrap_err();
        assert_eq!(err.to_string(), "service in monitor a cannot have empty ID");
    }

    #[test]
    fn test_missing_service_name() {
        let src = r#"
            [[monitor]]
            id = "a"
            name = "a"
            [[monitor.service]]
            id = "b"
            name = ""
        "#;
        let err = MonitorConfig::parse(src).unwrap_err();
        assert_eq!(err.to_string(), "service b in monitor a cannot have empty name");
    }

    #[test]
    fn test_duplicate_ids() {
        let src = r#"
            [[monitor]]
            id = "a"
            name = "a"
            [[monitor]]
            id = "a"
            name = "again"
        "#;
        assert!(matches!(
            MonitorConfig::parse(src),
            Err(ConfigError::DuplicateMonitorId(id)) if id == "a"
        ));

        let src = r#"
            [[monitor]]
            id = "a"
            name = "a"
            [[monitor.service]]
            id = "b"
            name = "b"
            [[monitor.service]]
            id = "b"
            name = "b2"
        "#;
        assert!(matches!(
            MonitorConfig::parse(src),
            Err(ConfigError::DuplicateServiceId { .. })
        ));
    }

    #[test]
    fn test_check_validation() {
        assert_eq!(
            check_error(&check_doc(10, 0, "http://a.local", STATUS_200)),
            CheckError::NonPositiveTimeout
        );
        assert_eq!(
            check_error(&check_doc(10, -5, "http://a.local", STATUS_200)),
            CheckError::NonPositiveTimeout
        );
        assert_eq!(
            check_error(&check_doc(0, 10, "http://a.local", STATUS_200)),
            CheckError::NonPositiveInterval
        );
        assert_eq!(
            check_error(&check_doc(10, 10, "", STATUS_200)),
            CheckError::EmptyAddr
        );
        assert_eq!(
            check_error(&check_doc(10, 10, "http://a.local", "")),
            CheckError::MissingExpectation
        );

        let invalid = r#"
            [[monitor.service.http.expect]]
            subject = "invalid"
            in = [200]
        "#;
        assert_eq!(
            check_error(&check_doc(10, 10, "http://example.com", invalid)),
            CheckError::UnknownSubject("invalid".to_string())
        );
    }

    #[test]
    fn test_validation_priority() {
        // Timeout is reported before interval, interval before addr, addr before expectations.
        assert_eq!(check_error(&check_doc(0, 0, "", "")), CheckError::NonPositiveTimeout);
        assert_eq!(check_error(&check_doc(0, 5, "", "")), CheckError::NonPositiveInterval);
        assert_eq!(check_error(&check_doc(5, 5, "", "")), CheckError::EmptyAddr);

        // Monitor name is reported before any service problem.
        let src = r#"
            [[monitor]]
            id = "a"
            name = ""
            [[monitor.service]]
            id = ""
            name = ""
        "#;
        assert!(matches!(
            MonitorConfig::parse(src),
            Err(ConfigError::EmptyMonitorName(_))
        ));

        // Service ID before service name before checks.
        let src = r#"
            [[monitor]]
            id = "a"
            name = "a"
            [[monitor.service]]
            id = ""
            name = ""
            [[monitor.service.http]]
            interval = 0
        "#;
        assert!(matches!(
            MonitorConfig::parse(src),
            Err(ConfigError::EmptyServiceId(_))
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            MonitorConfig::parse("[[monitor]\nid ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, VALID.as_bytes()).unwrap();
        let cfg = MonitorConfig::load_file(file.path()).unwrap();
        assert_eq!(cfg.monitors.len(), 2);

        let err = MonitorConfig::load_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
