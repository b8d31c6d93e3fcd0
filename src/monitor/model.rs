//! Validated monitor model.
//!
//! Everything here is built once by the loader and never mutated afterwards,
//! so the scheduler can share it between probe tasks without locking.

use crate::db::ServiceSelector;

use serde::Serialize;
use std::time::Duration;

/// The full, validated set of monitors.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub monitors: Vec<Monitor>,
}

impl MonitorConfig {
    /// Enumerate every monitor with its service IDs, in document order.
    pub fn active_services(&self) -> Vec<ServiceSelector> {
        self.monitors
            .iter()
            .map(|m| ServiceSelector {
                monitor_id: m.id.clone(),
                service_ids: m.services.iter().map(|s| s.id.clone()).collect(),
            })
            .collect()
    }

    /// Iterate over every check of every service of every monitor.
    pub fn checks(&self) -> impl Iterator<Item = &Check> {
        self.monitors
            .iter()
            .flat_map(|m| m.services.iter())
            .flat_map(|s| s.checks.iter())
    }

    pub fn find_service(&self, monitor_id: &str, service_id: &str) -> Option<&Service> {
        self.monitors
            .iter()
            .find(|m| m.id == monitor_id)?
            .services
            .iter()
            .find(|s| s.id == service_id)
    }
}

/// A named group of services, e.g. a region or an environment.
#[derive(Debug, Clone, Serialize)]
pub struct Monitor {
    pub id: String,
    pub name: String,
    pub services: Vec<Service>,
}

/// A named unit under a monitor owning one or more checks.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub checks: Vec<Check>,
}

/// Identifiers of the monitor and service a check belongs to.
///
/// Copied onto every check during validation so results can be tagged
/// without walking back up the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckOwner {
    pub monitor_id: String,
    pub service_id: String,
}

impl std::fmt::Display for CheckOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.monitor_id, self.service_id)
    }
}

/// A recurring probe definition. HTTP is the only kind today.
#[derive(Debug, Clone)]
pub enum Check {
    Http(HttpCheck),
}

impl Check {
    pub fn owner(&self) -> &CheckOwner {
        match self {
            Check::Http(h) => &h.owner,
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Check::Http(h) => h.interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Check::Http(h) => h.timeout,
        }
    }

    /// Human-readable target, used in log lines.
    pub fn target(&self) -> &str {
        match self {
            Check::Http(h) => &h.addr,
        }
    }
}

/// An HTTP GET check.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    pub owner: CheckOwner,
    pub interval: Duration,
    pub timeout: Duration,
    pub addr: String,
    pub expectations: Vec<Expectation>,
}

/// What an expectation is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    /// The HTTP response status code.
    Status,
}

impl Subject {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status" => Some(Subject::Status),
            _ => None,
        }
    }
}

/// An assertion that the subject's value is one of `inclusion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub subject: Subject,
    pub inclusion: Vec<i64>,
}

impl Expectation {
    pub fn admits_status(&self, status: u16) -> bool {
        self.inclusion.contains(&i64::from(status))
    }
}
