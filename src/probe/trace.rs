//! Request phase timing.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Timestamps captured while one request is in flight.
///
/// A phase that never happened (no DNS for an IP literal, no TLS for plain
/// HTTP, nothing past a failed connect) stays `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseTimes {
    pub dns_start: Option<Instant>,
    pub dns_done: Option<Instant>,
    pub connect_start: Option<Instant>,
    pub connect_done: Option<Instant>,
    pub tls_start: Option<Instant>,
    pub tls_done: Option<Instant>,
    pub got_conn: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub request_start: Option<Instant>,
    pub request_done: Option<Instant>,
}

impl PhaseTimes {
    pub fn trace(&self) -> Trace {
        Trace {
            dns_lookup: span(self.dns_start, self.dns_done),
            tcp_connection: span(self.connect_start, self.connect_done),
            tls_handshake: span(self.tls_start, self.tls_done),
            server_processing: span(self.got_conn, self.first_byte),
            content_transfer: span(self.first_byte, self.request_done),
            total: span(self.request_start, self.request_done),
        }
    }
}

fn span(start: Option<Instant>, end: Option<Instant>) -> Duration {
    match (start, end) {
        (Some(start), Some(end)) => end.saturating_duration_since(start),
        _ => Duration::ZERO,
    }
}

/// Per-phase duration breakdown of one request, or an average of many.
///
/// Serialized as integer microseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(with = "micros")]
    pub dns_lookup: Duration,
    #[serde(with = "micros")]
    pub tcp_connection: Duration,
    #[serde(with = "micros")]
    pub tls_handshake: Duration,
    #[serde(with = "micros")]
    pub server_processing: Duration,
    #[serde(with = "micros")]
    pub content_transfer: Duration,
    #[serde(with = "micros")]
    pub total: Duration,
}

impl std::fmt::Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DNS: {}ms, TCP: {}ms, TLS: {}ms, Server: {}ms, Transfer: {}ms, Total: {}ms",
            self.dns_lookup.as_millis(),
            self.tcp_connection.as_millis(),
            self.tls_handshake.as_millis(),
            self.server_processing.as_millis(),
            self.content_transfer.as_millis(),
            self.total.as_millis(),
        )
    }
}

mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}
