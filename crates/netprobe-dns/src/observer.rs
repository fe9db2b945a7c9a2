//! Query observation hook.
//!
//! The forwarder reports every upstream exchange it makes, successful or not,
//! so callers can log or collect measurements without the forwarder knowing
//! about either.

use hickory_proto::rr::RecordType;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info};

/// How one exchange with one upstream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The upstream answered with at least one address.
    Answered { addresses: Vec<IpAddr> },
    /// The upstream replied well-formed but with no usable answer.
    NoAnswer,
    /// The upstream did not reply within the per-upstream timeout.
    Timeout,
    /// The reply could not be parsed or failed validation.
    Malformed,
}

/// One observed exchange between the forwarder and an upstream.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// Queried name.
    pub name: String,
    /// Queried record type.
    pub record_type: RecordType,
    /// Upstream the query was sent to.
    pub upstream: SocketAddr,
    /// How the exchange ended.
    pub outcome: QueryOutcome,
    /// Time from send to outcome.
    pub latency: Duration,
}

/// Receives query events as they happen.
pub trait QueryObserver: Send + Sync {
    fn on_query(&self, event: &QueryEvent);
}

/// Observer that does nothing.
pub struct NullObserver;

impl QueryObserver for NullObserver {
    fn on_query(&self, _event: &QueryEvent) {}
}

/// Observer that emits structured log records.
pub struct LogObserver;

impl QueryObserver for LogObserver {
    fn on_query(&self, event: &QueryEvent) {
        match &event.outcome {
            QueryOutcome::Answered { addresses } => {
                info!(
                    name = %event.name,
                    record_type = %event.record_type,
                    upstream = %event.upstream,
                    addresses = ?addresses,
                    latency_ms = event.latency.as_secs_f64() * 1000.0,
                    "DNS query answered"
                );
            }
            outcome => {
                debug!(
                    name = %event.name,
                    record_type = %event.record_type,
                    upstream = %event.upstream,
                    outcome = ?outcome,
                    latency_ms = event.latency.as_secs_f64() * 1000.0,
                    "DNS query not answered"
                );
            }
        }
    }
}
